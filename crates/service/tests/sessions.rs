use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use codec::{CloseCode, Message};
use parking_lot::Mutex;
use wshost_service::{ReadyState, ServerState, Session, SessionManager, SessionManagerOptions};

#[derive(Clone)]
struct MockSession {
    state: Arc<Mutex<ReadyState>>,
    answers_ping: bool,
    sent: Arc<AtomicUsize>,
    closed_with: Arc<Mutex<Option<CloseCode>>>,
    on_close: Arc<Mutex<Option<Box<dyn Fn() + Send + Sync>>>>,
}

impl MockSession {
    fn new(answers_ping: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReadyState::Open)),
            answers_ping,
            sent: Default::default(),
            closed_with: Default::default(),
            on_close: Default::default(),
        }
    }
}

impl Session for MockSession {
    fn state(&self) -> ReadyState {
        *self.state.lock()
    }

    fn close(&self, code: CloseCode, _reason: &str) {
        *self.state.lock() = ReadyState::Closed;
        *self.closed_with.lock() = Some(code);

        if let Some(callback) = self.on_close.lock().as_ref() {
            callback();
        }
    }

    fn abort(&self) {
        *self.state.lock() = ReadyState::Closed;
    }

    async fn ping(&self) -> bool {
        self.answers_ping
    }

    async fn send(&self, _message: Message) -> bool {
        self.sent.fetch_add(1, Ordering::SeqCst);
        true
    }
}

fn manager(keep_clean: bool) -> Arc<SessionManager<MockSession>> {
    SessionManager::new(SessionManagerOptions {
        keep_clean,
        wait_time: Duration::from_millis(200),
        sweep_interval: Duration::from_secs(60),
    })
}

#[tokio::test]
async fn add_requires_a_started_manager() {
    let manager = manager(false);
    assert_eq!(manager.add(MockSession::new(true)), None);

    manager.start();
    assert_eq!(manager.state(), ServerState::Start);

    let a = manager.add(MockSession::new(true)).expect("id");
    let b = manager.add(MockSession::new(true)).expect("id");
    assert_ne!(a, b);
    assert_eq!(a.len(), 32);
    assert_eq!(manager.count(), 2);

    assert!(manager.remove(&a));
    assert!(!manager.remove(&a));
    assert_eq!(manager.ids(), vec![b]);
}

#[tokio::test]
async fn broadcast_reaches_open_sessions() {
    let manager = manager(false);
    manager.start();

    let open = MockSession::new(true);
    let closing = MockSession::new(true);
    *closing.state.lock() = ReadyState::Closing;

    let id = manager.add(open.clone()).expect("id");
    manager.add(closing.clone()).expect("id");

    assert_eq!(manager.broadcast(Message::Text("hi".into())).await, 1);
    assert!(manager.send_to(&id, Message::Text("again".into())).await);
    assert!(!manager.send_to("unknown", Message::Text("x".into())).await);

    assert_eq!(open.sent.load(Ordering::SeqCst), 2);
    assert_eq!(closing.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sweep_drops_dead_sessions() {
    let manager = manager(false);
    manager.start();

    let alive = MockSession::new(true);
    let dead = MockSession::new(false);
    let closed = MockSession::new(true);
    *closed.state.lock() = ReadyState::Closed;

    manager.add(alive.clone()).expect("id");
    manager.add(dead.clone()).expect("id");
    manager.add(closed).expect("id");

    assert_eq!(manager.sweep().await, 2);
    assert_eq!(manager.count(), 1);
    assert_eq!(dead.state(), ReadyState::Closed);
    assert_eq!(alive.state(), ReadyState::Open);
}

#[tokio::test]
async fn stop_waits_for_sessions_to_leave() {
    let manager = manager(false);
    manager.start();

    let session = MockSession::new(true);
    let id = manager.add(session.clone()).expect("id");

    // the session leaves the manager shortly after its close starts
    let leaving = manager.clone();
    *session.on_close.lock() = Some(Box::new(move || {
        let manager = leaving.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            manager.remove(&id);
        });
    }));

    manager.stop(CloseCode::AWAY, "shutdown").await;

    assert_eq!(*session.closed_with.lock(), Some(CloseCode::AWAY));
    assert_eq!(manager.count(), 0);
    assert_eq!(manager.state(), ServerState::Stop);
    assert_eq!(manager.add(MockSession::new(true)), None);
}

#[tokio::test]
async fn stop_aborts_stragglers() {
    let manager = manager(false);
    manager.start();

    let stuck = MockSession::new(true);
    manager.add(stuck.clone()).expect("id");

    let started = tokio::time::Instant::now();
    manager.stop(CloseCode::AWAY, "").await;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(manager.count(), 0);
    assert_eq!(stuck.state(), ReadyState::Closed);
}

#[tokio::test(start_paused = true)]
async fn keep_clean_sweeps_periodically() {
    let manager = manager(true);
    manager.start();

    let dead = MockSession::new(false);
    manager.add(dead).expect("id");

    tokio::time::sleep(Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    assert_eq!(manager.count(), 0);
}
