use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use codec::{CloseCode, Message, crypto::random_hex};
use parking_lot::RwLock;
use tokio::{
    sync::Notify,
    task::JoinSet,
    time::{Instant, interval, timeout_at},
};

/// Lifecycle of one WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Lifecycle of a service and its session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ServerState {
    Ready,
    Start,
    ShuttingDown,
    Stop,
}

/// What the manager needs from a session.
pub trait Session: Clone + Send + Sync + 'static {
    fn state(&self) -> ReadyState;

    /// Starts the closing handshake without waiting for it to finish.
    fn close(&self, code: CloseCode, reason: &str);

    /// Tears the connection down without a closing handshake.
    fn abort(&self);

    /// Sends a ping and resolves to whether a pong came back in time.
    fn ping(&self) -> impl Future<Output = bool> + Send;

    /// Resolves to whether the message was written.
    fn send(&self, message: Message) -> impl Future<Output = bool> + Send;
}

pub struct SessionManagerOptions {
    /// Periodically drop sessions that stopped answering pings.
    pub keep_clean: bool,
    /// Upper bound for waiting on peers during shutdown.
    pub wait_time: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionManagerOptions {
    fn default() -> Self {
        Self {
            keep_clean: true,
            wait_time: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// The sessions of one service.
///
/// Ids are 32 random hex digits and never collide with a live session.
pub struct SessionManager<S> {
    sessions: RwLock<HashMap<String, S>>,
    state: RwLock<ServerState>,
    drained: Notify,
    options: SessionManagerOptions,
}

impl<S> SessionManager<S>
where
    S: Session,
{
    pub fn new(options: SessionManagerOptions) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::with_capacity(64)),
            state: RwLock::new(ServerState::Ready),
            drained: Notify::new(),
            options,
        })
    }

    /// Starts accepting sessions, and the sweeper when `keep_clean` is set.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.write();
            if *state != ServerState::Ready {
                return;
            }

            *state = ServerState::Start;
        }

        if !self.options.keep_clean {
            return;
        }

        // The sweeper only holds a weak reference, so it ends when the
        // manager is dropped or stops.
        let this: Weak<Self> = Arc::downgrade(self);
        let period = self.options.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(this) = this.upgrade() else {
                    break;
                };

                if this.state() != ServerState::Start {
                    break;
                }

                let swept = this.sweep().await;
                if swept > 0 {
                    log::info!("session sweep: removed={swept}, remaining={}", this.count());
                }
            }
        });
    }

    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Registers a session and returns its id, or `None` when the manager
    /// is not running. The caller then closes the session as going away.
    pub fn add(&self, session: S) -> Option<String> {
        let state = self.state.read();
        if *state != ServerState::Start {
            return None;
        }

        let mut sessions = self.sessions.write();
        let id = loop {
            let id = random_hex();
            if !sessions.contains_key(&id) {
                break id;
            }
        };

        sessions.insert(id.clone(), session);
        Some(id)
    }

    /// Drops a session. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let (removed, empty) = {
            let mut sessions = self.sessions.write();
            (sessions.remove(id).is_some(), sessions.is_empty())
        };

        if removed && empty {
            self.drained.notify_waiters();
        }

        removed
    }

    pub fn get(&self, id: &str) -> Option<S> {
        self.sessions.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    fn snapshot(&self) -> Vec<(String, S)> {
        self.sessions
            .read()
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect()
    }

    /// Sends a message to every open session. Returns how many accepted it.
    pub async fn broadcast(&self, message: Message) -> usize {
        let mut sent = 0;
        for (id, session) in self.snapshot() {
            if session.state() != ReadyState::Open {
                continue;
            }

            if session.send(message.clone()).await {
                sent += 1;
            } else {
                log::warn!("broadcast failed: session={id}");
            }
        }

        sent
    }

    pub async fn send_to(&self, id: &str, message: Message) -> bool {
        match self.get(id) {
            Some(session) if session.state() == ReadyState::Open => session.send(message).await,
            _ => false,
        }
    }

    pub fn close_session(&self, id: &str, code: CloseCode, reason: &str) -> bool {
        match self.get(id) {
            Some(session) => {
                session.close(code, reason);
                true
            }
            None => false,
        }
    }

    /// Pings every session and drops the ones that are not open or do not
    /// answer. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let mut pings = JoinSet::new();
        for (id, session) in self.snapshot() {
            pings.spawn(async move {
                let alive = match session.state() {
                    ReadyState::Open => session.ping().await,
                    // the closing handshake removes it
                    ReadyState::Closing => true,
                    _ => false,
                };

                (id, session, alive)
            });
        }

        let mut swept = 0;
        while let Some(result) = pings.join_next().await {
            let Ok((id, session, alive)) = result else {
                continue;
            };

            if !alive {
                if session.state() == ReadyState::Open {
                    session.abort();
                }

                if self.remove(&id) {
                    swept += 1;
                }
            }
        }

        swept
    }

    /// Closes every session and waits until they are gone.
    ///
    /// Waits at most `wait_time`; sessions still registered afterwards are
    /// aborted.
    pub async fn stop(&self, code: CloseCode, reason: &str) {
        {
            let mut state = self.state.write();
            if matches!(*state, ServerState::ShuttingDown | ServerState::Stop) {
                return;
            }

            *state = ServerState::ShuttingDown;
        }

        for (_, session) in self.snapshot() {
            session.close(code, reason);
        }

        let deadline = Instant::now() + self.options.wait_time;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.count() == 0 {
                break;
            }

            if timeout_at(deadline, drained).await.is_err() {
                break;
            }
        }

        let stragglers = std::mem::take(&mut *self.sessions.write());
        if !stragglers.is_empty() {
            log::warn!("sessions did not close in time: count={}", stragglers.len());
        }

        for session in stragglers.into_values() {
            session.abort();
        }

        *self.state.write() = ServerState::Stop;
    }
}
