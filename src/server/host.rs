use std::sync::Arc;

use anyhow::Result;
use codec::CloseCode;
use service::{SessionManager, SessionManagerOptions};

use crate::{
    net::context::HttpContext,
    websocket::{Behavior, Role, WebSocket, WebSocketOptions, handshake},
};

pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;

/// A WebSocket service on one path.
///
/// Every accepted session gets a fresh behavior from the factory.
pub struct WebSocketServiceHost {
    path: String,
    sessions: Arc<SessionManager<WebSocket>>,
    factory: BehaviorFactory,
    options: WebSocketOptions,
}

impl WebSocketServiceHost {
    pub fn new<F, B>(path: &str, options: WebSocketOptions, keep_clean: bool, factory: F) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: Behavior,
    {
        let sessions = SessionManager::new(SessionManagerOptions {
            wait_time: options.wait_time,
            keep_clean,
            ..Default::default()
        });

        Self {
            path: path.to_string(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Behavior>),
            sessions,
            options,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sessions(&self) -> &Arc<SessionManager<WebSocket>> {
        &self.sessions
    }

    pub fn options(&self) -> &WebSocketOptions {
        &self.options
    }

    pub fn start(&self) {
        self.sessions.start();
    }

    /// Closes every session of the service.
    pub async fn stop(&self, code: CloseCode, reason: &str) {
        self.sessions.stop(code, reason).await;
        log::info!("service stopped: path={}", self.path);
    }

    /// Runs the handshake on an upgrade request and serves the session
    /// until it closes.
    pub async fn start_session(&self, context: &mut HttpContext) -> Result<()> {
        let (response, negotiated) = match handshake::accept(&context.request, &self.options) {
            Ok(accepted) => accepted,
            Err(response) => {
                context.respond(response).await?;
                return Ok(());
            }
        };

        context.respond(response).await?;

        let io = context.upgrade()?;
        let (socket, reader) = WebSocket::new(
            Role::Server,
            io,
            negotiated,
            self.options.clone(),
            Some(context.request.clone()),
            context.user.clone(),
            Some(context.remote),
        );

        let Some(id) = self.sessions.add(socket.clone()) else {
            log::info!("service is not accepting sessions: path={}", self.path);
            socket.refuse(CloseCode::AWAY, "").await;
            return Ok(());
        };

        socket.set_id(id.clone());
        log::info!("session opened: path={}, session={id}, addr={}", self.path, context.remote);

        let behavior = (self.factory)();
        socket.run(reader, behavior.as_ref()).await;

        self.sessions.remove(&id);
        Ok(())
    }
}
