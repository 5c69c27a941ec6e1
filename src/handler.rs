//! The services the binary runs out of the box.

use std::sync::Arc;

use ahash::HashMap;
use async_trait::async_trait;
use codec::{Message, auth::NetworkCredential};

use crate::{
    server::CredentialFinder,
    websocket::{Behavior, CloseEvent, WebSocket, WebSocketError},
};

/// Looks users up in the static credentials of the configuration.
pub fn static_credentials<I>(credentials: I) -> CredentialFinder
where
    I: IntoIterator<Item = (String, String)>,
{
    let credentials: HashMap<String, String> = credentials.into_iter().collect();
    Arc::new(move |username: &str| {
        credentials
            .get(username)
            .map(|password| NetworkCredential::new(username, password))
    })
}

/// Sends every message back to its sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl Behavior for Echo {
    async fn on_open(&self, socket: &WebSocket) {
        log::info!(
            "session opened: id={:?}, remote={:?}, protocol={:?}",
            socket.id(),
            socket.remote(),
            socket.protocol()
        );
    }

    async fn on_message(&self, socket: &WebSocket, message: Message) {
        if let Err(e) = socket.send(message).await {
            log::warn!("echo failed: id={:?}, err={e}", socket.id());
        }
    }

    async fn on_error(&self, socket: &WebSocket, error: &WebSocketError) {
        log::warn!("session error: id={:?}, err={error}", socket.id());
    }

    async fn on_close(&self, socket: &WebSocket, event: CloseEvent) {
        log::info!(
            "session closed: id={:?}, code={}, reason={}, clean={}",
            socket.id(),
            event.code.0,
            event.reason,
            event.was_clean
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_static_credentials() {
        let find = static_credentials([("panda".to_string(), "bamboo".to_string())]);

        let credential = find("panda").unwrap();
        assert_eq!(credential.username, "panda");
        assert_eq!(credential.password, "bamboo");
        assert!(find("tiger").is_none());
    }
}
