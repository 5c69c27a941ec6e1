pub mod config;
pub mod handler;
pub mod net;
pub mod server;
pub mod websocket;

pub mod prelude {
    pub use codec::{
        CloseCode, Message, PayloadData,
        auth::{AuthenticationScheme, Identity, NetworkCredential},
        http::{HttpRequest, HttpResponse},
    };

    pub use service::{ReadyState, Session, SessionManager};

    pub use super::{
        net::{
            context::HttpContext,
            listener::{HttpHandler, HttpListener, ListenerOptions},
        },
        server::{ServerOptions, WebSocketServer, WebSocketServiceHost},
        websocket::{Behavior, CloseEvent, Role, WebSocket, WebSocketError, WebSocketOptions},
    };
}

use std::time::Duration;

use self::{
    config::Config,
    handler::{Echo, static_credentials},
    net::listener::ListenerOptions,
    server::{ServerOptions, WebSocketServer},
    websocket::WebSocketOptions,
};

pub(crate) static SOFTWARE: &str = concat!("wshost.", env!("CARGO_PKG_VERSION"));

/// Builds and starts the server a configuration describes.
///
/// Binds every configured prefix and serves the echo service on every
/// configured path. The binary and the integration tests both start here;
/// the returned server keeps running until stopped.
pub fn start_server(config: &Config) -> anyhow::Result<WebSocketServer> {
    let server = WebSocketServer::new(ServerOptions {
        listener: ListenerOptions {
            realm: config.server.realm.clone(),
            reuse_address: config.server.reuse_address,
            certificate_folder: config.server.certificate_folder.clone(),
            ssl: config.server.ssl.clone(),
            first_request_timeout: Duration::from_secs(config.server.first_request_timeout),
            reuse_timeout: Duration::from_secs(config.server.reuse_timeout),
        },
        authentication: config.server.authentication.as_scheme(),
        credentials: Some(static_credentials(config.auth.static_credentials.clone())),
        keep_clean: config.websocket.keep_clean,
    });

    for prefix in &config.server.prefixes {
        server.add_prefix(&prefix.to_string())?;
    }

    let options = WebSocketOptions {
        emit_on_ping: config.websocket.emit_on_ping,
        ignore_extensions: config.websocket.ignore_extensions,
        protocol: config.websocket.protocol.clone(),
        wait_time: config.wait_time(),
        ..Default::default()
    };

    for path in &config.websocket.services {
        server.add_service(path, options.clone(), || Echo)?;
    }

    server.start()?;

    log::info!(
        "{SOFTWARE} listening: prefixes={:?}, services={:?}",
        server.listener().prefixes(),
        server.service_paths()
    );

    Ok(server)
}
