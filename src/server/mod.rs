//! A WebSocket server: one listener whose requests are dispatched to the
//! service registered on their path.

pub mod host;

use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use anyhow::{Result, bail};
use async_trait::async_trait;
use codec::{
    CloseCode,
    auth::{AuthenticationScheme, NetworkCredential},
    http::HttpRequest,
};
use parking_lot::RwLock;

pub use self::host::WebSocketServiceHost;

use crate::{
    net::{
        context::HttpContext,
        listener::{HttpHandler, HttpListener, ListenerOptions},
        percent_decode,
    },
    websocket::{Behavior, WebSocketOptions},
};

pub type CredentialFinder = Arc<dyn Fn(&str) -> Option<NetworkCredential> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServerOptions {
    pub listener: ListenerOptions,
    pub authentication: AuthenticationScheme,
    pub credentials: Option<CredentialFinder>,
    /// Sweep sessions that stop answering pings.
    pub keep_clean: bool,
}

#[derive(Default)]
struct Services {
    hosts: RwLock<HashMap<String, Arc<WebSocketServiceHost>>>,
    http: RwLock<Option<Arc<dyn HttpHandler>>>,
    started: RwLock<bool>,
}

/// Service paths are compared without a trailing slash.
///
/// # Test
///
/// ```
/// use wshost::server::normalize_path;
///
/// assert_eq!(normalize_path("/chat/"), "/chat");
/// assert_eq!(normalize_path("/"), "/");
/// ```
pub fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        path => path,
    }
}

struct Dispatcher {
    services: Arc<Services>,
    authentication: AuthenticationScheme,
    credentials: Option<CredentialFinder>,
}

#[async_trait]
impl HttpHandler for Dispatcher {
    async fn handle(&self, context: &mut HttpContext) -> Result<()> {
        if !context.is_websocket_request() {
            let http = self.services.http.read().clone();
            if let Some(http) = http {
                return http.handle(context).await;
            }

            if let Some(head) = context.response_mut() {
                head.headers.set("Upgrade", "websocket");
            }

            context.send_error(426, None).await?;
            return Ok(());
        }

        let path = percent_decode(context.url.path()).into_owned();
        let host = self
            .services
            .hosts
            .read()
            .get(normalize_path(&path))
            .cloned();

        match host {
            Some(host) => host.start_session(context).await,
            None => {
                log::debug!("no websocket service: path={path}");
                context.send_error(501, None).await?;
                Ok(())
            }
        }
    }

    fn authentication_scheme(&self, _: &HttpRequest) -> AuthenticationScheme {
        self.authentication
    }

    async fn find_credential(&self, username: &str) -> Option<NetworkCredential> {
        self.credentials.as_ref().and_then(|find| find(username))
    }
}

pub struct WebSocketServer {
    listener: HttpListener,
    services: Arc<Services>,
    keep_clean: bool,
}

impl WebSocketServer {
    pub fn new(options: ServerOptions) -> Self {
        let services = Arc::new(Services::default());
        let listener = HttpListener::new(
            options.listener,
            Dispatcher {
                services: services.clone(),
                authentication: options.authentication,
                credentials: options.credentials,
            },
        );

        Self {
            keep_clean: options.keep_clean,
            listener,
            services,
        }
    }

    pub fn listener(&self) -> &HttpListener {
        &self.listener
    }

    pub fn add_prefix(&self, prefix: &str) -> Result<()> {
        self.listener.add_prefix(prefix)
    }

    /// Serves requests that do not ask for a WebSocket.
    pub fn set_http_handler<H>(&self, handler: H)
    where
        H: HttpHandler,
    {
        *self.services.http.write() = Some(Arc::new(handler));
    }

    /// Adds a service. On a running server it accepts sessions right away.
    pub fn add_service<F, B>(&self, path: &str, options: WebSocketOptions, factory: F) -> Result<()>
    where
        F: Fn() -> B + Send + Sync + 'static,
        B: Behavior,
    {
        if !path.starts_with('/') || path.contains(['?', '#']) {
            bail!("invalid service path: path={path}");
        }

        let path = normalize_path(path);
        let mut hosts = self.services.hosts.write();
        if hosts.contains_key(path) {
            bail!("service path already in use: path={path}");
        }

        let host = Arc::new(WebSocketServiceHost::new(path, options, self.keep_clean, factory));
        if *self.services.started.read() {
            host.start();
        }

        hosts.insert(path.to_string(), host);
        log::info!("service added: path={path}");
        Ok(())
    }

    /// Removes a service, closing its sessions with `AWAY`.
    pub async fn remove_service(&self, path: &str) -> bool {
        let host = self.services.hosts.write().remove(normalize_path(path));
        match host {
            Some(host) => {
                host.stop(CloseCode::AWAY, "").await;
                true
            }
            None => false,
        }
    }

    pub fn service(&self, path: &str) -> Option<Arc<WebSocketServiceHost>> {
        self.services.hosts.read().get(normalize_path(path)).cloned()
    }

    pub fn service_paths(&self) -> Vec<String> {
        self.services.hosts.read().keys().cloned().collect()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_listening()
    }

    /// Starts the services and binds the prefixes.
    pub fn start(&self) -> Result<()> {
        {
            let mut started = self.services.started.write();
            if !*started {
                for host in self.services.hosts.read().values() {
                    host.start();
                }

                *started = true;
            }
        }

        self.listener.start()
    }

    /// Closes every session, then stops listening.
    pub async fn stop(&self, code: CloseCode, reason: &str) {
        let hosts = self
            .services
            .hosts
            .read()
            .values()
            .cloned()
            .collect::<Vec<_>>();

        for host in hosts {
            host.stop(code, reason).await;
        }

        self.listener.stop();
    }
}
