use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use anyhow::Result;
use async_trait::async_trait;
use codec::{
    auth::{AuthenticationChallenge, AuthenticationScheme, Identity, NetworkCredential},
    http::{HttpRequest, HttpResponse},
};
use parking_lot::{Mutex, RwLock};
use service::ListenerPrefix;

use super::{ConnectionHandle, context::HttpContext, manager};
use crate::config::Ssl;

/// What a listener does with the requests routed to it.
#[async_trait]
#[allow(unused_variables)]
pub trait HttpHandler: Send + Sync + 'static {
    async fn handle(&self, context: &mut HttpContext) -> Result<()>;

    /// The scheme a request must authenticate with.
    fn authentication_scheme(&self, request: &HttpRequest) -> AuthenticationScheme {
        AuthenticationScheme::Anonymous
    }

    /// Looks up the stored credential of a user.
    async fn find_credential(&self, username: &str) -> Option<NetworkCredential> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub realm: String,
    pub reuse_address: bool,
    /// Where `{port}.cer` and `{port}.key` are looked up for secure
    /// prefixes.
    pub certificate_folder: Option<PathBuf>,
    /// Used when the folder has no certificate for the port.
    pub ssl: Option<Ssl>,
    /// Idle budget of a fresh connection.
    pub first_request_timeout: Duration,
    /// Idle budget between keep-alive requests.
    pub reuse_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            realm: "SECRET AREA".to_string(),
            reuse_address: false,
            certificate_folder: None,
            ssl: None,
            first_request_timeout: Duration::from_secs(90),
            reuse_timeout: Duration::from_secs(15),
        }
    }
}

struct Inner {
    prefixes: RwLock<Vec<ListenerPrefix>>,
    options: ListenerOptions,
    handler: Arc<dyn HttpHandler>,
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    listening: AtomicBool,
}

/// A logical listener: a set of prefixes served by one handler.
///
/// Several listeners can share an endpoint; the endpoint routes every
/// request to the listener with the best matching prefix.
#[derive(Clone)]
pub struct HttpListener(Arc<Inner>);

impl PartialEq for HttpListener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HttpListener {
    pub fn new<H>(options: ListenerOptions, handler: H) -> Self
    where
        H: HttpHandler,
    {
        Self(Arc::new(Inner {
            prefixes: RwLock::new(Vec::new()),
            connections: Mutex::new(HashMap::with_capacity(64)),
            listening: AtomicBool::new(false),
            handler: Arc::new(handler),
            options,
        }))
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.0.options
    }

    pub fn handler(&self) -> &dyn HttpHandler {
        self.0.handler.as_ref()
    }

    pub fn prefixes(&self) -> Vec<ListenerPrefix> {
        self.0.prefixes.read().clone()
    }

    pub fn is_listening(&self) -> bool {
        self.0.listening.load(Ordering::Acquire)
    }

    /// Adds a prefix. A running listener starts serving it right away.
    pub fn add_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = ListenerPrefix::parse(prefix)?;
        if self.0.prefixes.read().contains(&prefix) {
            return Ok(());
        }

        if self.is_listening() {
            manager::add_prefix(&prefix, self)?;
        }

        self.0.prefixes.write().push(prefix);
        Ok(())
    }

    pub fn remove_prefix(&self, prefix: &str) -> Result<bool> {
        let prefix = ListenerPrefix::parse(prefix)?;
        let removed = {
            let mut prefixes = self.0.prefixes.write();
            let size = prefixes.len();
            prefixes.retain(|it| *it != prefix);
            size != prefixes.len()
        };

        if removed && self.is_listening() {
            manager::remove_prefix(&prefix, self);
        }

        Ok(removed)
    }

    /// Registers every prefix with its endpoint, binding the sockets that
    /// are not open yet. Either all prefixes are registered or none.
    pub fn start(&self) -> Result<()> {
        if self.0.listening.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = manager::add_listener(self) {
            self.0.listening.store(false, Ordering::Release);
            return Err(e);
        }

        log::info!("listener started: prefixes={:?}", self.prefixes());
        Ok(())
    }

    /// Unregisters every prefix and closes the connections the listener
    /// is serving.
    pub fn stop(&self) {
        if !self.0.listening.swap(false, Ordering::AcqRel) {
            return;
        }

        manager::remove_listener(self);

        let connections = std::mem::take(&mut *self.0.connections.lock());
        for handle in connections.values() {
            handle.close();
        }

        log::info!(
            "listener stopped: prefixes={:?}, connections={}",
            self.prefixes(),
            connections.len()
        );
    }

    pub(crate) fn register_connection(&self, handle: &ConnectionHandle) {
        self.0.connections.lock().insert(handle.id, handle.clone());
    }

    pub(crate) fn unregister_connection(&self, id: u64) {
        self.0.connections.lock().remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.0.connections.lock().len()
    }

    /// Checks the credentials of a request against the handler's scheme.
    ///
    /// Returns the identity of the user, `None` for anonymous requests, or
    /// the 401 response carrying a fresh challenge.
    pub async fn authenticate(&self, request: &HttpRequest) -> Result<Option<Identity>, HttpResponse> {
        let scheme = self.0.handler.authentication_scheme(request);
        if scheme == AuthenticationScheme::Anonymous {
            return Ok(None);
        }

        let realm = &self.0.options.realm;
        let challenge = || HttpResponse::unauthorized(&AuthenticationChallenge::new(scheme, realm));

        let identity = request
            .authorization()
            .filter(|response| response.scheme == scheme)
            .and_then(|response| response.to_identity())
            .ok_or_else(challenge)?;

        let credential = self
            .0
            .handler
            .find_credential(identity.name())
            .await
            .ok_or_else(challenge)?;

        let valid = match &identity {
            Identity::Basic { password, .. } => *password == credential.password,
            // Only `qop=auth` is offered. The body is still on the wire here,
            // so an `auth-int` digest could not be checked.
            Identity::Digest(digest) if digest.qop() == Some("auth-int") => false,
            Identity::Digest(digest) => digest.is_valid(&credential.password, realm, &request.method, &[]),
        };

        if !valid {
            log::warn!("authentication failed: user={}, scheme={scheme}", identity.name());
            return Err(challenge());
        }

        Ok(Some(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use codec::auth::AuthenticationResponse;

    struct Protected(AuthenticationScheme);

    #[async_trait]
    impl HttpHandler for Protected {
        async fn handle(&self, _: &mut HttpContext) -> Result<()> {
            Ok(())
        }

        fn authentication_scheme(&self, _: &HttpRequest) -> AuthenticationScheme {
            self.0
        }

        async fn find_credential(&self, username: &str) -> Option<NetworkCredential> {
            (username == "panda").then(|| NetworkCredential::new("panda", "bamboo"))
        }
    }

    fn request(authorization: Option<String>) -> HttpRequest {
        let mut request = HttpRequest::new("GET", "/private/");
        if let Some(value) = authorization {
            request.headers.add("Authorization", value);
        }

        request
    }

    #[tokio::test]
    async fn basic_authentication() {
        let listener = HttpListener::new(ListenerOptions::default(), Protected(AuthenticationScheme::Basic));

        let rejected = listener.authenticate(&request(None)).await.unwrap_err();
        assert_eq!(rejected.status, 401);
        assert_eq!(
            rejected.headers.get("WWW-Authenticate"),
            Some("Basic realm=\"SECRET AREA\"")
        );

        let wrong = AuthenticationResponse::basic(&NetworkCredential::new("panda", "leaves"));
        assert!(listener.authenticate(&request(Some(wrong.to_string()))).await.is_err());

        let right = AuthenticationResponse::basic(&NetworkCredential::new("panda", "bamboo"));
        let identity = listener
            .authenticate(&request(Some(right.to_string())))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(identity.name(), "panda");
    }

    #[tokio::test]
    async fn digest_authentication() {
        let listener = HttpListener::new(ListenerOptions::default(), Protected(AuthenticationScheme::Digest));

        let rejected = listener.authenticate(&request(None)).await.unwrap_err();
        let challenge = AuthenticationChallenge::parse(rejected.headers.get("WWW-Authenticate").unwrap()).unwrap();
        assert_eq!(challenge.scheme, AuthenticationScheme::Digest);

        let answer = AuthenticationResponse::digest(
            &challenge,
            &NetworkCredential::new("panda", "bamboo"),
            "GET",
            "/private/",
            0,
        );

        let identity = listener
            .authenticate(&request(Some(answer.to_string())))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(identity.scheme(), AuthenticationScheme::Digest);
    }

    #[tokio::test]
    async fn digest_with_integrity_is_refused() {
        let listener = HttpListener::new(ListenerOptions::default(), Protected(AuthenticationScheme::Digest));

        let rejected = listener.authenticate(&request(None)).await.unwrap_err();
        let mut challenge =
            AuthenticationChallenge::parse(rejected.headers.get("WWW-Authenticate").unwrap()).unwrap();
        challenge.params.set("qop", "auth-int");

        let answer = AuthenticationResponse::digest(
            &challenge,
            &NetworkCredential::new("panda", "bamboo"),
            "GET",
            "/private/",
            0,
        );
        assert!(answer.to_string().contains("qop=auth-int"));

        let rejected = listener
            .authenticate(&request(Some(answer.to_string())))
            .await
            .unwrap_err();
        assert_eq!(rejected.status, 401);
    }

    #[tokio::test]
    async fn anonymous_needs_nothing() {
        let listener = HttpListener::new(ListenerOptions::default(), Protected(AuthenticationScheme::Anonymous));
        assert_eq!(listener.authenticate(&request(None)).await, Ok(None));
    }
}
