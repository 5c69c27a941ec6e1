//! HTTP Basic and Digest access authentication.
//!
//! [RFC2617]: https://tools.ietf.org/html/rfc2617
//!
//! The server sends a challenge in `WWW-Authenticate`, the client answers
//! with credentials in `Authorization`, and the server verifies them
//! against its stored password.

use std::fmt;

use base64::{Engine, prelude::BASE64_STANDARD};
use md5::{Digest, Md5};

use crate::{
    Error,
    crypto::{md5_hex, random_hex, to_hex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthenticationScheme {
    #[default]
    Anonymous,
    Basic,
    Digest,
}

impl AuthenticationScheme {
    fn parse(value: &str) -> Result<Self, Error> {
        if value.eq_ignore_ascii_case("basic") {
            Ok(Self::Basic)
        } else if value.eq_ignore_ascii_case("digest") {
            Ok(Self::Digest)
        } else {
            Err(Error::InvalidCredentials)
        }
    }
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anonymous => "Anonymous",
            Self::Basic => "Basic",
            Self::Digest => "Digest",
        })
    }
}

/// Authentication parameters, looked up case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(item) => item.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    /// Parses `k=v, k="quoted, value"` lists.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_codec::auth::Params;
    ///
    /// let params = Params::parse(r#"realm="a, b", qop="auth,auth-int", nc=00000001"#);
    ///
    /// assert_eq!(params.get("realm"), Some("a, b"));
    /// assert_eq!(params.get("QOP"), Some("auth,auth-int"));
    /// assert_eq!(params.get("nc"), Some("00000001"));
    /// ```
    pub fn parse(value: &str) -> Self {
        let mut items = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut escaped = false;

        for ch in value.chars() {
            match ch {
                _ if escaped => {
                    current.push(ch);
                    escaped = false;
                }
                '\\' if quoted => escaped = true,
                '"' => {
                    quoted = !quoted;
                    current.push(ch);
                }
                ',' if !quoted => items.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }

        items.push(current);

        Self(
            items
                .iter()
                .filter_map(|item| item.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), unquote(v.trim()).to_string()))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
        )
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkCredential {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
    pub roles: Vec<String>,
}

impl NetworkCredential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }
}

/// The `WWW-Authenticate` challenge.
///
/// # Test
///
/// ```
/// use wshost_codec::auth::AuthenticationChallenge;
///
/// assert_eq!(
///     AuthenticationChallenge::basic("SECRET AREA").to_string(),
///     "Basic realm=\"SECRET AREA\""
/// );
///
/// let digest = AuthenticationChallenge::digest("x").to_string();
/// assert!(digest.starts_with("Digest realm=\"x\", nonce=\""));
/// assert!(digest.ends_with(", algorithm=MD5, qop=\"auth\""));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationChallenge {
    pub scheme: AuthenticationScheme,
    pub params: Params,
}

impl AuthenticationChallenge {
    pub fn basic(realm: &str) -> Self {
        let mut params = Params::default();
        params.set("realm", realm);
        Self {
            scheme: AuthenticationScheme::Basic,
            params,
        }
    }

    /// A digest challenge with a fresh nonce, `algorithm=MD5` and
    /// `qop="auth"`.
    pub fn digest(realm: &str) -> Self {
        let mut params = Params::default();
        params.set("realm", realm);
        params.set("nonce", create_nonce());
        params.set("algorithm", "MD5");
        params.set("qop", "auth");
        Self {
            scheme: AuthenticationScheme::Digest,
            params,
        }
    }

    pub fn new(scheme: AuthenticationScheme, realm: &str) -> Self {
        match scheme {
            AuthenticationScheme::Digest => Self::digest(realm),
            _ => Self::basic(realm),
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        let (scheme, rest) = value.trim().split_once(' ').ok_or(Error::InvalidCredentials)?;
        Ok(Self {
            scheme: AuthenticationScheme::parse(scheme)?,
            params: Params::parse(rest),
        })
    }

    pub fn realm(&self) -> &str {
        self.params.get("realm").unwrap_or_default()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.params.get("nonce")
    }
}

impl fmt::Display for AuthenticationChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} realm=\"{}\"", self.scheme, self.realm())?;
        if self.scheme != AuthenticationScheme::Digest {
            return Ok(());
        }

        write!(f, ", nonce=\"{}\"", self.nonce().unwrap_or_default())?;
        for key in ["domain", "opaque"] {
            if let Some(value) = self.params.get(key) {
                write!(f, ", {key}=\"{value}\"")?;
            }
        }

        for key in ["stale", "algorithm"] {
            if let Some(value) = self.params.get(key) {
                write!(f, ", {key}={value}")?;
            }
        }

        if let Some(qop) = self.params.get("qop") {
            write!(f, ", qop=\"{qop}\"")?;
        }

        Ok(())
    }
}

/// The `Authorization` credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    pub scheme: AuthenticationScheme,
    pub params: Params,
}

impl AuthenticationResponse {
    pub fn basic(credential: &NetworkCredential) -> Self {
        let mut params = Params::default();
        params.set("username", &credential.username);
        params.set("password", &credential.password);
        Self {
            scheme: AuthenticationScheme::Basic,
            params,
        }
    }

    /// Answers a digest challenge.
    ///
    /// `previous_count` is the nonce count used for the last request with
    /// this nonce; the count sent is the next one, wrapping to zero.
    pub fn digest(
        challenge: &AuthenticationChallenge,
        credential: &NetworkCredential,
        method: &str,
        uri: &str,
        previous_count: u32,
    ) -> Self {
        let mut params = Params::default();
        params.set("username", &credential.username);
        params.set("realm", challenge.realm());
        params.set("nonce", challenge.nonce().unwrap_or_default());
        params.set("uri", uri);

        if let Some(algorithm) = challenge.params.get("algorithm") {
            params.set("algorithm", algorithm);
        }

        if let Some(opaque) = challenge.params.get("opaque") {
            params.set("opaque", opaque);
        }

        let offered = challenge.params.get("qop").unwrap_or_default();
        let qop = offered
            .split(',')
            .map(str::trim)
            .find(|qop| *qop == "auth")
            .or_else(|| offered.split(',').map(str::trim).find(|qop| *qop == "auth-int"));

        if let Some(qop) = qop {
            let count = if previous_count < u32::MAX {
                previous_count + 1
            } else {
                0
            };

            params.set("qop", qop);
            params.set("cnonce", create_nonce());
            params.set("nc", format!("{count:08x}"));
        }

        let response = create_request_digest(&params, &credential.password, method, &[]);
        params.set("response", response);

        Self {
            scheme: AuthenticationScheme::Digest,
            params,
        }
    }

    /// # Test
    ///
    /// ```
    /// use wshost_codec::auth::{AuthenticationResponse, AuthenticationScheme};
    ///
    /// let response = AuthenticationResponse::parse("Basic QUQxXG5vYm9keTpzZWNyZXQ=").unwrap();
    ///
    /// assert_eq!(response.scheme, AuthenticationScheme::Basic);
    /// assert_eq!(response.username(), Some("nobody"));
    /// assert_eq!(response.params.get("password"), Some("secret"));
    /// ```
    pub fn parse(value: &str) -> Result<Self, Error> {
        let (scheme, rest) = value.trim().split_once(' ').ok_or(Error::InvalidCredentials)?;
        let scheme = AuthenticationScheme::parse(scheme)?;

        let params = match scheme {
            AuthenticationScheme::Basic => {
                let decoded = BASE64_STANDARD
                    .decode(rest.trim())
                    .map_err(|_| Error::InvalidCredentials)?;

                let decoded = String::from_utf8(decoded).map_err(|_| Error::InvalidCredentials)?;
                let (username, password) = decoded.split_once(':').ok_or(Error::InvalidCredentials)?;

                // DOMAIN\user
                let username = username.rsplit('\\').next().unwrap_or(username);

                let mut params = Params::default();
                params.set("username", username);
                params.set("password", password);
                params
            }
            _ => Params::parse(rest),
        };

        Ok(Self { scheme, params })
    }

    pub fn username(&self) -> Option<&str> {
        self.params.get("username")
    }

    pub fn to_identity(&self) -> Option<Identity> {
        let name = self.username()?.to_string();
        match self.scheme {
            AuthenticationScheme::Basic => Some(Identity::Basic {
                name,
                password: self.params.get("password").unwrap_or_default().to_string(),
            }),
            AuthenticationScheme::Digest => Some(Identity::Digest(DigestIdentity {
                params: self.params.clone(),
            })),
            AuthenticationScheme::Anonymous => None,
        }
    }
}

impl fmt::Display for AuthenticationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let get = |key| self.params.get(key).unwrap_or_default();

        if self.scheme == AuthenticationScheme::Basic {
            let value = format!("{}:{}", get("username"), get("password"));
            return write!(f, "Basic {}", BASE64_STANDARD.encode(value));
        }

        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            get("username"),
            get("realm"),
            get("nonce"),
            get("uri"),
            get("response"),
        )?;

        if let Some(value) = self.params.get("algorithm") {
            write!(f, ", algorithm={value}")?;
        }

        if let Some(value) = self.params.get("qop") {
            write!(f, ", qop={value}, nc={}, cnonce=\"{}\"", get("nc"), get("cnonce"))?;
        }

        if let Some(value) = self.params.get("opaque") {
            write!(f, ", opaque=\"{value}\"")?;
        }

        Ok(())
    }
}

/// The identity a request authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Basic { name: String, password: String },
    Digest(DigestIdentity),
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Self::Basic { name, .. } => name,
            Self::Digest(identity) => identity.username(),
        }
    }

    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Self::Basic { .. } => AuthenticationScheme::Basic,
            Self::Digest(_) => AuthenticationScheme::Digest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestIdentity {
    params: Params,
}

impl DigestIdentity {
    pub fn username(&self) -> &str {
        self.params.get("username").unwrap_or_default()
    }

    pub fn realm(&self) -> &str {
        self.params.get("realm").unwrap_or_default()
    }

    pub fn nonce(&self) -> &str {
        self.params.get("nonce").unwrap_or_default()
    }

    pub fn uri(&self) -> &str {
        self.params.get("uri").unwrap_or_default()
    }

    pub fn response(&self) -> &str {
        self.params.get("response").unwrap_or_default()
    }

    pub fn qop(&self) -> Option<&str> {
        self.params.get("qop")
    }

    /// Recomputes the digest from the stored password and compares it with
    /// the one the client sent.
    pub fn is_valid(&self, password: &str, realm: &str, method: &str, entity: &[u8]) -> bool {
        let mut params = self.params.clone();
        params.set("realm", realm);

        create_request_digest(&params, password, method, entity) == self.response()
    }
}

/// 32 random hex digits.
pub fn create_nonce() -> String {
    random_hex()
}

/// Computes the `response` parameter of a digest authorization.
///
/// ```text
/// A1 = user:realm:password              (MD5)
/// A1 = MD5(user:realm:password):nonce:cnonce  (MD5-sess)
/// A2 = method:uri                       (qop=auth or absent)
/// A2 = method:uri:MD5(entity)           (qop=auth-int)
///
/// response = MD5(MD5(A1):nonce:nc:cnonce:qop:MD5(A2))   with qop
/// response = MD5(MD5(A1):nonce:MD5(A2))                 without qop
/// ```
///
/// # Test
///
/// ```
/// use wshost_codec::auth::{Params, create_request_digest};
///
/// let params = Params::parse(concat!(
///     r#"username="Mufasa", realm="testrealm@host.com", "#,
///     r#"nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", uri="/dir/index.html", "#,
///     r#"qop=auth, nc=00000001, cnonce="0a4f113b""#,
/// ));
///
/// assert_eq!(
///     create_request_digest(&params, "Circle Of Life", "GET", &[]),
///     "6629fae49393a05397450978507c4ef1"
/// );
/// ```
pub fn create_request_digest(params: &Params, password: &str, method: &str, entity: &[u8]) -> String {
    let get = |key| params.get(key).unwrap_or_default();
    let (username, realm, nonce, uri) = (get("username"), get("realm"), get("nonce"), get("uri"));
    let (cnonce, nc) = (get("cnonce"), get("nc"));

    let a1 = if get("algorithm").eq_ignore_ascii_case("md5-sess") {
        format!("{}:{nonce}:{cnonce}", md5_hex(&[username, realm, password]))
    } else {
        format!("{username}:{realm}:{password}")
    };

    let qop = params.get("qop");
    let a2 = if qop == Some("auth-int") {
        format!("{method}:{uri}:{}", to_hex(&Md5::digest(entity)))
    } else {
        format!("{method}:{uri}")
    };

    let (ha1, ha2) = (md5_hex(&[&a1]), md5_hex(&[&a2]));
    match qop {
        Some(qop) => md5_hex(&[&ha1, nonce, nc, cnonce, qop, &ha2]),
        None => md5_hex(&[&ha1, nonce, &ha2]),
    }
}
