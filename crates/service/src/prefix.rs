use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefixError {
    #[error("the prefix is empty")]
    Empty,
    #[error("the scheme isn't 'http' or 'https': {0}")]
    InvalidScheme(String),
    #[error("no host is specified: {0}")]
    NoHost(String),
    #[error("no port is specified: {0}")]
    NoPort(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("no path is specified: {0}")]
    NoPath(String),
    #[error("the prefix doesn't end with '/': {0}")]
    NoTrailingSlash(String),
}

/// A URI prefix a listener serves, `http[s]://host[:port]/path/`.
///
/// Two prefixes are equal when their canonical forms are equal; the
/// canonical form always carries the port.
///
/// # Test
///
/// ```
/// use wshost_service::prefix::ListenerPrefix;
///
/// let prefix: ListenerPrefix = "https://Example.com/chat/".parse().unwrap();
///
/// assert!(prefix.is_secure());
/// assert_eq!(prefix.host(), "example.com");
/// assert_eq!(prefix.port(), 443);
/// assert_eq!(prefix.path(), "/chat/");
/// assert_eq!(prefix.to_string(), "https://example.com:443/chat/");
/// assert_eq!(prefix, "https://example.com:443/chat/".parse().unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct ListenerPrefix {
    host: String,
    port: u16,
    path: String,
    secure: bool,
    canonical: String,
}

impl ListenerPrefix {
    pub fn parse(uri: &str) -> Result<Self, PrefixError> {
        if uri.is_empty() {
            return Err(PrefixError::Empty);
        }

        let (secure, rest) = if let Some(rest) = strip_prefix_ignore_case(uri, "https://") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(uri, "http://") {
            (false, rest)
        } else {
            return Err(PrefixError::InvalidScheme(uri.to_string()));
        };

        if !uri.ends_with('/') {
            return Err(PrefixError::NoTrailingSlash(uri.to_string()));
        }

        let root = rest
            .find('/')
            .ok_or_else(|| PrefixError::NoPath(uri.to_string()))?;

        let authority = &rest[..root];
        let path = &rest[root..];

        // [v6]:port
        let host_end = if authority.starts_with('[') {
            authority
                .find(']')
                .map(|i| i + 1)
                .ok_or_else(|| PrefixError::NoHost(uri.to_string()))?
        } else {
            authority.find(':').unwrap_or(authority.len())
        };

        let host = &authority[..host_end];
        if host.is_empty() {
            return Err(PrefixError::NoHost(uri.to_string()));
        }

        let port = match &authority[host_end..] {
            "" => {
                if secure {
                    443
                } else {
                    80
                }
            }
            ":" => return Err(PrefixError::NoPort(uri.to_string())),
            value => match value.strip_prefix(':').map(str::parse::<u16>) {
                Some(Ok(port)) if port > 0 => port,
                _ => return Err(PrefixError::InvalidPort(uri.to_string())),
            },
        };

        let host = host.to_ascii_lowercase();
        let canonical = format!(
            "{}://{host}:{port}{path}",
            if secure { "https" } else { "http" }
        );

        Ok(Self {
            host,
            port,
            path: path.to_string(),
            secure,
            canonical,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host `*`: every host name, tried after the exact hosts.
    pub fn is_unhandled_wildcard(&self) -> bool {
        self.host == "*"
    }

    /// Host `+`: any host, tried last.
    pub fn is_all_wildcard(&self) -> bool {
        self.host == "+"
    }

    /// Whether the request path falls under this prefix, either as is or
    /// with a trailing slash appended.
    pub fn matches_path(&self, path: &str) -> bool {
        path.starts_with(&self.path)
            || (path.len() + 1 == self.path.len()
                && self.path.starts_with(path)
                && self.path.ends_with('/'))
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => value.get(prefix.len()..),
        _ => None,
    }
}

impl PartialEq for ListenerPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ListenerPrefix {}

impl Hash for ListenerPrefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl FromStr for ListenerPrefix {
    type Err = PrefixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for ListenerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ListenerPrefix {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ListenerPrefix {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(ListenerPrefix::parse("http://*/").unwrap().port(), 80);
        assert_eq!(ListenerPrefix::parse("https://+/").unwrap().port(), 443);
        assert_eq!(ListenerPrefix::parse("http://h:8080/a/").unwrap().port(), 8080);
    }

    #[test]
    fn invalid_prefixes() {
        let cases = [
            ("", PrefixError::Empty),
            ("ftp://h/", PrefixError::InvalidScheme("ftp://h/".into())),
            ("http:///", PrefixError::NoHost("http:///".into())),
            ("http://h:/", PrefixError::NoPort("http://h:/".into())),
            ("http://h:0/", PrefixError::InvalidPort("http://h:0/".into())),
            ("http://h:x/", PrefixError::InvalidPort("http://h:x/".into())),
            ("http://h/a", PrefixError::NoTrailingSlash("http://h/a".into())),
        ];

        for (uri, error) in cases {
            assert_eq!(ListenerPrefix::parse(uri).unwrap_err(), error, "{uri}");
        }
    }

    #[test]
    fn multibyte_input_is_rejected() {
        for uri in ["httpxyé/", "é", "httpsé://h/", "http://h:é/"] {
            assert!(ListenerPrefix::parse(uri).is_err(), "{uri}");
        }

        assert_eq!(
            ListenerPrefix::parse("httpxyé/").unwrap_err(),
            PrefixError::InvalidScheme("httpxyé/".into())
        );
    }

    #[test]
    fn ipv6_host() {
        let prefix = ListenerPrefix::parse("http://[::1]:9000/").unwrap();
        assert_eq!(prefix.host(), "[::1]");
        assert_eq!(prefix.port(), 9000);
    }

    #[test]
    fn path_matching() {
        let prefix = ListenerPrefix::parse("http://h/a/b/").unwrap();

        assert!(prefix.matches_path("/a/b/"));
        assert!(prefix.matches_path("/a/b/c"));
        assert!(prefix.matches_path("/a/b"));
        assert!(!prefix.matches_path("/a/bc"));
        assert!(!prefix.matches_path("/a/"));
    }
}
