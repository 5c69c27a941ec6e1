//! The process wide registry of endpoints.
//!
//! Structural changes are serialized by one lock; routing never takes it,
//! since every endpoint answers lookups from its own prefix tables.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, LazyLock},
};

use ahash::{HashMap, HashMapExt};
use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;
use service::ListenerPrefix;

use super::{endpoint::EndPointListener, listener::HttpListener};

static ENDPOINTS: LazyLock<Mutex<HashMap<SocketAddr, Arc<EndPointListener>>>> =
    LazyLock::new(|| Mutex::new(HashMap::with_capacity(8)));

/// The address a prefix host listens on.
///
/// # Test
///
/// ```
/// use wshost::net::manager::resolve;
///
/// assert_eq!(resolve("*", 80).unwrap().to_string(), "0.0.0.0:80");
/// assert_eq!(resolve("localhost", 8080).unwrap().to_string(), "127.0.0.1:8080");
/// assert_eq!(resolve("[::1]", 443).unwrap().to_string(), "[::1]:443");
/// assert!(resolve("example.com", 80).is_err());
/// ```
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let ip = match host {
        "*" | "+" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        _ => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("the host of a prefix must be an address: host={host}"))?,
    };

    Ok(SocketAddr::new(ip, port))
}

fn endpoint_address(prefix: &ListenerPrefix) -> Result<SocketAddr> {
    let path = prefix.path();
    if path.contains('%') || path.contains("//") {
        bail!("invalid path in prefix: prefix={prefix}");
    }

    resolve(prefix.host(), prefix.port())
}

/// Registers every prefix of a listener. Either all of them are registered
/// or none.
pub fn add_listener(listener: &HttpListener) -> Result<()> {
    let mut endpoints = ENDPOINTS.lock();
    let prefixes = listener.prefixes();

    for (index, prefix) in prefixes.iter().enumerate() {
        if let Err(e) = register(&mut endpoints, prefix, listener) {
            for prefix in &prefixes[..index] {
                unregister(&mut endpoints, prefix, listener);
            }

            return Err(e);
        }
    }

    Ok(())
}

pub fn remove_listener(listener: &HttpListener) {
    let mut endpoints = ENDPOINTS.lock();
    for prefix in listener.prefixes() {
        unregister(&mut endpoints, &prefix, listener);
    }
}

pub fn add_prefix(prefix: &ListenerPrefix, listener: &HttpListener) -> Result<()> {
    register(&mut ENDPOINTS.lock(), prefix, listener)
}

pub fn remove_prefix(prefix: &ListenerPrefix, listener: &HttpListener) {
    unregister(&mut ENDPOINTS.lock(), prefix, listener);
}

/// The endpoint bound to an address, if any.
pub fn endpoint(address: &SocketAddr) -> Option<Arc<EndPointListener>> {
    ENDPOINTS.lock().get(address).cloned()
}

fn register(
    endpoints: &mut HashMap<SocketAddr, Arc<EndPointListener>>,
    prefix: &ListenerPrefix,
    listener: &HttpListener,
) -> Result<()> {
    let address = endpoint_address(prefix)?;
    let endpoint = match endpoints.get(&address) {
        Some(endpoint) => endpoint.clone(),
        None => {
            let endpoint = EndPointListener::bind(address, prefix.is_secure(), listener.options())?;
            endpoints.insert(address, endpoint.clone());
            endpoint
        }
    };

    if endpoint.is_secure() != prefix.is_secure() {
        bail!("invalid scheme for the endpoint: prefix={prefix}, address={address}");
    }

    if let Err(e) = endpoint.add_prefix(prefix.clone(), listener.clone()) {
        if endpoint.prefixes().is_empty() {
            endpoints.remove(&address);
            endpoint.close();
        }

        return Err(e.into());
    }

    Ok(())
}

fn unregister(
    endpoints: &mut HashMap<SocketAddr, Arc<EndPointListener>>,
    prefix: &ListenerPrefix,
    listener: &HttpListener,
) {
    let Ok(address) = endpoint_address(prefix) else {
        return;
    };

    if let Some(endpoint) = endpoints.get(&address).cloned() {
        if endpoint.remove_prefix(prefix, listener) {
            endpoints.remove(&address);
            endpoint.close();
        }
    }
}
