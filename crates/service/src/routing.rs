use std::{net::IpAddr, sync::Arc};

use ahash::{HashMap, HashMapExt};
use parking_lot::RwLock;

use crate::prefix::ListenerPrefix;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("the prefix is already in use: {0}")]
    AlreadyInUse(String),
    #[error("there's another listener for {0}")]
    AnotherListener(String),
}

/// A value that is replaced as a whole instead of being mutated.
///
/// Readers clone the current `Arc` and work on it without holding any lock;
/// writers build a new value from the one they loaded and install it only
/// if nobody replaced it in the meantime, retrying otherwise.
///
/// # Test
///
/// ```
/// use std::sync::Arc;
/// use wshost_service::routing::Snapshot;
///
/// let snapshot = Snapshot::new(vec![1]);
/// let current = snapshot.load();
///
/// assert!(snapshot.compare_and_swap(&current, Arc::new(vec![1, 2])));
/// // stale
/// assert!(!snapshot.compare_and_swap(&current, Arc::new(vec![3])));
/// assert_eq!(*snapshot.load(), vec![1, 2]);
/// ```
pub struct Snapshot<T>(RwLock<Arc<T>>);

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self(RwLock::new(Arc::new(value)))
    }

    pub fn load(&self) -> Arc<T> {
        self.0.read().clone()
    }

    /// Installs `new` if the current value is still `current`.
    pub fn compare_and_swap(&self, current: &Arc<T>, new: Arc<T>) -> bool {
        let mut value = self.0.write();
        if Arc::ptr_eq(&value, current) {
            *value = new;
            true
        } else {
            false
        }
    }

    /// Read-copy-update loop.
    ///
    /// `update` receives the current value and returns the replacement, or
    /// an error to leave the value untouched.
    pub fn update<E>(&self, mut update: impl FnMut(&T) -> Result<T, E>) -> Result<(), E> {
        loop {
            let current = self.load();
            let new = Arc::new(update(&current)?);
            if self.compare_and_swap(&current, new) {
                return Ok(());
            }
        }
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

type Special<L> = Vec<(ListenerPrefix, L)>;

/// Prefix tables of one endpoint.
///
/// Exact hosts live in a map, `*` and `+` hosts in two lists. Each table is
/// a [`Snapshot`], so routing never waits for a registration.
pub struct PrefixTable<L> {
    exact: Snapshot<HashMap<ListenerPrefix, L>>,
    unhandled: Snapshot<Special<L>>,
    all: Snapshot<Special<L>>,
}

impl<L> Default for PrefixTable<L> {
    fn default() -> Self {
        Self {
            exact: Snapshot::new(HashMap::new()),
            unhandled: Snapshot::new(Vec::new()),
            all: Snapshot::new(Vec::new()),
        }
    }
}

impl<L> PrefixTable<L>
where
    L: Clone + PartialEq,
{
    /// Registers a prefix for a listener.
    ///
    /// A wildcard path may only be registered once; an exact prefix may be
    /// registered again by the same listener but not by another one.
    pub fn add(&self, prefix: ListenerPrefix, listener: L) -> Result<(), RoutingError> {
        if let Some(table) = self.special(&prefix) {
            return table.update(|list| {
                if list.iter().any(|(p, _)| p.path() == prefix.path()) {
                    return Err(RoutingError::AlreadyInUse(prefix.to_string()));
                }

                let mut list = list.clone();
                list.push((prefix.clone(), listener.clone()));
                Ok(list)
            });
        }

        self.exact.update(|map| {
            if let Some(current) = map.get(&prefix) {
                if *current != listener {
                    return Err(RoutingError::AnotherListener(prefix.to_string()));
                }
            }

            let mut map = map.clone();
            map.insert(prefix.clone(), listener.clone());
            Ok(map)
        })
    }

    /// Removes a prefix registered by the listener. Returns whether it was
    /// present.
    pub fn remove(&self, prefix: &ListenerPrefix, listener: &L) -> bool {
        let mut removed = false;

        let _ = match self.special(prefix) {
            Some(table) => table.update(|list| {
                removed = false;

                let mut list = list.clone();
                list.retain(|(p, l)| {
                    let matched = p.path() == prefix.path() && l == listener;
                    removed |= matched;
                    !matched
                });

                Ok::<_, ()>(list)
            }),
            None => self.exact.update(|map| {
                removed = false;

                let mut map = map.clone();
                if map.get(prefix) == Some(listener) {
                    map.remove(prefix);
                    removed = true;
                }

                Ok::<_, ()>(map)
            }),
        };

        removed
    }

    pub fn is_empty(&self) -> bool {
        self.exact.load().is_empty() && self.unhandled.load().is_empty() && self.all.load().is_empty()
    }

    pub fn len(&self) -> usize {
        self.exact.load().len() + self.unhandled.load().len() + self.all.load().len()
    }

    /// Every registered prefix with its listener.
    pub fn entries(&self) -> Vec<(ListenerPrefix, L)> {
        let mut entries = self
            .exact
            .load()
            .iter()
            .map(|(p, l)| (p.clone(), l.clone()))
            .collect::<Vec<_>>();

        entries.extend(self.unhandled.load().iter().cloned());
        entries.extend(self.all.load().iter().cloned());
        entries
    }

    /// Finds the listener for a request.
    ///
    /// Exact hosts are tried first, matching the port and the longest path;
    /// host names are only compared when both sides are DNS names. Then the
    /// `*` list and finally the `+` list are searched by path alone.
    ///
    /// # Test
    ///
    /// ```
    /// use wshost_service::routing::PrefixTable;
    ///
    /// let table = PrefixTable::default();
    /// table.add("http://example.com:80/a/".parse().unwrap(), "a").unwrap();
    /// table.add("http://example.com:80/a/b/".parse().unwrap(), "ab").unwrap();
    /// table.add("http://*:80/".parse().unwrap(), "fallback").unwrap();
    ///
    /// assert_eq!(table.search("example.com", 80, "/a/b/c").map(|it| it.0), Some("ab"));
    /// assert_eq!(table.search("example.com", 80, "/a/x").map(|it| it.0), Some("a"));
    /// assert_eq!(table.search("other.com", 80, "/a/b/c").map(|it| it.0), Some("fallback"));
    /// ```
    pub fn search(&self, host: &str, port: u16, path: &str) -> Option<(L, ListenerPrefix)> {
        let host = host.to_ascii_lowercase();
        let host_is_dns = is_dns_name(&host);

        let exact = self.exact.load();
        let best = exact
            .iter()
            .filter(|(prefix, _)| {
                !(host_is_dns && is_dns_name(prefix.host()) && prefix.host() != host)
            })
            .filter(|(prefix, _)| prefix.port() == port && prefix.matches_path(path))
            .max_by_key(|(prefix, _)| prefix.path().len());

        if let Some((prefix, listener)) = best {
            return Some((listener.clone(), prefix.clone()));
        }

        search_special(&self.unhandled.load(), path).or_else(|| search_special(&self.all.load(), path))
    }

    fn special(&self, prefix: &ListenerPrefix) -> Option<&Snapshot<Special<L>>> {
        if prefix.is_unhandled_wildcard() {
            Some(&self.unhandled)
        } else if prefix.is_all_wildcard() {
            Some(&self.all)
        } else {
            None
        }
    }
}

fn search_special<L: Clone>(list: &Special<L>, path: &str) -> Option<(L, ListenerPrefix)> {
    list.iter()
        .filter(|(prefix, _)| prefix.matches_path(path))
        .max_by_key(|(prefix, _)| prefix.path().len())
        .map(|(prefix, listener)| (listener.clone(), prefix.clone()))
}

fn is_dns_name(host: &str) -> bool {
    !host.is_empty()
        && host != "*"
        && host != "+"
        && !host.starts_with('[')
        && host.parse::<IpAddr>().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(uri: &str) -> ListenerPrefix {
        uri.parse().unwrap()
    }

    #[test]
    fn ip_hosts_skip_the_host_comparison() {
        let table = PrefixTable::default();
        table.add(prefix("http://example.com:8080/"), 1).unwrap();

        assert_eq!(table.search("127.0.0.1", 8080, "/").map(|it| it.0), Some(1));
        assert_eq!(table.search("example.com", 8081, "/"), None);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let table = PrefixTable::default();
        table.add(prefix("http://+:80/"), 1).unwrap();

        let before = table.all.load();
        assert!(table.remove(&prefix("http://+:80/"), &1));

        assert_eq!(before.len(), 1);
        assert!(table.is_empty());
    }
}
