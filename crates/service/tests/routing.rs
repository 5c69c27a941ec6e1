use std::{sync::Arc, thread};

use anyhow::Result;
use wshost_service::{ListenerPrefix, PrefixTable, RoutingError};

fn prefix(uri: &str) -> ListenerPrefix {
    uri.parse().expect("valid prefix")
}

#[test]
fn longest_path_wins() -> Result<()> {
    let table = PrefixTable::default();
    table.add(prefix("http://host:80/a/"), "a")?;
    table.add(prefix("http://host:80/a/b/"), "ab")?;

    assert_eq!(table.search("host", 80, "/a/b/c").map(|it| it.0), Some("ab"));
    assert_eq!(table.search("host", 80, "/a/b").map(|it| it.0), Some("ab"));
    assert_eq!(table.search("host", 80, "/a/c").map(|it| it.0), Some("a"));
    assert_eq!(table.search("host", 80, "/b/"), None);
    Ok(())
}

#[test]
fn wildcard_order() -> Result<()> {
    let table = PrefixTable::default();
    table.add(prefix("http://+:80/"), "all")?;
    assert_eq!(table.search("x", 80, "/p").map(|it| it.0), Some("all"));

    table.add(prefix("http://*:80/"), "unhandled")?;
    assert_eq!(table.search("x", 80, "/p").map(|it| it.0), Some("unhandled"));

    table.add(prefix("http://x:80/p/"), "exact")?;
    assert_eq!(table.search("x", 80, "/p").map(|it| it.0), Some("exact"));
    assert_eq!(table.search("y", 80, "/p").map(|it| it.0), Some("unhandled"));
    Ok(())
}

#[test]
fn conflicting_registrations() -> Result<()> {
    let table = PrefixTable::default();
    table.add(prefix("http://*:80/chat/"), 1)?;
    table.add(prefix("http://host:80/chat/"), 1)?;

    assert_eq!(
        table.add(prefix("http://*:80/chat/"), 2),
        Err(RoutingError::AlreadyInUse("http://*:80/chat/".to_string()))
    );

    // the same listener may register an exact prefix twice
    table.add(prefix("http://host:80/chat/"), 1)?;
    assert_eq!(
        table.add(prefix("http://HOST:80/chat/"), 2),
        Err(RoutingError::AnotherListener("http://host:80/chat/".to_string()))
    );

    Ok(())
}

#[test]
fn remove_only_own_prefixes() -> Result<()> {
    let table = PrefixTable::default();
    table.add(prefix("http://host:80/"), 1)?;
    table.add(prefix("http://*:80/"), 1)?;

    assert!(!table.remove(&prefix("http://host:80/"), &2));
    assert!(table.remove(&prefix("http://host:80/"), &1));
    assert!(!table.remove(&prefix("http://host:80/"), &1));
    assert!(!table.is_empty());

    assert!(table.remove(&prefix("http://*:80/"), &1));
    assert!(table.is_empty());
    Ok(())
}

#[test]
fn concurrent_registration_and_lookup() {
    let table = Arc::new(PrefixTable::default());
    let mut workers = Vec::new();

    for worker in 0..8 {
        let table = table.clone();
        workers.push(thread::spawn(move || {
            for i in 0..50 {
                let uri = format!("http://+:80/w{worker}/p{i}/");
                table.add(prefix(&uri), worker).expect("unique prefix");
                assert_eq!(
                    table.search("any", 80, &format!("/w{worker}/p{i}/x")).map(|it| it.0),
                    Some(worker)
                );
            }
        }));
    }

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(table.len(), 400);
}
