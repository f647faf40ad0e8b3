use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use relmap::db::{Selector, retry};
use relmap::testing::MemoryDriver;
use relmap::{ClientOptions, DbError, Error};

fn configurations(aliases: &[&str]) -> HashMap<String, ClientOptions> {
    aliases
        .iter()
        .map(|alias| {
            (
                alias.to_string(),
                ClientOptions::new(format!("memory://{}", alias)),
            )
        })
        .collect()
}

/// Selector whose replica fails to ping and to close; `built` counts
/// constructed connections.
fn selector(aliases: &[&str], built: Arc<AtomicUsize>) -> Selector<MemoryDriver> {
    Selector::new(configurations(aliases), move |alias: &str, _: &ClientOptions| {
        built.fetch_add(1, Ordering::SeqCst);
        let driver = MemoryDriver::named(alias);
        Ok(if alias == "replica" {
            driver.failing_ping().failing_close()
        } else {
            driver
        })
    })
}

fn fail(reason: &str) -> Error {
    Error::Database(DbError::Driver(reason.to_string()))
}

#[test]
fn test_using_returns_same_connection() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master"], built.clone());

    let first = selector.using("master").unwrap();
    let second = selector.using("MASTER").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "master");
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(selector.connection_count(), 1);
}

#[test]
fn test_using_unknown_alias() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master"], built.clone());

    let err = selector.using("analytics").unwrap_err();
    assert_eq!(err.code(), "alias_not_found");
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn test_aliases_match_case_insensitively() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["Replica"], built);
    assert_eq!(selector.using("replica").unwrap().name(), "replica");
}

#[test]
fn test_concurrent_first_use_builds_one_connection() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master"], built.clone());

    let connections = std::thread::scope(|scope| {
        let handles = (0..16)
            .map(|_| scope.spawn(|| selector.using("master").unwrap()))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
}

#[tokio::test]
async fn test_retry_without_connections() {
    let mut calls = 0;
    let err = retry(
        |_conn: Arc<MemoryDriver>| {
            calls += 1;
            async { Ok(()) }
        },
        &[],
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "no_connections");
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn test_retry_falls_through_in_order() {
    let drivers = vec![
        Arc::new(MemoryDriver::named("a")),
        Arc::new(MemoryDriver::named("b")),
    ];
    let mut seen = Vec::new();

    let value = retry(
        |conn: Arc<MemoryDriver>| {
            seen.push(conn.name().to_string());
            async move {
                if conn.name() == "a" {
                    Err(fail("a is down"))
                } else {
                    Ok(42)
                }
            }
        },
        &drivers,
    )
    .await
    .unwrap();

    assert_eq!(value, 42);
    assert_eq!(seen, vec!["a", "b"]);
}

#[tokio::test]
async fn test_retry_returns_last_error() {
    let drivers = vec![
        Arc::new(MemoryDriver::named("a")),
        Arc::new(MemoryDriver::named("b")),
    ];

    let err = retry(
        |conn: Arc<MemoryDriver>| async move {
            if conn.name() == "a" {
                Err::<(), _>(Error::Database(DbError::Temporary))
            } else {
                Err(fail("b is down"))
            }
        },
        &drivers,
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "driver_error");
    assert!(err.to_string().contains("b is down"));
}

#[tokio::test]
async fn test_retry_aliases_skips_unresolved() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master"], built);
    let mut seen = Vec::new();

    selector
        .retry_aliases(
            |conn| {
                seen.push(conn.name().to_string());
                async { Ok(()) }
            },
            &["missing", "master"],
        )
        .await
        .unwrap();

    assert_eq!(seen, vec!["master"]);
}

#[tokio::test]
async fn test_retry_master_prefers_replica() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master", "replica"], built);
    let mut seen = Vec::new();

    let name = selector
        .retry_master(|conn| {
            seen.push(conn.name().to_string());
            async move { Ok(conn.name().to_string()) }
        })
        .await
        .unwrap();

    assert_eq!(name, "replica");
    assert_eq!(seen, vec!["replica"]);
}

#[tokio::test]
async fn test_ping_fails_over_to_master() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master", "replica"], built);

    selector.ping().await.unwrap();

    assert_eq!(selector.using("replica").unwrap().pings(), 1);
    assert_eq!(selector.using("master").unwrap().pings(), 1);
}

#[tokio::test]
async fn test_ping_without_connections() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&[], built);
    let err = selector.ping().await.unwrap_err();
    assert_eq!(err.code(), "no_connections");
}

#[tokio::test]
async fn test_close_collects_errors_and_resets() {
    let built = Arc::new(AtomicUsize::new(0));
    let selector = selector(&["master", "replica"], built.clone());
    let master = selector.using("master").unwrap();
    let replica = selector.using("replica").unwrap();

    let errors = selector.close().await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), "driver_error");
    assert_eq!(master.closes(), 1);
    assert_eq!(replica.closes(), 1);
    assert_eq!(selector.connection_count(), 0);

    let reopened = selector.using("master").unwrap();
    assert!(!Arc::ptr_eq(&reopened, &master));
    assert_eq!(built.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_with_driver_seeds_master() {
    let selector = Selector::with_driver(MemoryDriver::named("primary"));

    assert_eq!(selector.using("master").unwrap().name(), "primary");
    assert_eq!(
        selector.using("replica").unwrap_err().code(),
        "alias_not_found"
    );
    selector.ping().await.unwrap();
}
