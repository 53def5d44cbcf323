//! Concurrent stress tests for the pool.
//!
//! Run with: cargo test -p connpool-testing --test stress

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use connpool::Connector;
use connpool_testing::{PoolFixture, init_tracing};
use parking_lot::Mutex;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_no_connection_held_twice() {
    init_tracing();
    let fx = PoolFixture::new(5);
    let holders: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
    let success_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    // Spawn 50 concurrent tasks against 5 connections
    for _ in 0..50 {
        let fx = fx.clone();
        let holders = holders.clone();
        let success_count = success_count.clone();

        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                let conn = fx.pool.checkout().await.expect("checkout failed");
                let serial = conn.serial();
                assert!(
                    holders.lock().insert(serial),
                    "connection {serial} handed to two callers"
                );

                tokio::task::yield_now().await;

                assert!(holders.lock().remove(&serial));
                if let Some(extra) = fx.pool.check_in(conn).await {
                    fx.connector.close(extra).await.unwrap();
                }
                success_count.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    assert_eq!(success_count.load(Ordering::Relaxed), 500);

    let snapshot = fx.assert_invariants(0).await;
    assert!(snapshot.in_use.is_empty());
    assert_eq!(fx.connector.live(), snapshot.free.len());

    let metrics = fx.pool.metrics();
    assert_eq!(metrics.checkouts_successful, 500);
    assert_eq!(metrics.checkouts_failed, 0);
    assert_eq!(metrics.connections_abandoned, 0);
    assert_eq!(
        metrics.checkins_returned + metrics.checkins_dropped,
        metrics.checkouts_successful
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_with_slow_connector_and_flaky_connections() {
    let fx = PoolFixture::new(4);
    fx.connector.open_delay(Duration::from_millis(1));
    let mut handles = Vec::new();

    for i in 0..20u64 {
        let fx = fx.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..5u64 {
                let conn = fx.pool.checkout().await.expect("checkout failed");
                assert!(conn.is_healthy(), "pool handed out a broken connection");

                // Break roughly one connection in seven before returning it.
                if (i + round) % 7 == 0 {
                    conn.set_healthy(false);
                }
                if let Some(extra) = fx.pool.check_in(conn).await {
                    fx.connector.close(extra).await.unwrap();
                }
            }
        }));
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    let snapshot = fx.assert_invariants(0).await;
    assert!(snapshot.in_use.is_empty());
    assert_eq!(fx.pool.metrics().checkouts_successful, 100);
}
