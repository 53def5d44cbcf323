//! Connection pooling with metrics example.
//!
//! This example pools raw TCP connections and shows how the pool fills,
//! reuses, overflows and reports its state.
//!
//! # Running
//!
//! ```bash
//! # Point at any TCP service, or leave unset to use a local listener.
//! export CONNPOOL_URL=tcp://127.0.0.1:6379
//!
//! cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use connpool::tcp::{TcpConnector, TcpProber};
use connpool::{Destination, Pool, PoolConfig, PoolError};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let destination = match std::env::var("CONNPOOL_URL") {
        Ok(url) => url.parse::<Destination>()?,
        Err(_) => spawn_local_listener().await?,
    };

    println!("=== Connection Pool with Metrics Example ===\n");

    let pool_config = PoolConfig::new()
        .capacity(4)
        .ttl(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(5));

    println!("Pool configuration:");
    println!("  Destination: {destination}");
    println!("  Capacity: {}", pool_config.capacity);
    println!("  TTL: {:?}", pool_config.ttl);
    println!();

    let pool = Pool::new(
        pool_config.clone(),
        destination,
        TcpConnector::from_config(&pool_config),
        TcpProber,
    )?;

    print_pool_status(&pool).await;

    // Example 1: Basic pool usage
    println!("\n1. Basic pool usage:");
    {
        let conn = pool.checkout().await?;
        println!("  Checked out {} -> {}", conn.id(), conn.peer_addr()?);
        pool.check_in(conn).await;
    }
    print_pool_status(&pool).await;

    // Example 2: Concurrent usage
    println!("\n2. Concurrent pool usage (10 parallel tasks):");
    let start = Instant::now();
    let mut handles = vec![];

    for i in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.checkout().await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(extra) = pool.check_in(conn).await {
                // Over capacity: the pool handed the stream back to us.
                drop(extra);
            }
            Ok::<_, PoolError>(i)
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }

    println!("  Completed {} tasks in {:?}", completed, start.elapsed());
    print_pool_metrics(&pool);

    // Example 3: Overflow
    println!("\n3. Checking out more connections than the capacity:");
    let mut held = Vec::new();
    for _ in 0..pool.config().capacity + 1 {
        held.push(pool.checkout().await?);
        print_pool_status(&pool).await;
    }
    for conn in held {
        let dropped = pool.check_in(conn).await.is_some();
        println!("  Checked in (dropped: {dropped})");
    }
    print_pool_status(&pool).await;

    // Final metrics
    println!("\n4. Final pool metrics:");
    print_pool_metrics(&pool);

    println!("\n5. Graceful shutdown:");
    pool.close().await?;
    println!("  Pool closed.");

    Ok(())
}

/// Accept connections on a loopback port and hold them open.
async fn spawn_local_listener() -> std::io::Result<Destination> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut accepted: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            accepted.push(stream);
        }
    });
    Ok(Destination::new("tcp", "127.0.0.1", port))
}

async fn print_pool_status(pool: &Pool<TcpStream>) {
    let status = pool.status().await;
    println!(
        "  Status: {} in use, {} free, {}/{} total ({:.1}% utilization)",
        status.in_use,
        status.free,
        status.total,
        status.capacity,
        status.utilization()
    );
}

fn print_pool_metrics(pool: &Pool<TcpStream>) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections closed: {}", metrics.connections_closed);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!("    Reuse rate: {:.2}%", metrics.reuse_rate() * 100.0);
    println!(
        "    Evictions: {} expired, {} failed validation",
        metrics.expired_evictions, metrics.validation_evictions
    );
    println!(
        "    Check-ins: {} returned, {} dropped",
        metrics.checkins_returned, metrics.checkins_dropped
    );
}
