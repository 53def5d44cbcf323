//! TCP collaborator tests.
//!
//! These run against a `TcpListener` bound to the loopback interface, so no
//! external service is needed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use connpool::tcp::{TcpConnector, TcpProber};
use connpool::{Connector, Destination, Pool, PoolConfig, PoolError, PoolOperation, Prober};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

async fn listener() -> (TcpListener, Destination) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Destination::new("tcp", "127.0.0.1", port))
}

/// Port with nothing listening on it.
async fn closed_port() -> Destination {
    let (listener, destination) = listener().await;
    drop(listener);
    destination
}

#[tokio::test]
async fn test_connector_opens_and_closes() {
    let (listener, destination) = listener().await;
    let connector = TcpConnector::new(Duration::from_secs(5));

    let stream = assert_ok!(connector.open(&destination).await);
    assert!(stream.nodelay().unwrap());
    let (_server_side, _) = listener.accept().await.unwrap();

    assert_ok!(connector.close(stream).await);
}

#[tokio::test]
async fn test_connector_reports_refused_connection() {
    let destination = closed_port().await;
    let connector = TcpConnector::new(Duration::from_secs(5));

    assert_err!(connector.open(&destination).await);
}

#[tokio::test]
async fn test_prober_accepts_idle_stream() {
    let (listener, destination) = listener().await;
    let connector = TcpConnector::default();

    let stream = connector.open(&destination).await.unwrap();
    let (_server_side, _) = listener.accept().await.unwrap();

    assert_ok!(TcpProber.validate(&stream).await);
}

#[tokio::test]
async fn test_prober_accepts_stream_with_pending_data() {
    let (listener, destination) = listener().await;
    let connector = TcpConnector::default();

    let stream = connector.open(&destination).await.unwrap();
    let (mut server_side, _) = listener.accept().await.unwrap();
    server_side.write_all(b"hello").await.unwrap();
    stream.readable().await.unwrap();

    assert_ok!(TcpProber.validate(&stream).await);

    // The probe must not consume the pending bytes.
    let mut buf = [0u8; 5];
    let n = stream.peek(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &b"hello"[..n]);
}

#[tokio::test]
async fn test_prober_rejects_stream_closed_by_peer() {
    let (listener, destination) = listener().await;
    let connector = TcpConnector::default();

    let stream = connector.open(&destination).await.unwrap();
    let (server_side, _) = listener.accept().await.unwrap();
    drop(server_side);
    stream.readable().await.unwrap();

    assert_err!(TcpProber.validate(&stream).await);
}

#[tokio::test]
async fn test_pool_of_tcp_streams() {
    let (listener, destination) = listener().await;
    let accept = tokio::spawn(async move {
        let mut accepted = Vec::new();
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            accepted.push(stream);
        }
        accepted
    });

    let config = PoolConfig::new().capacity(2);
    let pool = Pool::new(
        config.clone(),
        destination,
        TcpConnector::from_config(&config),
        TcpProber,
    )
    .unwrap();

    let conn = pool.checkout().await.unwrap();
    let _server_sides = accept.await.unwrap();

    let status = pool.status().await;
    assert_eq!(status.free, 1);
    assert_eq!(status.in_use, 1);
    assert!(conn.peer_addr().is_ok());

    assert!(pool.check_in(conn).await.is_none());
    assert_eq!(pool.status().await.free, 2);

    pool.close().await.unwrap();
    assert_eq!(pool.metrics().connections_closed, 2);
}

#[tokio::test]
async fn test_pool_fill_fails_when_destination_unreachable() {
    let destination = closed_port().await;
    let pool = Pool::new(
        PoolConfig::new().capacity(2),
        destination,
        TcpConnector::new(Duration::from_secs(5)),
        TcpProber,
    )
    .unwrap();

    let err = pool.checkout().await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::ConnectionCreation {
            operation: PoolOperation::Fill,
            ..
        }
    ));
    assert_eq!(pool.status().await.total, 0);
    assert_eq!(pool.metrics().checkouts_failed, 1);
}
