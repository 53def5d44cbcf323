//! TCP collaborators.
//!
//! [`TcpConnector`] and [`TcpProber`] pool plain `tokio` TCP streams. They
//! do no handshake of their own and are meant as a base for protocol
//! connectors, or for pooling raw sockets to a service that needs none.

use std::future::poll_fn;
use std::io;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::config::PoolConfig;
use crate::destination::Destination;
use crate::error::BoxError;
use crate::lifecycle::{Connector, Prober};

/// Opens TCP streams to the destination's host and port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

impl TcpConnector {
    /// Create a connector with the given connect timeout.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            nodelay: true,
        }
    }

    /// Create a connector using the pool configuration's connect timeout.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.connect_timeout)
    }

    /// Enable or disable `TCP_NODELAY` on new streams (default: enabled).
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn open(&self, destination: &Destination) -> Result<TcpStream, BoxError> {
        tracing::debug!("establishing TCP connection to {}", destination.address());

        let connect = TcpStream::connect((destination.host(), destination.port()));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connecting to {} timed out after {:?}",
                        destination.address(),
                        self.connect_timeout
                    ),
                )
            })??;

        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }

    async fn close(&self, mut connection: TcpStream) -> Result<(), BoxError> {
        match connection.shutdown().await {
            Ok(()) => Ok(()),
            // The peer got there first.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reports a TCP stream unhealthy once the peer has closed it or the socket
/// holds a pending error.
///
/// The check never blocks: data waiting on the socket counts as healthy and
/// is left unread.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober<TcpStream> for TcpProber {
    async fn validate(&self, connection: &TcpStream) -> Result<(), BoxError> {
        if let Some(e) = connection.take_error()? {
            return Err(e.into());
        }

        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let peeked = poll_fn(|cx| Poll::Ready(connection.poll_peek(cx, &mut buf))).await;

        match peeked {
            Poll::Pending => Ok(()),
            Poll::Ready(Ok(0)) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )
            .into()),
            Poll::Ready(Ok(_)) => Ok(()),
            Poll::Ready(Err(e)) => Err(e.into()),
        }
    }
}
