//! Connection lifecycle management.
//!
//! This module defines the two collaborators the pool drives, a
//! [`Connector`] that opens and closes backing connections and a [`Prober`]
//! that reports whether an established connection is still usable, along
//! with the metadata the pool tracks for every connection it owns.
//!
//! Opening and probing are separate traits; an implementation may back both
//! with the same transport call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::destination::Destination;
use crate::error::BoxError;

/// Opens and closes backing connections for the pool.
///
/// Implementations own the transport: dialing, handshake, authentication
/// and teardown all happen here. The pool calls these methods while holding
/// its lock, so they should complete within a bounded time.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection handle produced by this connector.
    type Connection: Send + Sync + 'static;

    /// Open a new connection to `destination`.
    async fn open(&self, destination: &Destination) -> Result<Self::Connection, BoxError>;

    /// Close a connection the pool has discarded.
    async fn close(&self, connection: Self::Connection) -> Result<(), BoxError>;
}

/// Reports whether an established connection is still healthy.
#[async_trait]
pub trait Prober<T: Send + Sync>: Send + Sync {
    /// Returns `Ok(())` when `connection` can be handed to a caller.
    async fn validate(&self, connection: &T) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F> Prober<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<(), BoxError> + Send + Sync,
{
    async fn validate(&self, connection: &T) -> Result<(), BoxError> {
        self(connection)
    }
}

/// Opaque identity assigned to a connection once, when it is opened.
///
/// Identities come from a process-wide counter and never depend on the
/// connection's contents, so they stay stable for the connection's lifetime
/// and no two pools ever issue the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is idle and available for checkout.
    Free,
    /// Connection is checked out to exactly one caller.
    InUse,
    /// Connection has left the pool and will not be reused.
    Discarded,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Check if the connection is currently held by a caller.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::InUse)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: ConnectionId,
    /// When the connector opened the connection.
    pub opened_at: Instant,
    /// Expiry timestamp.
    ///
    /// Set when the connection is opened and refreshed every time it is
    /// checked out or checked in, so expiry measures time since last use.
    pub created_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a newly opened connection.
    pub fn new(id: ConnectionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            opened_at: now,
            created_at: now,
            checkout_count: 0,
            state: ConnectionState::Free,
        }
    }

    /// Time since the expiry timestamp was last refreshed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// [`age`](Self::age) in whole milliseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        saturating_millis(self.age())
    }

    /// Check if the connection has reached `ttl` and must not be reused.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.created_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::InUse;
    }

    /// Mark the connection as returned to the free set.
    pub fn mark_checkin(&mut self) {
        self.created_at = Instant::now();
        self.state = ConnectionState::Free;
    }

    /// Mark the connection as no longer tracked by the pool.
    pub fn mark_discarded(&mut self) {
        self.state = ConnectionState::Discarded;
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
