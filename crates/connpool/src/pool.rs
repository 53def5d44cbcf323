//! Connection pool implementation.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::config::PoolConfig;
use crate::destination::Destination;
use crate::error::{BoxError, PoolError, PoolOperation};
use crate::lifecycle::{ConnectionId, ConnectionMetadata, Connector, Prober};
use crate::metrics::{MetricsRecorder, PoolMetrics};

/// A bounded pool of reusable connections.
///
/// The pool keeps two disjoint sets: *free* connections it owns and may hand
/// out, and *in-use* connections currently held by exactly one caller. Both
/// live behind a single lock, so moving a connection between them is atomic
/// and no connection is ever handed to two callers.
///
/// Connections are opened lazily. The first [`checkout`](Pool::checkout)
/// fills the pool to capacity; later checkouts top it back up. When no free
/// connection is usable the checkout opens a fresh one rather than waiting,
/// which can leave the pool one connection over capacity until the next
/// [`check_in`](Pool::check_in).
///
/// `Pool` is cheap to clone; clones share the same connections.
pub struct Pool<T: Send + Sync + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<T: Send + Sync + 'static> {
    config: PoolConfig,
    destination: Destination,
    connector: Arc<dyn Connector<Connection = T>>,
    prober: Arc<dyn Prober<T>>,
    state: RwLock<PoolState<T>>,
    closed: AtomicBool,
    metrics: MetricsRecorder,
}

/// A backing connection plus the metadata the pool keeps for it.
struct ManagedConnection<T> {
    handle: T,
    meta: ConnectionMetadata,
}

struct PoolState<T> {
    /// Idle connections, iterated oldest identity first.
    free: BTreeMap<ConnectionId, ManagedConnection<T>>,
    /// Checked-out connections. The handle lives with the caller.
    in_use: HashMap<ConnectionId, ConnectionMetadata>,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.free.len() + self.in_use.len()
    }

    fn is_empty(&self) -> bool {
        self.free.is_empty() && self.in_use.is_empty()
    }
}

/// Create a pool with the default ttl.
///
/// No connection is opened until the first checkout.
pub fn create_pool<T, C, P>(
    capacity: usize,
    destination: Destination,
    connector: C,
    prober: P,
) -> Result<Pool<T>, PoolError>
where
    T: Send + Sync + 'static,
    C: Connector<Connection = T> + 'static,
    P: Prober<T> + 'static,
{
    Pool::new(
        PoolConfig::new().capacity(capacity),
        destination,
        connector,
        prober,
    )
}

impl<T: Send + Sync + 'static> Pool<T> {
    /// Create a new pool.
    ///
    /// The configuration is validated but no connection is opened.
    pub fn new<C, P>(
        config: PoolConfig,
        destination: Destination,
        connector: C,
        prober: P,
    ) -> Result<Self, PoolError>
    where
        C: Connector<Connection = T> + 'static,
        P: Prober<T> + 'static,
    {
        Self::from_parts(config, destination, Arc::new(connector), Arc::new(prober))
    }

    /// Create a builder for configuring a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::new()
    }

    fn from_parts(
        config: PoolConfig,
        destination: Destination,
        connector: Arc<dyn Connector<Connection = T>>,
        prober: Arc<dyn Prober<T>>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::debug!(
            capacity = config.capacity,
            ttl = ?config.ttl,
            %destination,
            "connection pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                destination,
                connector,
                prober,
                state: RwLock::new(PoolState {
                    free: BTreeMap::new(),
                    in_use: HashMap::new(),
                }),
                closed: AtomicBool::new(false),
                metrics: MetricsRecorder::default(),
            }),
        })
    }

    /// Check a connection out of the pool.
    ///
    /// Fills or tops up the pool to capacity, then hands out the first free
    /// connection that is neither expired nor rejected by the prober.
    /// Expired and rejected connections are closed along the way. If no free
    /// connection survives, a new one is opened and returned directly.
    ///
    /// The whole operation holds the pool lock exclusively, including the
    /// connector and prober calls it makes.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolClosed`] if the pool has been closed.
    /// - [`PoolError::ConnectionCreation`] or [`PoolError::ValidationFailed`]
    ///   if opening a connection fails. Connections opened earlier in the
    ///   same fill stay in the free set; none is marked in use.
    /// - [`PoolError::ConnectionClose`] if closing an expired or rejected
    ///   connection fails. That connection is no longer tracked.
    pub async fn checkout(&self) -> Result<PooledConnection<T>, PoolError> {
        tracing::trace!("acquiring connection from pool");
        let result = self.inner.checkout().await;
        self.inner.metrics.record(|m| match &result {
            Ok(_) => m.checkouts_successful += 1,
            Err(_) => m.checkouts_failed += 1,
        });
        let (handle, meta) = result?;
        Ok(PooledConnection {
            lease: Lease::new(&self.inner, meta.id),
            handle,
            meta,
        })
    }

    /// Return a checked-out connection.
    ///
    /// The connection leaves the in-use set. If the pool then has room it
    /// joins the free set with a fresh expiry timestamp and `None` is
    /// returned. Otherwise the pool stops tracking it and hands the handle
    /// back as `Some`, leaving its disposal to the caller. This happens when
    /// the pool is at capacity, when it has been closed, and for connections
    /// this pool did not issue.
    pub async fn check_in(&self, conn: PooledConnection<T>) -> Option<T> {
        let PooledConnection {
            handle,
            mut meta,
            lease,
        } = conn;
        let inner = &*self.inner;
        if !lease.issued_by(&self.inner) {
            // The issuing pool untracks it when the lease drops.
            tracing::debug!(connection_id = %meta.id, "refusing connection issued by another pool");
            inner.metrics.record(|m| m.checkins_dropped += 1);
            return Some(handle);
        }

        let mut state = inner.state.write().await;
        lease.release();

        let tracked = state.in_use.remove(&meta.id).is_some();
        if tracked && !inner.is_closed() && state.total() < inner.config.capacity {
            meta.mark_checkin();
            tracing::trace!(connection_id = %meta.id, "returning connection to pool");
            state.free.insert(meta.id, ManagedConnection { handle, meta });
            inner.metrics.record(|m| m.checkins_returned += 1);
            return None;
        }

        meta.mark_discarded();
        tracing::debug!(
            connection_id = %meta.id,
            tracked,
            total = state.total(),
            capacity = inner.config.capacity,
            "dropping connection on check-in"
        );
        inner.metrics.record(|m| m.checkins_dropped += 1);
        Some(handle)
    }

    /// Take a checked-out connection out of the pool for good.
    ///
    /// The in-use entry is removed and the handle is returned without being
    /// offered back to the free set. Use this for connections the caller
    /// knows are broken or wants to keep.
    pub async fn detach(&self, conn: PooledConnection<T>) -> T {
        let PooledConnection {
            handle,
            mut meta,
            lease,
        } = conn;
        if lease.issued_by(&self.inner) {
            self.inner.state.write().await.in_use.remove(&meta.id);
            lease.release();
        }
        meta.mark_discarded();
        tracing::debug!(connection_id = %meta.id, "connection detached from pool");
        handle
    }

    /// Close the pool.
    ///
    /// Every free connection is closed through the connector. Connections
    /// still checked out are untracked when they are checked in. Later
    /// checkouts fail with [`PoolError::PoolClosed`]. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns the first close failure, after attempting to close every free
    /// connection.
    pub async fn close(&self) -> Result<(), PoolError> {
        let inner = &*self.inner;
        let mut state = inner.state.write().await;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let free = std::mem::take(&mut state.free);
        let mut first_error = None;
        for (_, conn) in free {
            if let Err(e) = inner.discard(conn, PoolOperation::Close).await {
                tracing::warn!(error = %e, "failed to close connection while closing pool");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        tracing::info!(in_use = state.in_use.len(), "connection pool closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the current pool status.
    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.state.read().await;
        PoolStatus {
            free: state.free.len(),
            in_use: state.in_use.len(),
            total: state.total(),
            capacity: self.inner.config.capacity,
        }
    }

    /// List the identities in each set.
    pub async fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.state.read().await;
        let mut in_use: Vec<_> = state.in_use.keys().copied().collect();
        in_use.sort_unstable();
        PoolSnapshot {
            free: state.free.keys().copied().collect(),
            in_use,
        }
    }

    /// Get a snapshot of the pool's lifecycle counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the destination connections are opened against.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }
}

impl<T: Send + Sync + 'static> PoolInner<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn checkout(&self) -> Result<(T, ConnectionMetadata), PoolError> {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let operation = if state.is_empty() {
            PoolOperation::Fill
        } else {
            PoolOperation::TopUp
        };
        while state.total() < self.config.capacity {
            let conn = self.open_pooled(operation).await?;
            state.free.insert(conn.meta.id, conn);
        }

        // A candidate stays in the free set until it has been probed, so a
        // checkout cancelled mid-probe leaves it tracked.
        while let Some((&id, candidate)) = state.free.first_key_value() {
            let evict = if candidate.meta.is_expired(self.config.ttl) {
                tracing::debug!(
                    connection_id = %id,
                    age_ms = candidate.meta.age_ms(),
                    "discarding expired connection"
                );
                self.metrics.record(|m| m.expired_evictions += 1);
                true
            } else if let Err(e) = self.prober.validate(&candidate.handle).await {
                tracing::debug!(connection_id = %id, error = %e, "discarding unhealthy connection");
                self.metrics.record(|m| m.validation_evictions += 1);
                true
            } else {
                false
            };

            let Some(mut conn) = state.free.remove(&id) else {
                break;
            };
            if evict {
                self.discard(conn, PoolOperation::Checkout).await?;
                continue;
            }

            conn.meta.mark_checkout();
            state.in_use.insert(id, conn.meta.clone());
            tracing::trace!(connection_id = %id, "checked out free connection");
            return Ok((conn.handle, conn.meta));
        }

        let handle = self.open(PoolOperation::Checkout).await?;
        let mut meta = ConnectionMetadata::new(ConnectionId::next());
        meta.mark_checkout();
        state.in_use.insert(meta.id, meta.clone());
        self.metrics.record(|m| m.checkout_misses += 1);
        tracing::debug!(
            connection_id = %meta.id,
            total = state.total(),
            capacity = self.config.capacity,
            "no usable free connection, opened a new one"
        );
        Ok((handle, meta))
    }

    /// Forget a checked-out connection whose holder dropped it.
    fn abandon(self: Arc<Self>, id: ConnectionId) {
        self.metrics.record(|m| m.connections_abandoned += 1);
        if let Ok(mut state) = self.state.try_write() {
            state.in_use.remove(&id);
            tracing::debug!(connection_id = %id, "checked-out connection dropped without check-in");
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    self.state.write().await.in_use.remove(&id);
                    tracing::debug!(connection_id = %id, "checked-out connection dropped without check-in");
                });
            }
            Err(_) => tracing::warn!(
                connection_id = %id,
                "checked-out connection dropped outside a runtime, its slot stays in use"
            ),
        }
    }

    async fn open(&self, operation: PoolOperation) -> Result<T, PoolError> {
        let handle = self
            .connector
            .open(&self.destination)
            .await
            .map_err(|source| PoolError::ConnectionCreation { operation, source })?;
        self.metrics.record(|m| m.connections_created += 1);
        Ok(handle)
    }

    /// Open a connection for the free set, probing it first when configured.
    async fn open_pooled(
        &self,
        operation: PoolOperation,
    ) -> Result<ManagedConnection<T>, PoolError> {
        let handle = self.open(operation).await?;

        if self.config.validate_on_fill {
            if let Err(source) = self.prober.validate(&handle).await {
                if let Err(e) = self.close_handle(handle).await {
                    tracing::warn!(error = %e, %operation, "failed to close rejected connection");
                }
                return Err(PoolError::ValidationFailed { operation, source });
            }
        }

        let meta = ConnectionMetadata::new(ConnectionId::next());
        tracing::debug!(connection_id = %meta.id, %operation, "opened connection");
        Ok(ManagedConnection { handle, meta })
    }

    async fn discard(
        &self,
        mut conn: ManagedConnection<T>,
        operation: PoolOperation,
    ) -> Result<(), PoolError> {
        conn.meta.mark_discarded();
        self.close_handle(conn.handle)
            .await
            .map_err(|source| PoolError::ConnectionClose { operation, source })
    }

    async fn close_handle(&self, handle: T) -> Result<(), BoxError> {
        let result = self.connector.close(handle).await;
        self.metrics.record(|m| {
            m.connections_closed += 1;
            if result.is_err() {
                m.close_failures += 1;
            }
        });
        result
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<T: Send + Sync + 'static> {
    config: PoolConfig,
    destination: Option<Destination>,
    connector: Option<Arc<dyn Connector<Connection = T>>>,
    prober: Option<Arc<dyn Prober<T>>>,
}

impl<T: Send + Sync + 'static> Default for PoolBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> PoolBuilder<T> {
    /// Create a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            destination: None,
            connector: None,
            prober: None,
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the maximum idle age of a free connection.
    #[must_use]
    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Enable or disable probing connections as they are opened.
    #[must_use]
    pub fn validate_on_fill(mut self, enabled: bool) -> Self {
        self.config.validate_on_fill = enabled;
        self
    }

    /// Set the destination.
    #[must_use]
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Set the connector.
    #[must_use]
    pub fn connector<C>(mut self, connector: C) -> Self
    where
        C: Connector<Connection = T> + 'static,
    {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Set the prober.
    #[must_use]
    pub fn prober<P>(mut self, prober: P) -> Self
    where
        P: Prober<T> + 'static,
    {
        self.prober = Some(Arc::new(prober));
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] if the configuration is invalid
    /// or the destination, connector or prober is missing.
    pub fn build(self) -> Result<Pool<T>, PoolError> {
        let destination = self
            .destination
            .ok_or_else(|| PoolError::Configuration("destination is required".into()))?;
        let connector = self
            .connector
            .ok_or_else(|| PoolError::Configuration("connector is required".into()))?;
        let prober = self
            .prober
            .ok_or_else(|| PoolError::Configuration("prober is required".into()))?;
        Pool::from_parts(self.config, destination, connector, prober)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub free: usize,
    /// Number of connections currently checked out.
    pub in_use: usize,
    /// Total number of tracked connections.
    pub total: usize,
    /// Configured capacity.
    pub capacity: usize,
}

impl PoolStatus {
    /// Checked-out connections as a percentage of capacity.
    ///
    /// Can exceed 100 while a checkout miss holds the pool over capacity.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        self.in_use as f64 / self.capacity as f64 * 100.0
    }
}

/// Identities currently in each set, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Identities of free connections.
    pub free: Vec<ConnectionId>,
    /// Identities of checked-out connections.
    pub in_use: Vec<ConnectionId>,
}

/// A connection checked out of the pool.
///
/// Dereferences to the underlying handle. Return it with
/// [`Pool::check_in`] or take it out of the pool with [`Pool::detach`].
/// Dropping it instead removes its in-use entry, so the slot is freed but
/// the handle is dropped without passing through the connector.
#[derive(Debug)]
#[must_use = "checked-out connections should be returned with Pool::check_in"]
pub struct PooledConnection<T: Send + Sync + 'static> {
    handle: T,
    meta: ConnectionMetadata,
    lease: Lease<T>,
}

/// Ties a checked-out connection to the pool that issued it.
///
/// Dropped while armed, it removes the connection's in-use entry.
#[derive(Debug)]
struct Lease<T: Send + Sync + 'static> {
    pool: Weak<PoolInner<T>>,
    id: ConnectionId,
    armed: bool,
}

impl<T: Send + Sync + 'static> Lease<T> {
    fn new(pool: &Arc<PoolInner<T>>, id: ConnectionId) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            id,
            armed: true,
        }
    }

    fn issued_by(&self, pool: &Arc<PoolInner<T>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl<T: Send + Sync + 'static> Drop for Lease<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.abandon(self.id);
        }
    }
}

impl<T: Send + Sync + 'static> PooledConnection<T> {
    /// The connection's pool identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.meta.id
    }

    /// The metadata the pool recorded when the connection was checked out.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }
}

impl<T: Send + Sync + 'static> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<T: Send + Sync + 'static> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}
