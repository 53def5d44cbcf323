//! Scriptable in-memory collaborators.
//!
//! [`MockConnector`] hands out [`MockConnection`]s and records every open
//! and close; [`MockProber`] checks the health flag each connection carries.
//! Both can be told to fail on demand, and clones share their state, so a
//! test can keep a handle after giving the original to a pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use connpool::{BoxError, Connector, Destination, Prober};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced by the mock collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// Open was scripted to fail.
    #[error("connection refused by mock connector")]
    OpenRefused,

    /// Close was scripted to fail.
    #[error("mock connector failed to close connection {0}")]
    CloseFailed(u64),

    /// The connection was marked unhealthy.
    #[error("connection {0} is unhealthy")]
    Unhealthy(u64),

    /// The probe was scripted to fail.
    #[error("mock probe failed for connection {0}")]
    ProbeFailed(u64),
}

/// A connection produced by [`MockConnector`].
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    destination: String,
    healthy: Arc<AtomicBool>,
}

impl MockConnection {
    /// Serial number assigned by the connector, starting at 0.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The destination this connection was opened against.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether the connection currently reports itself healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Mark the connection healthy or broken.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    next_serial: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
    /// Opens left before scripted failures start; `None` never fails.
    opens_before_failure: Mutex<Option<usize>>,
    failing_opens: AtomicUsize,
    fail_closes: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    health: Mutex<HashMap<u64, Arc<AtomicBool>>>,
    closed_serials: Mutex<Vec<u64>>,
}

/// In-memory [`Connector`] with scripted failures.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    /// Create a connector that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Let `count` more opens succeed, then fail every open after that.
    pub fn fail_opens_after(&self, count: usize) {
        *self.state.opens_before_failure.lock() = Some(count);
    }

    /// Stop failing opens.
    pub fn allow_opens(&self) {
        self.state.failing_opens.store(0, Ordering::SeqCst);
        *self.state.opens_before_failure.lock() = None;
    }

    /// Make every close fail (the connection is still gone afterwards).
    pub fn fail_closes(&self, fail: bool) {
        self.state.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Sleep for `delay` inside every open.
    pub fn open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = Some(delay);
    }

    /// Mark the connection with `serial` healthy or broken.
    ///
    /// Works whether the connection is currently free or checked out.
    pub fn set_healthy(&self, serial: u64, healthy: bool) {
        if let Some(flag) = self.state.health.lock().get(&serial) {
            flag.store(healthy, Ordering::SeqCst);
        }
    }

    /// Mark every connection opened so far as broken.
    pub fn break_all(&self) {
        for flag in self.state.health.lock().values() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Number of successful opens.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of close calls, failed ones included.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Opened connections not yet passed to close.
    #[must_use]
    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }

    /// Serials passed to close, in order.
    #[must_use]
    pub fn closed_serials(&self) -> Vec<u64> {
        self.state.closed_serials.lock().clone()
    }

    fn should_fail_open(&self) -> bool {
        let scripted = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted {
            return true;
        }

        let mut remaining = self.state.opens_before_failure.lock();
        match remaining.as_mut() {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn open(&self, destination: &Destination) -> Result<MockConnection, BoxError> {
        let delay = *self.state.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail_open() {
            tracing::trace!(%destination, "mock connector refusing open");
            return Err(MockError::OpenRefused.into());
        }

        let serial = self.state.next_serial.fetch_add(1, Ordering::SeqCst);
        let healthy = Arc::new(AtomicBool::new(true));
        self.state.health.lock().insert(serial, Arc::clone(&healthy));
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(serial, %destination, "mock connection opened");

        Ok(MockConnection {
            serial,
            destination: destination.to_string(),
            healthy,
        })
    }

    async fn close(&self, connection: MockConnection) -> Result<(), BoxError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.closed_serials.lock().push(connection.serial);
        self.state.health.lock().remove(&connection.serial);
        tracing::trace!(serial = connection.serial, "mock connection closed");

        if self.state.fail_closes.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed(connection.serial).into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProberState {
    validations: AtomicUsize,
    rejections: AtomicUsize,
    failing_probes: AtomicUsize,
    probe_delay: Mutex<Duration>,
}

/// [`Prober`] that reports each [`MockConnection`]'s health flag.
#[derive(Debug, Clone, Default)]
pub struct MockProber {
    state: Arc<ProberState>,
}

impl MockProber {
    /// Create a prober that trusts the connection's health flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` probes regardless of connection health.
    pub fn fail_next_probes(&self, count: usize) {
        self.state.failing_probes.store(count, Ordering::SeqCst);
    }

    /// Sleep for `delay` inside every probe; `Duration::ZERO` turns it off.
    pub fn probe_delay(&self, delay: Duration) {
        *self.state.probe_delay.lock() = delay;
    }

    /// Number of probes performed.
    #[must_use]
    pub fn validations(&self) -> usize {
        self.state.validations.load(Ordering::SeqCst)
    }

    /// Number of probes that reported the connection unhealthy.
    #[must_use]
    pub fn rejections(&self) -> usize {
        self.state.rejections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober<MockConnection> for MockProber {
    async fn validate(&self, connection: &MockConnection) -> Result<(), BoxError> {
        self.state.validations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .state
            .failing_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if scripted {
            Err(MockError::ProbeFailed(connection.serial))
        } else if !connection.is_healthy() {
            Err(MockError::Unhealthy(connection.serial))
        } else {
            Ok(())
        };

        if result.is_err() {
            self.state.rejections.fetch_add(1, Ordering::SeqCst);
        }
        result.map_err(Into::into)
    }
}
