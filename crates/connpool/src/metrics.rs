//! Pool lifecycle counters.

use parking_lot::Mutex;

/// Snapshot of pool lifecycle counters.
///
/// Obtained from [`Pool::metrics`](crate::Pool::metrics). Counters only grow
/// for the lifetime of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Connections opened by the connector.
    pub connections_created: u64,
    /// Connections the pool handed to the connector for closing.
    pub connections_closed: u64,
    /// Close calls that returned an error.
    pub close_failures: u64,
    /// Checkouts that returned a connection.
    pub checkouts_successful: u64,
    /// Checkouts that returned an error.
    pub checkouts_failed: u64,
    /// Checkouts served by opening a new connection because no free
    /// connection was usable.
    pub checkout_misses: u64,
    /// Free connections discarded because they reached the ttl.
    pub expired_evictions: u64,
    /// Free connections discarded because the prober rejected them.
    pub validation_evictions: u64,
    /// Check-ins that put the connection back into the free set.
    pub checkins_returned: u64,
    /// Check-ins that dropped the connection because the pool was full or
    /// closed, or had not issued it.
    pub checkins_dropped: u64,
    /// Checked-out connections dropped without being checked in or detached.
    pub connections_abandoned: u64,
}

impl PoolMetrics {
    /// Fraction of checkouts that succeeded, or `1.0` before any checkout.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Fraction of successful checkouts served from the free set.
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts_successful == 0 {
            return 0.0;
        }
        let reused = self.checkouts_successful.saturating_sub(self.checkout_misses);
        reused as f64 / self.checkouts_successful as f64
    }
}

/// Shared counter storage.
///
/// Kept outside the pool's async lock so reading metrics never waits behind
/// a checkout that is talking to the connector.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    inner: Mutex<PoolMetrics>,
}

impl MetricsRecorder {
    pub(crate) fn record(&self, update: impl FnOnce(&mut PoolMetrics)) {
        update(&mut self.inner.lock());
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        *self.inner.lock()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_before_any_checkout() {
        let metrics = PoolMetrics::default();
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(metrics.reuse_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_rates() {
        let metrics = PoolMetrics {
            checkouts_successful: 3,
            checkouts_failed: 1,
            checkout_misses: 1,
            ..PoolMetrics::default()
        };
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((metrics.reuse_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = MetricsRecorder::default();
        recorder.record(|m| m.connections_created += 2);
        recorder.record(|m| m.connections_closed += 1);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.connections_created, 2);
        assert_eq!(snapshot.connections_closed, 1);
    }
}
