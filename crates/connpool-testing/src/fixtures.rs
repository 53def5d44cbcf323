//! Test fixture utilities.

use std::collections::HashSet;
use std::time::Duration;

use connpool::{Destination, Pool, PoolConfig, PoolSnapshot};

use crate::mock::{MockConnection, MockConnector, MockProber};

/// Destination used by fixtures.
pub const FIXTURE_DESTINATION: &str = "mock://fixture.local:4242/testdb";

/// A pool wired to mock collaborators, with handles to both mocks.
#[derive(Clone)]
pub struct PoolFixture {
    /// The pool under test.
    pub pool: Pool<MockConnection>,
    /// The connector the pool uses.
    pub connector: MockConnector,
    /// The prober the pool uses.
    pub prober: MockProber,
}

impl PoolFixture {
    /// Create a fixture with `capacity` and the default ttl.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(PoolConfig::new().capacity(capacity))
    }

    /// Create a fixture with `capacity` and `ttl`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `ttl` is zero.
    #[must_use]
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self::with_config(PoolConfig::new().capacity(capacity).ttl(ttl))
    }

    /// Create a fixture from a full configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_config(config: PoolConfig) -> Self {
        let connector = MockConnector::new();
        let prober = MockProber::new();
        let destination: Destination = FIXTURE_DESTINATION
            .parse()
            .expect("fixture destination is valid");
        let pool = Pool::new(config, destination, connector.clone(), prober.clone())
            .expect("fixture configuration is valid");
        Self {
            pool,
            connector,
            prober,
        }
    }

    /// Check the pool's structural invariants.
    ///
    /// - no identity is both free and in use
    /// - no identity appears twice in either set
    /// - the pool holds at most `capacity + slack` connections
    ///
    /// # Panics
    ///
    /// Panics with a description of the first violated invariant.
    #[allow(clippy::panic)]
    pub async fn assert_invariants(&self, slack: usize) -> PoolSnapshot {
        let snapshot = self.pool.snapshot().await;
        let free: HashSet<_> = snapshot.free.iter().collect();
        let in_use: HashSet<_> = snapshot.in_use.iter().collect();

        if free.len() != snapshot.free.len() || in_use.len() != snapshot.in_use.len() {
            panic!("duplicate identity in pool snapshot: {snapshot:?}");
        }
        if let Some(id) = free.intersection(&in_use).next() {
            panic!("{id} is both free and in use: {snapshot:?}");
        }

        let total = snapshot.free.len() + snapshot.in_use.len();
        let limit = self.pool.config().capacity + slack;
        if total > limit {
            panic!("pool holds {total} connections, limit is {limit}");
        }
        snapshot
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`. Safe to call from every test; only the first call
/// installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
