//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default maximum age of a free connection before it is discarded.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default number of connections the pool keeps.
pub const DEFAULT_CAPACITY: usize = 10;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections across the free and in-use sets.
    ///
    /// A checkout that finds no usable free connection may transiently push
    /// the total one above this value; the next check-in restores the bound.
    pub capacity: usize,

    /// Maximum time a connection may sit unused before it is discarded
    /// instead of reused.
    pub ttl: Duration,

    /// Time allowed for a connector to establish a connection.
    ///
    /// Honoured by [`TcpConnector`](crate::tcp::TcpConnector); custom
    /// connectors may read it through [`Pool::config`](crate::Pool::config).
    pub connect_timeout: Duration,

    /// Whether connections opened during fill and top-up are probed before
    /// entering the free set.
    pub validate_on_fill: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            connect_timeout: Duration::from_secs(15),
            validate_on_fill: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum idle age of a free connection.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable probing connections as they are opened.
    #[must_use]
    pub fn validate_on_fill(mut self, enabled: bool) -> Self {
        self.validate_on_fill = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::Configuration(
                "capacity must be greater than 0".into(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(PoolError::Configuration(
                "ttl must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
