//! # connpool
//!
//! Bounded pool of reusable connections to a remote data store.
//!
//! The pool recycles idle connections instead of opening a new one for every
//! request. It does not speak any wire protocol itself: a [`Connector`]
//! opens and closes backing connections and a [`Prober`] reports whether an
//! established one is still usable.
//!
//! ## Features
//!
//! - Lazy fill up to a fixed capacity on first checkout
//! - Expiry of connections idle for longer than a ttl
//! - Health check of every free connection before it is handed out
//! - No waiting: an exhausted pool opens a fresh connection
//! - Opaque per-connection identities, independent of connection contents
//! - Lifecycle counters and status snapshots
//! - Reference TCP connector and prober
//!
//! ## Example
//!
//! ```rust,no_run
//! use connpool::{Destination, Pool, PoolConfig};
//! use connpool::tcp::{TcpConnector, TcpProber};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), connpool::PoolError> {
//! let destination: Destination = "redis://cache.internal".parse()?;
//! let config = PoolConfig::new()
//!     .capacity(8)
//!     .ttl(Duration::from_secs(120));
//!
//! let pool = Pool::new(
//!     config.clone(),
//!     destination,
//!     TcpConnector::from_config(&config),
//!     TcpProber,
//! )?;
//!
//! let conn = pool.checkout().await?;
//! // Use the connection...
//! pool.check_in(conn).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod destination;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pool;
pub mod tcp;

pub use config::PoolConfig;
pub use destination::Destination;
pub use error::{BoxError, PoolError, PoolOperation};
pub use lifecycle::{ConnectionId, ConnectionMetadata, ConnectionState, Connector, Prober};
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolBuilder, PoolSnapshot, PoolStatus, PooledConnection, create_pool};
