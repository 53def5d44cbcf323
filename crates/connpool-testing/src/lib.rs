//! # connpool-testing
//!
//! Test infrastructure for `connpool`.
//!
//! This crate provides in-memory collaborators and fixtures for exercising
//! the pool without a real data store.
//!
//! ## Features
//!
//! - Mock connector with open/close counters and scripted failures
//! - Mock prober driven by per-connection health flags
//! - Pool fixture with an invariant checker
//! - `tracing` setup for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use connpool_testing::PoolFixture;
//!
//! #[tokio::test]
//! async fn test_reuse() {
//!     let fx = PoolFixture::new(2);
//!     let conn = fx.pool.checkout().await.unwrap();
//!     fx.pool.check_in(conn).await;
//!     assert_eq!(fx.connector.opened(), 2);
//!     fx.assert_invariants(0).await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use fixtures::{PoolFixture, init_tracing};
pub use mock::{MockConnection, MockConnector, MockError, MockProber};
