//! # netpool-testing
//!
//! Test infrastructure for netpool development.
//!
//! ## Features
//!
//! - A manual clock for driving backoff and idle aging deterministically
//! - Scripted in-memory connections whose endpoints can be made unreachable
//! - A mock TCP echo server for exercising real sockets (no external
//!   services required)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use netpool::{ConnectionPool, PoolConfig, PoolId};
//! use netpool_testing::{ManualClock, MockBackend};
//!
//! let clock = ManualClock::new(1_000);
//! let backend = MockBackend::new();
//! let pool = ConnectionPool::with_config(
//!     "db:5432",
//!     PoolId(0),
//!     Arc::new(backend.clone()),
//!     &PoolConfig::new().max_connections(2),
//!     Arc::new(clock.clone()),
//! );
//!
//! backend.set_reachable(false);
//! assert!(pool.acquire().is_err());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod mock_connection;
pub mod mock_server;

pub use clock::ManualClock;
pub use mock_connection::{MockBackend, MockConnection, MockError};
pub use mock_server::{MockServer, MockServerError, refused_address};
