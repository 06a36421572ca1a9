//! # netpool
//!
//! Client-side connection pools for network endpoints.
//!
//! Unlike generic object pools, each pool here guards one remote address
//! and tracks whether that endpoint is reachable.
//!
//! ## Features
//!
//! - Bounded live connections per endpoint, failing fast when full
//! - Most-recently-returned-first reuse of idle connections
//! - Dead-endpoint backoff, retried lazily on demand
//! - Idle eviction piggybacked on releases, plus an optional tokio sweeper
//! - Draining teardown while connections are still checked out
//! - A manager with round-robin and keyed endpoint selection
//! - Blocking TCP connections with connect and I/O timeouts
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use netpool::{ConnectionManager, PoolConfig, TcpConnection, TcpConnector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager: ConnectionManager<TcpConnection> = ConnectionManager::new(
//!     TcpConnector::new().connect_timeout(Duration::from_secs(5)),
//!     PoolConfig::new().idle_ttl(Duration::from_secs(60)),
//! );
//! manager.add_list("10.0.0.1:8080|16, 10.0.0.2:8080|16", 0)?;
//!
//! let conn = manager.acquire()?;
//! // Use connection...
//! manager.release(conn, true);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod pool;
pub mod reaper;
pub mod tcp;

pub use clock::{Clock, SystemClock, Timestamp};
pub use config::PoolConfig;
pub use connection::{Connection, ConnectionFactory, PoolId, PooledConnection};
pub use error::{PoolError, Result};
pub use manager::{ConnectionManager, parse_address_list};
pub use pool::{ConnectionPool, Liveness, PoolStatus, Released};
pub use reaper::IdleReaper;
pub use tcp::{TcpConnection, TcpConnector};
