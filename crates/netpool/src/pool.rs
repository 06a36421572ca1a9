//! Single-endpoint connection pool.
//!
//! A [`ConnectionPool`] owns the idle connections for one address, bounds
//! how many connections may be live at once, tracks whether the endpoint is
//! reachable and evicts connections that sat idle for too long.
//!
//! Every operation runs inside one pool-wide mutex. That includes opening a
//! new connection: establishment is serialized per pool, which is what keeps
//! the live count exact without reservations.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock, Timestamp, elapsed, secs};
use crate::config::{PoolConfig, normalize_retry};
use crate::connection::{Connection, ConnectionFactory, PoolId, PooledConnection};
use crate::error::{PoolError, Result};

/// Reachability of a pool's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The endpoint is considered reachable.
    Alive,
    /// The last connect attempt failed.
    Dead {
        /// When the endpoint was marked dead.
        since: Timestamp,
    },
}

impl Liveness {
    /// Check if the endpoint is considered reachable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// What happened to a connection handed back with
/// [`ConnectionPool::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The connection was put back on the idle list.
    Idle,
    /// The connection was closed.
    Closed,
    /// The connection was closed and it was the last one of a draining
    /// pool. The owner should drop the pool now.
    Drained,
}

/// Status information about a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Endpoint address.
    pub address: String,
    /// Position of the pool within its manager.
    pub index: PoolId,
    /// Whether the endpoint is considered reachable.
    pub alive: bool,
    /// Whether the pool is draining.
    pub draining: bool,
    /// Live connections (idle and checked out).
    pub live: usize,
    /// Idle connections available for reuse.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Lifetime count of successful acquisitions.
    pub total_acquired: u64,
    /// Maximum live connections, 0 for unlimited.
    pub max: usize,
}

/// A pool of reusable connections to one endpoint.
pub struct ConnectionPool<C> {
    address: String,
    index: PoolId,
    max: usize,
    factory: Arc<dyn ConnectionFactory<C>>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<PoolState<C>>>,
}

pub(crate) struct PoolState<C> {
    /// Most recently returned first.
    idle: VecDeque<PooledConnection<C>>,
    live: usize,
    liveness: Liveness,
    retry_interval: Option<Duration>,
    idle_ttl: Option<Duration>,
    check_interval: Duration,
    last_check_at: Timestamp,
    total_acquired: u64,
    draining: bool,
    next_id: u64,
}

impl<C: Connection> ConnectionPool<C> {
    /// Create a pool with default settings and the system clock.
    pub fn new(
        address: impl Into<String>,
        max_size: usize,
        index: PoolId,
        factory: Arc<dyn ConnectionFactory<C>>,
    ) -> Self {
        let config = PoolConfig::new().max_connections(max_size);
        Self::with_config(address, index, factory, &config, Arc::new(SystemClock))
    }

    /// Create a pool from a configuration and a clock.
    pub fn with_config(
        address: impl Into<String>,
        index: PoolId,
        factory: Arc<dyn ConnectionFactory<C>>,
        config: &PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            address: address.into(),
            index,
            max: config.max_connections,
            factory,
            clock,
            state: Arc::new(Mutex::new(PoolState {
                idle: VecDeque::new(),
                live: 0,
                liveness: Liveness::Alive,
                retry_interval: normalize_retry(config.retry_interval),
                idle_ttl: config.idle_ttl,
                check_interval: config.check_interval,
                last_check_at: 0,
                total_acquired: 0,
                draining: false,
                next_id: 0,
            })),
        }
    }

    /// Get a connection from the pool.
    ///
    /// Returns the most recently returned idle connection if there is one,
    /// otherwise opens a new connection while holding the pool lock. Never
    /// waits for capacity.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Draining`] once the pool is marked for destruction.
    /// - [`PoolError::Unavailable`] while the endpoint is dead and its
    ///   retry interval has not elapsed. No connect is attempted.
    /// - [`PoolError::CapacityExceeded`] when the live bound is reached.
    /// - [`PoolError::ConnectFailed`] when opening a new connection fails.
    ///   The endpoint is marked dead.
    pub fn acquire(&self) -> Result<PooledConnection<C>> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        if state.draining {
            return Err(PoolError::Draining {
                address: self.address.clone(),
            });
        }

        if let Liveness::Dead { since } = state.liveness {
            if !state.retry_due(since, now) {
                tracing::trace!(address = %self.address, "endpoint still in backoff");
                return Err(PoolError::Unavailable {
                    address: self.address.clone(),
                });
            }
            state.liveness = Liveness::Alive;
            tracing::info!(address = %self.address, "retrying endpoint");
        }

        if let Some(mut conn) = state.idle.pop_front() {
            conn.lend(Arc::downgrade(&self.state));
            state.total_acquired += 1;
            tracing::trace!(address = %self.address, id = conn.id(), "reusing idle connection");
            return Ok(conn);
        }

        if self.max > 0 && state.live >= self.max {
            tracing::warn!(
                address = %self.address,
                max = self.max,
                live = state.live,
                "too many connections"
            );
            return Err(PoolError::CapacityExceeded {
                address: self.address.clone(),
                max: self.max,
            });
        }

        let mut conn = self.factory.create(&self.address);
        if let Err(e) = conn.open() {
            drop(conn);
            state.liveness = Liveness::Dead {
                since: self.clock.now(),
            };
            tracing::warn!(address = %self.address, error = %e, "connect failed, endpoint marked dead");
            return Err(PoolError::ConnectFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.live += 1;
        state.total_acquired += 1;
        tracing::debug!(address = %self.address, id, live = state.live, "opened connection");

        let mut conn = PooledConnection::new(conn, id, self.index);
        conn.lend(Arc::downgrade(&self.state));
        Ok(conn)
    }

    /// Return a connection to the pool.
    ///
    /// With `keep` set and a live endpoint the connection goes to the front
    /// of the idle list; otherwise it is closed. A draining pool closes
    /// every returned connection and reports [`Released::Drained`] for the
    /// last one.
    ///
    /// If idle eviction is enabled and the check interval has elapsed, the
    /// release also sweeps expired idle connections.
    ///
    /// # Panics
    ///
    /// Panics if more connections are returned than were acquired.
    pub fn release(&self, mut conn: PooledConnection<C>, keep: bool) -> Released {
        debug_assert_eq!(conn.owner(), self.index, "connection released to the wrong pool");
        conn.settle();

        let mut state = self.state.lock();
        let now = self.clock.now();

        if state.draining {
            state.close(conn, &self.address);
            if state.live == 0 {
                tracing::info!(address = %self.address, "pool drained");
                return Released::Drained;
            }
            return Released::Closed;
        }

        let outcome = if keep && state.liveness.is_alive() {
            conn.set_returned_at(now);
            state.idle.push_front(conn);
            Released::Idle
        } else {
            state.close(conn, &self.address);
            Released::Closed
        };

        if let Some(ttl) = state.idle_ttl {
            if elapsed(now, state.last_check_at, state.check_interval) {
                let evicted = state.reap_idle(Some(ttl), now);
                state.last_check_at = now;
                if evicted > 0 {
                    tracing::debug!(address = %self.address, evicted, "evicted idle connections");
                }
            }
        }

        outcome
    }
}

impl<C> ConnectionPool<C> {
    /// Evict idle connections that have been idle for at least `ttl`.
    ///
    /// `None` does nothing and a zero ttl evicts every idle connection.
    /// Otherwise the idle list is scanned from the oldest entry and the scan
    /// stops at the first connection that is still fresh. Connections with a
    /// non-positive returned-at stamp are skipped.
    ///
    /// Returns the number of connections evicted.
    pub fn reap(&self, ttl: Option<Duration>) -> usize {
        let mut state = self.state.lock();
        let evicted = state.reap_idle(ttl, self.clock.now());
        drop(state);
        if evicted > 0 {
            tracing::debug!(address = %self.address, evicted, "evicted idle connections");
        }
        evicted
    }

    /// Evict idle connections using the pool's configured idle ttl.
    pub fn check_idle(&self) -> usize {
        let ttl = self.state.lock().idle_ttl;
        self.reap(ttl)
    }

    /// Check whether the endpoint may be used.
    ///
    /// A dead endpoint whose retry interval has elapsed is flipped back to
    /// alive so that the next acquire tries it again.
    pub fn is_available(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        if state.draining {
            return false;
        }
        match state.liveness {
            Liveness::Alive => true,
            Liveness::Dead { since } => {
                if state.retry_due(since, now) {
                    state.liveness = Liveness::Alive;
                    tracing::info!(address = %self.address, "retrying endpoint");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Mark the endpoint alive or dead.
    ///
    /// For callers that learn about liveness through other means, such as
    /// a failed read on a checked-out connection.
    pub fn set_alive(&self, ok: bool) {
        let mut state = self.state.lock();
        state.liveness = if ok {
            Liveness::Alive
        } else {
            Liveness::Dead {
                since: self.clock.now(),
            }
        };
    }

    /// Retire the pool.
    ///
    /// Idle connections are closed right away. New acquires fail with
    /// [`PoolError::Draining`] and every connection released from now on is
    /// closed.
    ///
    /// Returns `true` if no connections are live, in which case the pool
    /// is already drained.
    pub fn mark_for_destruction(&self) -> bool {
        let mut state = self.state.lock();
        state.draining = true;
        let closed = state.reap_idle(Some(Duration::ZERO), 0);
        tracing::info!(
            address = %self.address,
            closed,
            outstanding = state.live,
            "pool marked for destruction"
        );
        state.live == 0
    }

    /// Set the idle time-to-live; `None` disables idle eviction.
    pub fn set_idle_ttl(&self, ttl: Option<Duration>) {
        self.state.lock().idle_ttl = ttl;
    }

    /// Set the dead-endpoint retry interval; `None` or zero never retries.
    pub fn set_retry_interval(&self, interval: Option<Duration>) {
        self.state.lock().retry_interval = normalize_retry(interval);
    }

    /// Set the minimum spacing between release-triggered idle sweeps.
    pub fn set_check_interval(&self, interval: Duration) {
        self.state.lock().check_interval = interval;
    }

    /// Endpoint address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Position of this pool within its manager.
    #[must_use]
    pub fn index(&self) -> PoolId {
        self.index
    }

    /// Maximum live connections, 0 for unlimited.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max
    }

    /// Number of live connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Lifetime count of successful acquisitions.
    #[must_use]
    pub fn total_acquired(&self) -> u64 {
        self.state.lock().total_acquired
    }

    /// Current reachability of the endpoint.
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.state.lock().liveness
    }

    /// Whether the endpoint is considered reachable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.liveness().is_alive()
    }

    /// Whether the pool is marked for destruction.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.state.lock().draining
    }

    /// Whether the pool is draining with no live connections left.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.draining && state.live == 0
    }

    /// Returned-at stamps of the idle connections, most recent first.
    #[must_use]
    pub fn idle_stamps(&self) -> Vec<Timestamp> {
        self.state
            .lock()
            .idle
            .iter()
            .map(PooledConnection::returned_at)
            .collect()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            address: self.address.clone(),
            index: self.index,
            alive: state.liveness.is_alive(),
            draining: state.draining,
            live: state.live,
            idle: state.idle.len(),
            in_use: state.live.saturating_sub(state.idle.len()),
            total_acquired: state.total_acquired,
            max: self.max,
        }
    }
}

impl<C> PoolState<C> {
    fn retry_due(&self, since: Timestamp, now: Timestamp) -> bool {
        match self.retry_interval {
            Some(interval) => elapsed(now, since, interval),
            None => false,
        }
    }

    /// Account for a checked-out connection that was dropped instead of
    /// released.
    pub(crate) fn forget(&mut self, id: u64) {
        if self.live == 0 {
            tracing::error!(id, "dropped connection was never counted as live");
            return;
        }
        self.live -= 1;
        tracing::warn!(id, live = self.live, draining = self.draining, "connection dropped without release");
    }

    fn close(&mut self, conn: PooledConnection<C>, address: &str) {
        assert!(
            self.live > 0,
            "released more connections than were acquired from {address}"
        );
        drop(conn);
        self.live -= 1;
    }

    /// Idle sweep for callers that already hold the pool lock.
    fn reap_idle(&mut self, ttl: Option<Duration>, now: Timestamp) -> usize {
        let Some(ttl) = ttl else {
            return 0;
        };
        if self.idle.is_empty() {
            return 0;
        }

        if ttl.is_zero() {
            let evicted = self.idle.len();
            self.idle.clear();
            self.live -= evicted;
            return evicted;
        }

        let ttl = secs(ttl);
        let mut evicted = 0;
        let mut i = self.idle.len();
        while i > 0 {
            i -= 1;
            let conn = &self.idle[i];
            if conn.is_exempt() {
                continue;
            }
            // Everything in front of a fresh entry is fresher still.
            if now.saturating_sub(conn.returned_at()) < ttl {
                break;
            }
            drop(self.idle.remove(i));
            self.live -= 1;
            evicted += 1;
        }
        evicted
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("index", &self.index)
            .field("max", &self.max)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
