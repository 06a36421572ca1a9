//! Registry of endpoint pools.
//!
//! The [`ConnectionManager`] owns one [`ConnectionPool`] per address,
//! chooses endpoints for callers, routes returned connections back to the
//! pool that issued them and retires pools by draining them.
//!
//! The registry lock only guards lookups. It is never held while a pool's
//! own lock is taken, so endpoints do not contend with each other.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::config::{PoolConfig, normalize_retry};
use crate::connection::{Connection, ConnectionFactory, PoolId, PooledConnection};
use crate::error::{PoolError, Result};
use crate::pool::{ConnectionPool, PoolStatus, Released};

/// Owns one pool per endpoint address.
pub struct ConnectionManager<C> {
    factory: Arc<dyn ConnectionFactory<C>>,
    clock: Arc<dyn Clock>,
    defaults: RwLock<PoolConfig>,
    registry: RwLock<Registry<C>>,
    cursor: AtomicUsize,
}

struct Registry<C> {
    /// Pools accepting new acquires, in insertion order.
    active: Vec<Arc<ConnectionPool<C>>>,
    /// Retired pools waiting for their last connection.
    draining: HashMap<PoolId, Arc<ConnectionPool<C>>>,
    next_index: usize,
}

impl<C> Registry<C> {
    fn find(&self, id: PoolId) -> Option<Arc<ConnectionPool<C>>> {
        self.active
            .iter()
            .find(|pool| pool.index() == id)
            .or_else(|| self.draining.get(&id))
            .cloned()
    }
}

impl<C: Connection> ConnectionManager<C> {
    /// Create a manager whose pools build connections with `factory`.
    pub fn new(factory: impl ConnectionFactory<C> + 'static, defaults: PoolConfig) -> Self {
        Self::with_clock(factory, defaults, Arc::new(SystemClock))
    }

    /// Create a manager whose pools read time from `clock`.
    pub fn with_clock(
        factory: impl ConnectionFactory<C> + 'static,
        defaults: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            clock,
            defaults: RwLock::new(defaults),
            registry: RwLock::new(Registry {
                active: Vec::new(),
                draining: HashMap::new(),
                next_index: 0,
            }),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Add a pool for `address` bounded to `max` live connections
    /// (0 = unlimited).
    ///
    /// Adding an address twice returns the existing pool.
    pub fn add(&self, address: &str, max: usize) -> Arc<ConnectionPool<C>> {
        let config = self.defaults.read().clone().max_connections(max);

        let mut registry = self.registry.write();
        if let Some(pool) = registry.active.iter().find(|p| p.address() == address) {
            return Arc::clone(pool);
        }

        let index = PoolId(registry.next_index);
        registry.next_index += 1;
        let pool = Arc::new(ConnectionPool::with_config(
            address,
            index,
            Arc::clone(&self.factory),
            &config,
            Arc::clone(&self.clock),
        ));
        registry.active.push(Arc::clone(&pool));
        tracing::info!(address, %index, max, "added endpoint");
        pool
    }

    /// Add every endpoint of an address list.
    ///
    /// See [`parse_address_list`] for the format. Nothing is added if the
    /// list is malformed.
    pub fn add_list(&self, list: &str, default_max: usize) -> Result<Vec<Arc<ConnectionPool<C>>>> {
        let entries = parse_address_list(list, default_max)?;
        Ok(entries
            .iter()
            .map(|(address, max)| self.add(address, *max))
            .collect())
    }

    /// Get a connection from any available endpoint.
    ///
    /// Endpoints are tried round-robin; dead, full and failing ones are
    /// skipped. When every endpoint fails, the last error is returned.
    pub fn acquire(&self) -> Result<PooledConnection<C>> {
        let mut last_err = PoolError::NoEndpoints;
        for pool in self.rotation() {
            match pool.acquire() {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::trace!(address = pool.address(), error = %e, "endpoint skipped");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Get a connection to a specific endpoint.
    pub fn acquire_from(&self, address: &str) -> Result<PooledConnection<C>> {
        self.get(address)
            .ok_or_else(|| PoolError::UnknownEndpoint(address.to_string()))?
            .acquire()
    }

    /// Get a connection from the endpoint that `key` hashes to.
    ///
    /// The same key maps to the same endpoint as long as the set of
    /// endpoints does not change. There is no fallback to other endpoints.
    pub fn acquire_by_key(&self, key: &str) -> Result<PooledConnection<C>> {
        self.pick_by_key(key).ok_or(PoolError::NoEndpoints)?.acquire()
    }

    /// Hand a connection back to the pool that issued it.
    ///
    /// When this was the last connection of a draining pool, the pool is
    /// dropped.
    pub fn release(&self, conn: PooledConnection<C>, keep: bool) -> Released {
        let owner = conn.owner();
        let pool = self.registry.read().find(owner);
        let Some(pool) = pool else {
            tracing::warn!(pool = %owner, "connection returned to an unknown pool, closing it");
            drop(conn);
            return Released::Closed;
        };

        let outcome = pool.release(conn, keep);
        if outcome == Released::Drained {
            self.registry.write().draining.remove(&owner);
            tracing::info!(address = pool.address(), pool = %owner, "dropped drained pool");
        }
        outcome
    }
}

impl<C> ConnectionManager<C> {
    /// Get the pool for `address`.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<Arc<ConnectionPool<C>>> {
        self.registry
            .read()
            .active
            .iter()
            .find(|p| p.address() == address)
            .cloned()
    }

    /// All pools accepting new acquires, in insertion order.
    #[must_use]
    pub fn pools(&self) -> Vec<Arc<ConnectionPool<C>>> {
        self.registry.read().active.clone()
    }

    /// Number of pools accepting new acquires.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.read().active.len()
    }

    /// Whether the manager has no active pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of retired pools still waiting for connections to return.
    #[must_use]
    pub fn draining_count(&self) -> usize {
        self.registry.read().draining.len()
    }

    /// Pick the next available endpoint, round-robin.
    #[must_use]
    pub fn pick(&self) -> Option<Arc<ConnectionPool<C>>> {
        self.rotation().into_iter().find(|pool| pool.is_available())
    }

    /// Pick the endpoint that `key` hashes to.
    #[must_use]
    pub fn pick_by_key(&self, key: &str) -> Option<Arc<ConnectionPool<C>>> {
        let registry = self.registry.read();
        if registry.active.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let slot = (hasher.finish() % registry.active.len() as u64) as usize;
        registry.active.get(slot).cloned()
    }

    /// Retire the pool for `address`.
    ///
    /// Idle connections are closed right away. Checked-out connections are
    /// closed as they come back, and the pool is dropped after the last one.
    /// Returns `false` if there is no such pool.
    pub fn remove(&self, address: &str) -> bool {
        // Parked before it is marked, so releases always find it.
        let pool = {
            let mut registry = self.registry.write();
            let Some(pos) = registry.active.iter().position(|p| p.address() == address) else {
                return false;
            };
            let pool = registry.active.remove(pos);
            registry.draining.insert(pool.index(), Arc::clone(&pool));
            pool
        };

        if pool.mark_for_destruction() {
            self.registry.write().draining.remove(&pool.index());
            tracing::info!(address, "removed endpoint");
        } else {
            tracing::info!(
                address,
                outstanding = pool.live_count(),
                "endpoint draining"
            );
        }
        true
    }

    /// Sweep every active pool with its own idle ttl.
    ///
    /// Also forgets retired pools that drained without a release going
    /// through this manager. Returns the total number of connections
    /// evicted.
    pub fn check_idle(&self) -> usize {
        self.prune_drained();
        self.pools().iter().map(|pool| pool.check_idle()).sum()
    }

    fn prune_drained(&self) {
        let retired: Vec<_> = self.registry.read().draining.values().cloned().collect();
        let drained: Vec<_> = retired
            .iter()
            .filter(|pool| pool.is_drained())
            .map(|pool| pool.index())
            .collect();
        if drained.is_empty() {
            return;
        }

        let mut registry = self.registry.write();
        for id in drained {
            if let Some(pool) = registry.draining.remove(&id) {
                tracing::info!(address = pool.address(), pool = %id, "dropped drained pool");
            }
        }
    }

    /// Set the idle ttl of every pool, and of pools added later.
    pub fn set_idle_ttl(&self, ttl: Option<Duration>) {
        self.defaults.write().idle_ttl = ttl;
        for pool in self.pools() {
            pool.set_idle_ttl(ttl);
        }
    }

    /// Set the retry interval of every pool, and of pools added later.
    pub fn set_retry_interval(&self, interval: Option<Duration>) {
        self.defaults.write().retry_interval = normalize_retry(interval);
        for pool in self.pools() {
            pool.set_retry_interval(interval);
        }
    }

    /// Set the idle check interval of every pool, and of pools added later.
    pub fn set_check_interval(&self, interval: Duration) {
        self.defaults.write().check_interval = interval;
        for pool in self.pools() {
            pool.set_check_interval(interval);
        }
    }

    /// Status of every active pool.
    #[must_use]
    pub fn status(&self) -> Vec<PoolStatus> {
        self.pools().iter().map(|pool| pool.status()).collect()
    }

    /// Active pools starting at the round-robin cursor.
    fn rotation(&self) -> Vec<Arc<ConnectionPool<C>>> {
        let registry = self.registry.read();
        let n = registry.active.len();
        if n == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        registry.active[start..]
            .iter()
            .chain(registry.active[..start].iter())
            .cloned()
            .collect()
    }
}

impl<C> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("ConnectionManager")
            .field("active", &registry.active.len())
            .field("draining", &registry.draining.len())
            .field("defaults", &*self.defaults.read())
            .finish_non_exhaustive()
    }
}

/// Parse an endpoint list such as `"10.0.0.1:80|16, 10.0.0.2:80; db:5432"`.
///
/// Entries are separated by commas, semicolons or whitespace. Each entry is
/// an address optionally followed by `|max`; entries without a maximum use
/// `default_max`.
pub fn parse_address_list(list: &str, default_max: usize) -> Result<Vec<(String, usize)>> {
    let mut entries = Vec::new();
    for raw in list
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        let (address, max) = match raw.split_once('|') {
            Some((address, max)) => {
                let max = max.parse::<usize>().map_err(|_| {
                    PoolError::Configuration(format!(
                        "invalid max connections {max:?} for endpoint {address:?}"
                    ))
                })?;
                (address, max)
            }
            None => (raw, default_max),
        };
        if address.is_empty() {
            return Err(PoolError::Configuration(format!(
                "missing address in endpoint {raw:?}"
            )));
        }
        entries.push((address.to_string(), max));
    }
    Ok(entries)
}
