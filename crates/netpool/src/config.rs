//! Pool configuration.

use std::time::Duration;

/// Default delay before a dead endpoint is tried again.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default minimum spacing between release-triggered idle sweeps.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for an endpoint pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of live connections (idle and checked out).
    ///
    /// Zero means unlimited.
    pub max_connections: usize,

    /// Time a connection can sit idle before it is evicted.
    ///
    /// `None` disables idle eviction.
    pub idle_ttl: Option<Duration>,

    /// Time to wait before retrying an endpoint whose last connect failed.
    ///
    /// `None` never retries a dead endpoint.
    pub retry_interval: Option<Duration>,

    /// Minimum spacing between the idle sweeps that releases trigger.
    pub check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            idle_ttl: None,
            retry_interval: Some(DEFAULT_RETRY_INTERVAL),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live connections (0 = unlimited).
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle connection time-to-live.
    #[must_use]
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    /// Disable idle eviction.
    #[must_use]
    pub fn no_idle_ttl(mut self) -> Self {
        self.idle_ttl = None;
        self
    }

    /// Set the dead-endpoint retry interval.
    ///
    /// A zero interval disables retrying.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = normalize_retry(Some(interval));
        self
    }

    /// Never retry an endpoint once a connect has failed.
    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.retry_interval = None;
        self
    }

    /// Set the minimum spacing between release-triggered idle sweeps.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Whether the pool bounds its live connections.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.max_connections > 0
    }
}

/// Zero-length retry intervals mean "never retry".
pub(crate) fn normalize_retry(interval: Option<Duration>) -> Option<Duration> {
    interval.filter(|d| !d.is_zero())
}
