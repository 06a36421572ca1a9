//! Time source for liveness backoff and idle aging.
//!
//! Pools work in whole seconds, like the timestamps they stamp on returned
//! connections. A stamp of zero or less marks a connection as exempt from
//! idle reaping.

use std::fmt;
use std::time::Duration;

/// Whole seconds since the unix epoch.
pub type Timestamp = i64;

/// A source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in whole seconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Convert a duration to whole seconds, saturating at `i64::MAX`.
pub(crate) fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Whether at least `interval` has passed between `since` and `now`.
pub(crate) fn elapsed(now: Timestamp, since: Timestamp, interval: Duration) -> bool {
    now.saturating_sub(since) >= secs(interval)
}
