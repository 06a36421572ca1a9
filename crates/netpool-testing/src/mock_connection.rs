//! Scripted in-memory connections.
//!
//! A [`MockBackend`] is a connection factory whose endpoints can be made
//! unreachable at will. It counts open attempts and tracks how many of its
//! connections are open right now, so tests can check the pool's bounds
//! against what actually exists.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use netpool::{Connection, ConnectionFactory};
use parking_lot::Mutex;
use thiserror::Error;

/// Error returned by a mock connection that cannot open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// The endpoint was scripted as unreachable.
    #[error("connection refused by {0}")]
    Refused(String),
}

#[derive(Debug)]
struct BackendState {
    reachable: AtomicBool,
    unreachable: Mutex<HashSet<String>>,
    open_delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    open_now: AtomicUsize,
    peak_open: AtomicUsize,
    closed: AtomicUsize,
    next_serial: AtomicU64,
}

/// Factory for [`MockConnection`]s.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<BackendState>,
}

impl MockBackend {
    /// Create a backend whose endpoints are all reachable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState {
                reachable: AtomicBool::new(true),
                unreachable: Mutex::new(HashSet::new()),
                open_delay: Mutex::new(None),
                attempts: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                open_now: AtomicUsize::new(0),
                peak_open: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                next_serial: AtomicU64::new(0),
            }),
        }
    }

    /// Make every endpoint reachable or unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make one endpoint reachable or unreachable.
    pub fn set_endpoint_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self.state.unreachable.lock();
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    /// Sleep for `delay` inside every open, to widen race windows.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.state.open_delay.lock() = delay;
    }

    /// Number of open attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Number of failed open attempts so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.state.failures.load(Ordering::SeqCst)
    }

    /// Number of connections that are open right now.
    #[must_use]
    pub fn open_now(&self) -> usize {
        self.state.open_now.load(Ordering::SeqCst)
    }

    /// Highest number of connections open at the same time.
    #[must_use]
    pub fn peak_open(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }

    /// Number of opened connections that have since been dropped.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn is_reachable(&self, address: &str) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
            && !self.state.unreachable.lock().contains(address)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory<MockConnection> for MockBackend {
    fn create(&self, address: &str) -> MockConnection {
        MockConnection {
            serial: self.state.next_serial.fetch_add(1, Ordering::SeqCst),
            address: address.to_string(),
            backend: self.clone(),
            opened: false,
        }
    }
}

/// An in-memory connection created by a [`MockBackend`].
#[derive(Debug)]
pub struct MockConnection {
    serial: u64,
    address: String,
    backend: MockBackend,
    opened: bool,
}

impl MockConnection {
    /// Creation order of this connection across its backend.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The endpoint this connection was created for.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether `open` succeeded.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl Connection for MockConnection {
    type Error = MockError;

    fn open(&mut self) -> Result<(), MockError> {
        let state = &self.backend.state;
        state.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *state.open_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if !self.backend.is_reachable(&self.address) {
            state.failures.fetch_add(1, Ordering::SeqCst);
            return Err(MockError::Refused(self.address.clone()));
        }

        self.opened = true;
        let open_now = state.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_open.fetch_max(open_now, Ordering::SeqCst);
        tracing::trace!(address = %self.address, serial = self.serial, "mock connection opened");
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if self.opened {
            let state = &self.backend.state;
            state.open_now.fetch_sub(1, Ordering::SeqCst);
            state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
