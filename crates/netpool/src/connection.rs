//! The connection contract the pool depends on.
//!
//! A pool never speaks a wire protocol. It only needs to create a
//! connection for an address, ask it to open, and later drop it. Everything
//! the pool tracks per connection (owner, returned-at stamp, identity) lives
//! in [`PooledConnection`], so connection types only implement
//! [`Connection::open`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;

use parking_lot::Mutex;

use crate::clock::Timestamp;
use crate::pool::PoolState;

/// A single logical connection to one remote address.
///
/// Implementations release their OS resources on drop. The pool calls
/// [`open`](Connection::open) at most once per instance and drops the
/// instance exactly once.
pub trait Connection: Send + 'static {
    /// Error reported when the connection cannot be established.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attempt to establish the connection.
    ///
    /// Any failure (network, authentication, handshake) is reported as an
    /// error, never as a panic.
    fn open(&mut self) -> Result<(), Self::Error>;
}

/// Constructs not-yet-opened connections for a pool.
pub trait ConnectionFactory<C>: Send + Sync {
    /// Create a connection to `address`.
    fn create(&self, address: &str) -> C;
}

impl<C, F> ConnectionFactory<C> for F
where
    F: Fn(&str) -> C + Send + Sync,
{
    fn create(&self, address: &str) -> C {
        self(address)
    }
}

/// Identifies a pool within its owning manager.
///
/// Connections refer back to their pool through this identifier rather
/// than a pointer, so a connection never keeps its pool alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PoolId(pub usize);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection issued by a pool.
///
/// Owned either by the pool's idle list or by exactly one caller. Hand it
/// back with `release`. Dropping a checked-out connection instead closes it
/// and frees its slot in the pool, if the pool still exists.
#[must_use = "connections must be released back to their pool"]
pub struct PooledConnection<C> {
    conn: C,
    id: u64,
    owner: PoolId,
    returned_at: Timestamp,
    /// Set while checked out. Never keeps the pool alive.
    lender: Option<Weak<Mutex<PoolState<C>>>>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(conn: C, id: u64, owner: PoolId) -> Self {
        Self {
            conn,
            id,
            owner,
            returned_at: 0,
            lender: None,
        }
    }

    /// Mark the connection as checked out of `pool`.
    pub(crate) fn lend(&mut self, pool: Weak<Mutex<PoolState<C>>>) {
        self.lender = Some(pool);
    }

    /// Mark the connection as handed back; its pool does the accounting.
    pub(crate) fn settle(&mut self) {
        self.lender = None;
    }

    /// Identifier of this connection, unique within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pool that issued this connection.
    #[must_use]
    pub fn owner(&self) -> PoolId {
        self.owner
    }

    /// When this connection was last returned to its pool.
    ///
    /// Zero until the first return.
    #[must_use]
    pub fn returned_at(&self) -> Timestamp {
        self.returned_at
    }

    pub(crate) fn set_returned_at(&mut self, when: Timestamp) {
        self.returned_at = when;
    }

    /// Whether idle reaping skips this connection.
    pub(crate) fn is_exempt(&self) -> bool {
        self.returned_at <= 0
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    /// Mutably borrow the underlying connection.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(pool) = self.lender.take().and_then(|weak| weak.upgrade()) {
            pool.lock().forget(self.id);
        }
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("returned_at", &self.returned_at)
            .field("checked_out", &self.lender.is_some())
            .finish_non_exhaustive()
    }
}
