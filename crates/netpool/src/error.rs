//! Pool error types.

use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// None of these are fatal: they are reported to the immediate caller,
/// which decides whether to fail the request, pick another endpoint or
/// back off. The pool itself never retries.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The endpoint is known dead and its retry window has not elapsed.
    #[error("endpoint {address} is unavailable")]
    Unavailable {
        /// Endpoint address.
        address: String,
    },

    /// Maximum live connections reached.
    #[error("maximum connections ({max}) reached for {address}")]
    CapacityExceeded {
        /// Endpoint address.
        address: String,
        /// Maximum allowed connections.
        max: usize,
    },

    /// Establishing a new connection failed; the endpoint is now dead.
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Endpoint address.
        address: String,
        /// Error reported by the connection.
        reason: String,
    },

    /// The pool has been retired and only accepts returned connections.
    #[error("pool for {address} is draining")]
    Draining {
        /// Endpoint address.
        address: String,
    },

    /// The manager has no pools to choose from.
    #[error("no endpoints configured")]
    NoEndpoints,

    /// The manager has no pool for the requested address.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is transient and a later attempt, or an attempt
    /// against another endpoint, may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::CapacityExceeded { .. } | Self::ConnectFailed { .. }
        )
    }

    /// The endpoint address this error refers to, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Unavailable { address }
            | Self::CapacityExceeded { address, .. }
            | Self::ConnectFailed { address, .. }
            | Self::Draining { address } => Some(address),
            Self::UnknownEndpoint(address) => Some(address),
            Self::NoEndpoints | Self::Configuration(_) => None,
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
