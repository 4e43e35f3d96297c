//! Error types for shadow operations
//!
//! Synchronous failures (bad input, capacity, state) surface as `ShadowError`
//! return values. Failures attributable to a specific request travel through
//! that request's callback as a rejected or timeout ack instead.

use thiserror::Error;

/// Main error type for device-shadow operations
#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("bad argument: {message}")]
    BadArgument { message: String },

    #[error("not connected to the shadow service")]
    NotConnected,

    #[error("too many in-flight requests (capacity {capacity})")]
    TooManyInFlightMessages { capacity: usize },

    #[error("too many delta handlers (capacity {capacity})")]
    TooManyDeltaHandlers { capacity: usize },

    #[error("too many clients (capacity {capacity})")]
    TooManyClients { capacity: usize },

    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("invalid device name: {0}")]
    InvalidDeviceName(#[from] crate::protocol::topics::DeviceNameError),
}

impl ShadowError {
    /// Create a bad-argument error
    pub fn bad_argument<S: Into<String>>(message: S) -> Self {
        Self::BadArgument {
            message: message.into(),
        }
    }

    /// Create a connect-failed error from a recorded transport fault
    pub fn connect_failed<S: Into<String>>(reason: S) -> Self {
        Self::ConnectFailed {
            reason: reason.into(),
        }
    }

    /// Wrap an arbitrary transport error
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Result type for shadow operations
pub type ShadowResult<T> = Result<T, ShadowError>;
