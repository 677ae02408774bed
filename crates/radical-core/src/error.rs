//! Error types for radical peers.
//!
//! Every fallible operation in the crate returns [`RadicalError`]. Driver
//! errors from Redis, PostgreSQL and the connection pool are folded into
//! [`RadicalError::Transport`] and tagged as transient when retrying them
//! makes sense.

use std::time::Duration;
use thiserror::Error;

/// Main error type for radical.
#[derive(Debug, Error)]
pub enum RadicalError {
    // Wire errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Dispatch errors
    #[error("Method not found: {name}")]
    MethodNotFound { name: String },

    #[error("Canonical name {name} already registered")]
    DuplicateMethod { name: String },

    /// The remote method failed; `message` is the error string it produced.
    #[error("{message}")]
    Remote { message: String },

    // Client errors
    #[error("Timeout while waiting for response after {0:?}")]
    Timeout(Duration),

    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// Whether the operation may succeed if retried.
        transient: bool,
    },

    #[error("Transport is not started")]
    NotStarted,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    #[error("Invalid queue name {name:?}: {reason}")]
    InvalidQueueName { name: String, reason: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for radical operations.
pub type Result<T> = std::result::Result<T, RadicalError>;

impl From<serde_json::Error> for RadicalError {
    fn from(err: serde_json::Error) -> Self {
        RadicalError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<redis::RedisError> for RadicalError {
    fn from(err: redis::RedisError) -> Self {
        let transient = err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout();
        RadicalError::Transport {
            message: format!("redis: {}", err),
            transient,
        }
    }
}

impl From<tokio_postgres::Error> for RadicalError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Errors without a SQLSTATE never reached the server.
        let transient = err.is_closed() || err.code().is_none();
        RadicalError::Transport {
            message: format!("postgres: {}", err),
            transient,
        }
    }
}

impl From<deadpool_postgres::PoolError> for RadicalError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        RadicalError::Transport {
            message: format!("postgres pool: {}", err),
            transient: true,
        }
    }
}

impl RadicalError {
    /// Create a protocol error from anything printable.
    pub fn protocol(message: impl std::fmt::Display) -> Self {
        RadicalError::Protocol {
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        RadicalError::Config {
            message: message.into(),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RadicalError::Transport { transient: true, .. })
    }

    /// Whether this error was raised by the remote method rather than locally.
    pub fn is_remote(&self) -> bool {
        matches!(self, RadicalError::Remote { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RadicalError::MethodNotFound {
            name: "foo.bar".into(),
        };
        assert_eq!(err.to_string(), "Method not found: foo.bar");

        let err = RadicalError::Remote {
            message: "unsupported operand".into(),
        };
        assert_eq!(err.to_string(), "unsupported operand");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RadicalError::Transport {
            message: "connection reset".into(),
            transient: true,
        }
        .is_retryable());
        assert!(!RadicalError::Transport {
            message: "relation does not exist".into(),
            transient: false,
        }
        .is_retryable());
        assert!(!RadicalError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!RadicalError::NotStarted.is_retryable());
    }

    #[test]
    fn test_remote_classification() {
        assert!(RadicalError::Remote {
            message: "boom".into()
        }
        .is_remote());
        assert!(!RadicalError::protocol("bad payload").is_remote());
    }

    #[test]
    fn test_json_conversion() {
        let err: RadicalError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, RadicalError::Json { .. }));
    }
}
