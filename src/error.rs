//! # Error Types
//!
//! Structured error handling for the collection cache using thiserror.
//!
//! Propagation policy: store and transport failures are never silently
//! swallowed. They always reach the direct caller of the failed operation,
//! the [`LifecycleBus`](crate::events::LifecycleBus) error stream, or both.
//! A timed-out `load` is a distinguishable [`CorralError::LoadTimeout`], not
//! an empty result, so callers can tell "no data yet, retry later" apart from
//! "data confirmed absent".

use thiserror::Error;

/// Errors that can occur during cache, guard, or sweeper operations
#[derive(Debug, Error)]
pub enum CorralError {
    /// Backing-store operation failure
    #[error("Store error: {0}")]
    Store(String),

    /// Pub/sub transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failed to serialize or deserialize an item, metadata record, or event
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A cache miss was not answered by any producer within the configured timeout
    #[error("Load timed out waiting for a producer: {key}")]
    LoadTimeout { key: String },

    /// A result or request subscription ended before delivering a message
    #[error("Subscription closed unexpectedly: {0}")]
    SubscriptionClosed(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CorralError {
    /// Create a store error from an operation name and cause
    pub fn store(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Store(format!("{operation} failed: {cause}"))
    }

    /// Create a transport error from an operation name and cause
    pub fn transport(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{operation} failed: {cause}"))
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for all corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CorralError::store("GET", "connection refused");
        assert_eq!(
            err.to_string(),
            "Store error: GET failed: connection refused"
        );

        let err = CorralError::LoadTimeout {
            key: "missing-key".to_string(),
        };
        assert!(err.to_string().contains("missing-key"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CorralError = parse_err.into();
        assert!(matches!(err, CorralError::Serialization(_)));
    }
}
