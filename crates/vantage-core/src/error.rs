//! Error types for the delivery layer.

use std::time::Duration;

/// Delivery errors.
///
/// None of these reach a page through [`crate::strategy::CacheStrategyEngine::handle`];
/// the engine degrades every failure to a cached or offline response. They
/// surface from the lower-level components and from construction.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Connection failure (DNS, reset, TLS, body read).
    #[error("network error: {message}")]
    Network { message: String },

    /// Fetch exceeded its deadline and was aborted.
    #[error("network timeout after {after:?}")]
    Timeout { after: Duration },

    /// Durable store failure (quota, IO, corrupt metadata).
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl DeliveryError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,
            Self::Network { .. } | Self::Timeout { .. } => 5,
            Self::Storage { .. } => 6,
        }
    }

    /// Whether the error came from the network side (recoverable through the
    /// cache fallback).
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: format!("{context}: {err}"),
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        assert!(DeliveryError::Timeout {
            after: Duration::from_secs(10)
        }
        .is_network());
        assert!(DeliveryError::Network {
            message: "reset".into()
        }
        .is_network());
        assert!(!DeliveryError::Storage {
            message: "quota".into()
        }
        .is_network());
    }

    #[test]
    fn test_exit_codes() {
        let err = DeliveryError::Config {
            message: "bad".into(),
        };
        assert_eq!(err.exit_code(), 1);
        let err = DeliveryError::storage("failed to write entry", "disk full");
        assert_eq!(err.exit_code(), 6);
        assert_eq!(err.to_string(), "storage error: failed to write entry: disk full");
    }
}
