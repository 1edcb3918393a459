//! Error types for Tidemark operations

use thiserror::Error;

/// Errors raised by query-store and durable-store adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tidemark errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TidemarkError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },
}

/// Result type alias for Tidemark operations.
pub type TidemarkResult<T> = Result<T, TidemarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_backend() {
        let err = StoreError::Backend {
            backend: "lmdb".to_string(),
            reason: "map full".to_string(),
        };
        assert_eq!(err.to_string(), "Backend lmdb failed: map full");
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "batch_delay".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for batch_delay: 0 - must be positive"
        );
    }

    #[test]
    fn test_tidemark_error_from_variants() {
        let store = TidemarkError::from(StoreError::Unavailable {
            reason: "offline".to_string(),
        });
        assert!(matches!(store, TidemarkError::Store(_)));

        let config = TidemarkError::from(ConfigError::MissingRequired {
            field: "storage_key".to_string(),
        });
        assert!(matches!(config, TidemarkError::Config(_)));
    }
}
