//! Error types for cacher operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No backend configured")]
    NoBackend,

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Failures while turning a stored envelope back into a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeserializationError {
    #[error("Malformed payload: {reason}")]
    Malformed { reason: String },

    #[error("Unresolved type {type_name}: no decoder registered after resolution attempt")]
    UnresolvedType { type_name: String },

    #[error("Decoder for {type_name} rejected payload: {reason}")]
    DecoderFailed { type_name: String, reason: String },

    #[error("Unexpected {found} envelope while reading in {expected} mode")]
    EnvelopeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors raised by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Key too long ({len} > {max}): {key}")]
    KeyTooLong { key: String, len: usize, max: usize },

    #[error("Backend lock poisoned")]
    LockPoisoned,

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("{backend} backend failed: {reason}")]
    Other { backend: String, reason: String },
}

/// Master error type for all cacher errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacherError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DeserializationError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl CacherError {
    /// Returns true if this error came from a missing or invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this error came from decoding a stored value.
    pub fn is_deserialization(&self) -> bool {
        matches!(self, Self::Deserialization(_))
    }
}

/// Result type alias for cacher operations.
pub type CacherResult<T> = Result<T, CacherError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_no_backend() {
        let err = CacherError::from(ConfigError::NoBackend);
        let msg = format!("{}", err);
        assert!(msg.contains("No backend configured"));
        assert!(err.is_config());
        assert!(!err.is_deserialization());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_key_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_key_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_deserialization_error_display_unresolved() {
        let err = CacherError::from(DeserializationError::UnresolvedType {
            type_name: "Finders::Keepers".to_string(),
        });
        let msg = format!("{}", err);
        assert!(msg.contains("Finders::Keepers"));
        assert!(err.is_deserialization());
    }

    #[test]
    fn test_backend_error_display_key_too_long() {
        let err = BackendError::KeyTooLong {
            key: "abc".to_string(),
            len: 3,
            max: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Key too long"));
        assert!(msg.contains("3 > 2"));
    }

    #[test]
    fn test_envelope_mismatch_display() {
        let err = DeserializationError::EnvelopeMismatch {
            expected: "raw",
            found: "marshalled",
        };
        assert_eq!(
            err.to_string(),
            "Unexpected marshalled envelope while reading in raw mode"
        );
    }
}
