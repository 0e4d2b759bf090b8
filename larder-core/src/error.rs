//! Error types for larder operations

use thiserror::Error;

/// Backing store errors.
///
/// A store that does not exist at all is not an error: the engine falls back
/// to cache-only operation. These variants cover a store that exists but
/// failed to do what it was asked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to connect to backing store {store}: {reason}")]
    ConnectFailed { store: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Key syntax errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key must not be empty")]
    Empty,

    #[error("Key {key} has an empty path segment at position {position}")]
    EmptySegment { key: String, position: usize },
}

/// Errors raised while writing through a dotted path.
///
/// Reading a path that misses is never an error; it resolves to absent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Cannot descend into {found} at segment {segment}")]
    NotAContainer { segment: String, found: String },

    #[error("Index {index} out of bounds for sequence of length {len} at segment {segment}")]
    IndexOutOfBounds {
        segment: String,
        index: usize,
        len: usize,
    },
}

/// Validation errors for list-shaped operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Value under {key} is a {found}, not a sequence")]
    NotASequence { key: String, found: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all larder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LarderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_transaction_failed() {
        let err = StorageError::TransactionFailed {
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Transaction failed"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_key_error_display_empty_segment() {
        let err = KeyError::EmptySegment {
            key: "user..name".to_string(),
            position: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("user..name"));
        assert!(msg.contains("position 1"));
    }

    #[test]
    fn test_path_error_display_not_a_container() {
        let err = PathError::NotAContainer {
            segment: "first".to_string(),
            found: "string".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("first"));
        assert!(msg.contains("string"));
    }

    #[test]
    fn test_larder_error_from_variants() {
        let storage = LarderError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, LarderError::Storage(_)));

        let key = LarderError::from(KeyError::Empty);
        assert!(matches!(key, LarderError::Key(_)));

        let path = LarderError::from(PathError::IndexOutOfBounds {
            segment: "3".to_string(),
            index: 3,
            len: 1,
        });
        assert!(matches!(path, LarderError::Path(_)));

        let validation = LarderError::from(ValidationError::NotASequence {
            key: "list".to_string(),
            found: "number".to_string(),
        });
        assert!(matches!(validation, LarderError::Validation(_)));

        let config = LarderError::from(ConfigError::InvalidValue {
            field: "cache_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, LarderError::Config(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let err = StorageError::LockPoisoned;
        let msg = format!("{}", err);
        assert!(msg.contains("lock poisoned"));
    }
}
