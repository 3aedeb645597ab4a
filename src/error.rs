//! Error types for the feature materializer
//!
//! Every failure path in the write and materialization core surfaces as a
//! [`FeatureStoreError`]. Configuration, schema and type errors are fatal and
//! never retried; sink failures are folded into a single
//! [`FeatureStoreError::WriteFailure`] that keeps the failing leg as its cause.

use thiserror::Error;

/// Result type alias for feature materializer operations
pub type Result<T> = std::result::Result<T, FeatureStoreError>;

/// Schema comparison failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error(
        "Schemas do not match. Expected {expected} features, the dataframe contains {actual} features"
    )]
    CountMismatch { expected: usize, actual: usize },

    #[error("Schemas do not match, expected feature {expected} in position {position}, found {actual}")]
    NameMismatch {
        expected: String,
        position: usize,
        actual: String,
    },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

/// Main error type
#[derive(Debug, Error)]
pub enum FeatureStoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(#[from] SchemaError),

    #[error("Error writing to offline and online feature store")]
    WriteFailure {
        #[source]
        source: Box<FeatureStoreError>,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FeatureStoreError {
    /// Create a storage error from a message string
    pub fn storage_msg(msg: impl Into<String>) -> Self {
        FeatureStoreError::Storage(msg.into())
    }

    /// Create a codec error from a message string
    pub fn codec_msg(msg: impl Into<String>) -> Self {
        FeatureStoreError::Codec(msg.into())
    }

    /// Wrap a failing sink leg into the combined write failure
    pub fn write_failure(cause: FeatureStoreError) -> Self {
        match cause {
            already @ FeatureStoreError::WriteFailure { .. } => already,
            other => FeatureStoreError::WriteFailure {
                source: Box::new(other),
            },
        }
    }

    /// The nested cause of a combined write failure, if this is one
    pub fn write_failure_cause(&self) -> Option<&FeatureStoreError> {
        match self {
            FeatureStoreError::WriteFailure { source } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Returns true for configuration-class errors that must never be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeatureStoreError::Config(_)
                | FeatureStoreError::SchemaMismatch(_)
                | FeatureStoreError::UnsupportedType(_)
                | FeatureStoreError::Codec(_)
        )
    }

    /// Returns true if retrying the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FeatureStoreError::WriteFailure { source } => source.is_retryable(),
            FeatureStoreError::Storage(_)
            | FeatureStoreError::Sink(_)
            | FeatureStoreError::Timeout(_)
            | FeatureStoreError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_count_mismatch_message() {
        let err: FeatureStoreError = SchemaError::CountMismatch {
            expected: 4,
            actual: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Schema mismatch: Schemas do not match. Expected 4 features, the dataframe contains 3 features"
        );
    }

    #[test]
    fn test_name_mismatch_message() {
        let err = SchemaError::NameMismatch {
            expected: "age".to_string(),
            position: 1,
            actual: "Name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Schemas do not match, expected feature age in position 1, found Name"
        );
    }

    #[test]
    fn test_write_failure_keeps_cause() {
        let err = FeatureStoreError::write_failure(FeatureStoreError::Sink("broker down".into()));
        assert_eq!(
            err.to_string(),
            "Error writing to offline and online feature store"
        );
        let cause = err.write_failure_cause().unwrap();
        assert!(matches!(cause, FeatureStoreError::Sink(_)));
        assert_eq!(err.source().unwrap().to_string(), "Sink error: broker down");
    }

    #[test]
    fn test_write_failure_is_not_nested_twice() {
        let inner = FeatureStoreError::write_failure(FeatureStoreError::storage_msg("disk full"));
        let outer = FeatureStoreError::write_failure(inner);
        assert!(matches!(
            outer.write_failure_cause(),
            Some(FeatureStoreError::Storage(_))
        ));
    }

    #[test]
    fn test_fatal_and_retryable() {
        assert!(FeatureStoreError::Config("x".into()).is_fatal());
        assert!(!FeatureStoreError::Config("x".into()).is_retryable());
        assert!(FeatureStoreError::UnsupportedType("x".into()).is_fatal());
        assert!(!FeatureStoreError::Sink("x".into()).is_fatal());
        assert!(
            FeatureStoreError::write_failure(FeatureStoreError::Sink("x".into())).is_retryable()
        );
    }
}
