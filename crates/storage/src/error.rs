//! Error types for blob storage and locking.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors returned by the blob store and lock manager.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed key does not exist.
    ///
    /// Callers branch on this to decide whether to issue a new certificate.
    #[error("key not found: {key}")]
    NotExist { key: String },

    /// The key is empty once separators are stripped, or it lies in the
    /// folder reserved for lock blobs.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The underlying object store failed.
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage could not be set up from its configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A local directory backing the store could not be prepared.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Build a not-found error for `key`.
    pub fn not_exist(key: impl Into<String>) -> Self {
        StorageError::NotExist { key: key.into() }
    }

    /// Returns `true` if this error means the key is absent.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, StorageError::NotExist { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),

    /// A setting holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
