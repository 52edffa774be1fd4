use thiserror::Error;

/// Errors returned by the block stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The database rejected the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store holds an entry that violates its schema.
    #[error("corrupted entry: {0}")]
    Corrupted(String),

    /// The expected entry was not found.
    #[error("entry not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Returns `true` for failures that an identical retry may not hit again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Database(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
