//! Storage error types.

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] statebus_core::DefinitionError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StorageError {
    /// Returns whether the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Io(_) | StorageError::Unavailable(_) => true,
            StorageError::Json(_) | StorageError::Corruption(_) | StorageError::InvalidKey(_) => {
                false
            }
            #[cfg(feature = "redis")]
            StorageError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
            }
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Unavailable(format!("storage task failed: {}", e))
    }
}
