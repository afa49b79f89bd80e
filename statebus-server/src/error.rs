//! Service error types.

use crate::config::ConfigError;
use statebus_bus::BusError;
use statebus_core::DefinitionError;
use statebus_protocol::{ErrorCode, ProtocolError};
use statebus_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Errors from definition lifecycle, production and consumption.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid definition: {0}")]
    Validation(#[from] DefinitionError),

    #[error("definition not found: {0}")]
    NotFound(String),

    #[error("definition already exists: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl From<ProtocolError> for ServiceError {
    fn from(e: ProtocolError) -> Self {
        ServiceError::InvalidRequest(e.to_string())
    }
}

impl ServiceError {
    /// Converts to the stable error code reported to API callers.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation(_) => ErrorCode::InvalidDefinition,
            ServiceError::NotFound(_) => ErrorCode::DefinitionNotFound,
            ServiceError::Conflict(_) => ErrorCode::DefinitionExists,
            ServiceError::InvalidRequest(_) => ErrorCode::BadRequest,
            ServiceError::Storage(StorageError::InvalidKey(_)) => ErrorCode::BadRequest,
            ServiceError::Storage(e) if e.is_retryable() => ErrorCode::StoreUnavailable,
            ServiceError::Storage(_) => ErrorCode::InternalError,
            ServiceError::Bus(e) if e.is_retryable() => ErrorCode::BusUnavailable,
            ServiceError::Bus(_) => ErrorCode::InternalError,
            ServiceError::Timeout { .. } => ErrorCode::Timeout,
        }
    }

    /// Returns whether the failed step may succeed when repeated.
    ///
    /// Timeouts are transient; storage and bus errors are classified by
    /// their own layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Storage(e) => e.is_retryable(),
            ServiceError::Bus(e) => e.is_retryable(),
            ServiceError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors building or starting the runtime.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("consumer error: {0}")]
    Consumer(#[from] ServiceError),

    #[error("{0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ServiceError::NotFound("x".into()).error_code(),
            ErrorCode::DefinitionNotFound
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).error_code(),
            ErrorCode::DefinitionExists
        );
        assert_eq!(
            ServiceError::Validation(DefinitionError::NoStates).error_code(),
            ErrorCode::InvalidDefinition
        );
        assert_eq!(
            ServiceError::Storage(StorageError::Unavailable("down".into())).error_code(),
            ErrorCode::StoreUnavailable
        );
        assert_eq!(
            ServiceError::Bus(BusError::Unavailable("down".into())).error_code(),
            ErrorCode::BusUnavailable
        );
        assert_eq!(
            ServiceError::from(ProtocolError::MissingField("event")).error_code(),
            ErrorCode::BadRequest
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ServiceError::Timeout {
            operation: "cache get",
            timeout: Duration::from_millis(10),
        }
        .is_retryable());
        assert!(ServiceError::Storage(StorageError::Unavailable("down".into())).is_retryable());
        assert!(ServiceError::Bus(BusError::Unavailable("down".into())).is_retryable());

        assert!(!ServiceError::Storage(StorageError::Corruption("bad".into())).is_retryable());
        assert!(!ServiceError::Bus(BusError::Closed).is_retryable());

        assert!(!ServiceError::NotFound("x".into()).is_retryable());
        assert!(!ServiceError::InvalidRequest("x".into()).is_retryable());
        assert!(!ServiceError::Storage(StorageError::InvalidKey(DefinitionError::NoStates))
            .is_retryable());
    }
}
