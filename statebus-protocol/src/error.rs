//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors decoding or encoding bus payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Stable error codes reported to API callers.
///
/// These codes are part of the external contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request errors
    BadRequest,
    InvalidDefinition,

    // Resource errors
    DefinitionNotFound,
    DefinitionExists,

    // Infrastructure errors
    StoreUnavailable,
    BusUnavailable,
    Timeout,
    InternalError,
}

impl ErrorCode {
    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::StoreUnavailable
                | ErrorCode::BusUnavailable
                | ErrorCode::Timeout
                | ErrorCode::InternalError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BadRequest => write!(f, "BAD_REQUEST"),
            ErrorCode::InvalidDefinition => write!(f, "INVALID_DEFINITION"),
            ErrorCode::DefinitionNotFound => write!(f, "DEFINITION_NOT_FOUND"),
            ErrorCode::DefinitionExists => write!(f, "DEFINITION_EXISTS"),
            ErrorCode::StoreUnavailable => write!(f, "STORE_UNAVAILABLE"),
            ErrorCode::BusUnavailable => write!(f, "BUS_UNAVAILABLE"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::StoreUnavailable.is_retryable());
        assert!(ErrorCode::BusUnavailable.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());

        assert!(!ErrorCode::BadRequest.is_retryable());
        assert!(!ErrorCode::InvalidDefinition.is_retryable());
        assert!(!ErrorCode::DefinitionNotFound.is_retryable());
        assert!(!ErrorCode::DefinitionExists.is_retryable());
    }

    #[test]
    fn test_error_code_display_matches_serde() {
        for code in [
            ErrorCode::BadRequest,
            ErrorCode::InvalidDefinition,
            ErrorCode::DefinitionNotFound,
            ErrorCode::DefinitionExists,
            ErrorCode::StoreUnavailable,
            ErrorCode::BusUnavailable,
            ErrorCode::Timeout,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
        }
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::PayloadTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::MissingField("instanceId");
        assert!(err.to_string().contains("instanceId"));
    }
}
