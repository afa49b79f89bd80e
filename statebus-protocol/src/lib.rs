//! # statebus-protocol
//!
//! Wire format for statebus events.
//!
//! This crate provides:
//! - The event envelope and its JSON encoding
//! - Stable error codes for API callers

pub mod envelope;
pub mod error;

pub use envelope::Envelope;
pub use error::{ErrorCode, ProtocolError};

/// Maximum encoded envelope size (64 KiB).
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;
