//! Core error types.

use thiserror::Error;

/// Reasons a machine definition fails validation.
///
/// Validation stops at the first violation, so only one of these is ever
/// reported for a given definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("definition must declare at least one state")]
    NoStates,

    #[error("definition must declare at least one event")]
    NoEvents,

    #[error("state names must not be empty")]
    EmptyStateName,

    #[error("event names must not be empty")]
    EmptyEventName,

    #[error("duplicate state '{state}'")]
    DuplicateState { state: String },

    #[error("duplicate event '{event}'")]
    DuplicateEvent { event: String },

    #[error("transition source '{state}' is not a declared state")]
    UnknownSource { state: String },

    #[error("transition from '{state}' uses undeclared event '{event}'")]
    UnknownEvent { state: String, event: String },

    #[error("transition from '{state}' on '{event}' targets undeclared state '{target}'")]
    UnknownTarget {
        state: String,
        event: String,
        target: String,
    },

    #[error("invalid definition id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },
}
