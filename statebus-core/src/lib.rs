//! # statebus-core
//!
//! State machine engine for statebus.
//!
//! This crate provides:
//! - Definition parsing and validation
//! - Compiled transition tables
//! - The pure transition function
//! - Partition assignment for new definitions

pub mod definition;
pub mod engine;
pub mod error;
pub mod partition;

#[cfg(test)]
mod testing;

pub use definition::{
    validate_definition_id, Definition, MachineSpec, State, TransitionMap, TransitionTable,
};
pub use engine::{apply, ApplyResult};
pub use error::DefinitionError;
pub use partition::{
    PartitionAssignor, PartitionPolicy, PartitionRange, MAX_PARTITION, MIN_PARTITION,
};
