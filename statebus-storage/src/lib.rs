//! # statebus-storage
//!
//! Storage adapters for statebus.
//!
//! This crate provides:
//! - The definition store contract, with in-memory and file-backed stores
//! - The state cache contract, with in-memory and Redis (feature `redis`) caches

pub mod cache;
pub mod definitions;
pub mod error;
pub mod file;
#[cfg(feature = "redis")]
pub mod redis;

pub use cache::{MemoryStateCache, StateCache};
pub use definitions::{DefinitionStore, InsertOutcome, MemoryDefinitionStore};
pub use error::StorageError;
pub use file::{DocumentMeta, FileDefinitionStore};
#[cfg(feature = "redis")]
pub use crate::redis::RedisStateCache;
