//! # statebus-server
//!
//! Service layer for statebus.
//!
//! This crate provides:
//! - Definition lifecycle (create, read, update, delete) with partition assignment
//! - Event production to the definition's partition
//! - Per-partition consumers applying events to the instance state cache
//! - Transition notifications for in-process watchers
//! - Configuration, Prometheus metrics and process wiring

pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod runtime;
pub mod tables;

#[cfg(test)]
mod testing;

pub use broadcast::{EventFilter, TransitionBroadcaster, TransitionEvent, Watch};
pub use config::{
    BusConfig, CacheBackend, CacheConfig, Config, ConfigError, ConsumerConfig, MetricsConfig,
    PartitioningConfig, StorageBackend, StorageConfig,
};
pub use consumer::{Backoff, ConsumerGroup, ConsumerSettings, PartitionWorker, WorkerStats};
pub use error::{ServiceError, StartupError};
pub use io::IoPolicy;
pub use lifecycle::{DefinitionService, NewDefinition};
pub use metrics::Metrics;
pub use pipeline::{DropReason, EventPipeline, Outcome, Transition};
pub use producer::{EventProducer, PublishReceipt};
pub use runtime::Runtime;
pub use tables::TableCache;
