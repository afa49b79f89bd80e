//! # statebus-bus
//!
//! Message bus adapter for statebus.
//!
//! Topics are split into numbered partitions. Each partition is an
//! append-only log addressed by offset. Consumers read one partition on
//! behalf of a group and commit offsets explicitly; after a rewind, delivery
//! resumes from the last committed offset (at-least-once).

pub mod error;
pub mod memory;
pub mod record;

pub use error::BusError;
pub use memory::{MemoryBus, MemoryConsumer};
pub use record::{ProducerRecord, Record, RecordMetadata};

use async_trait::async_trait;
use std::sync::Arc;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// A partitioned message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Appends a record to the given partition.
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError>;

    /// Claims a partition for a consumer group.
    ///
    /// Only one consumer per (topic, group, partition) may exist at a time.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn PartitionConsumer>, BusError>;

    /// Number of partitions of a topic.
    fn partition_count(&self, topic: &str) -> Result<u32, BusError>;
}

#[async_trait]
impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError> {
        (**self).publish(record).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn PartitionConsumer>, BusError> {
        (**self).subscribe(topic, group, partition).await
    }

    fn partition_count(&self, topic: &str) -> Result<u32, BusError> {
        (**self).partition_count(topic)
    }
}

/// Reader for a single partition on behalf of a consumer group.
#[async_trait]
pub trait PartitionConsumer: Send {
    fn partition(&self) -> u32;

    /// Offset of the next record `poll` will return.
    fn position(&self) -> u64;

    /// Waits for the next record.
    ///
    /// Cancel-safe: the position only advances when a record is returned.
    async fn poll(&mut self) -> Result<Record, BusError>;

    /// Marks every record up to and including `offset` as processed.
    async fn commit(&mut self, offset: u64) -> Result<(), BusError>;

    /// Moves the position back to the first uncommitted record.
    async fn rewind(&mut self) -> Result<(), BusError>;
}
