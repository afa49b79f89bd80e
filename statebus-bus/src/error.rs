//! Bus error types.

use thiserror::Error;

/// Errors from the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("partition {partition} out of range (topic has {partitions} partitions)")]
    PartitionOutOfRange { partition: u32, partitions: u32 },

    #[error("partition {partition} of {topic} is already owned by a member of group {group}")]
    PartitionAssigned {
        topic: String,
        group: String,
        partition: u32,
    },

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("commit offset {offset} is beyond the consumed position {position}")]
    InvalidCommit { offset: u64, position: u64 },

    #[error("bus is closed")]
    Closed,

    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

impl BusError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Unavailable(_))
    }
}
