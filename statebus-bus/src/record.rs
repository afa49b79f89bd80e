//! Records as produced to and consumed from the bus.

use bytes::Bytes;

/// A record to publish.
///
/// The partition is always explicit; the key travels with the record but is
/// never used for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: u32,
    pub key: String,
    pub payload: Bytes,
}

impl ProducerRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        key: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Acknowledgement for a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Append time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A record delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Bytes,
    pub timestamp: i64,
}

impl Record {
    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
        }
    }
}
