//! In-memory partitioned bus.

use crate::error::BusError;
use crate::record::{ProducerRecord, Record, RecordMetadata};
use crate::{MessageBus, PartitionConsumer, DEFAULT_MAX_RECORD_SIZE};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// (topic, group, partition)
type GroupKey = (String, String, u32);

struct PartitionLog {
    records: RwLock<Vec<Record>>,
    appended: Notify,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }

    fn get(&self, offset: u64) -> Option<Record> {
        self.records.read().get(offset as usize).cloned()
    }

    fn end_offset(&self) -> u64 {
        self.records.read().len() as u64
    }
}

struct Topic {
    partitions: Vec<PartitionLog>,
}

impl Topic {
    fn partition(&self, partition: u32) -> Result<&PartitionLog, BusError> {
        self.partitions
            .get(partition as usize)
            .ok_or(BusError::PartitionOutOfRange {
                partition,
                partitions: self.partitions.len() as u32,
            })
    }
}

struct BusInner {
    topics: DashMap<String, Arc<Topic>>,
    /// Next offset to deliver after a rewind.
    committed: DashMap<GroupKey, u64>,
    owners: DashMap<GroupKey, ()>,
    max_record_size: usize,
    available: AtomicBool,
    closed: AtomicBool,
}

impl BusInner {
    fn topic(&self, name: &str) -> Result<Arc<Topic>, BusError> {
        self.topics
            .get(name)
            .map(|t| t.clone())
            .ok_or_else(|| BusError::UnknownTopic(name.to_string()))
    }

    fn check_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus is not accepting requests".into()));
        }
        Ok(())
    }
}

/// Partitioned, offset-addressed bus held in process memory.
///
/// Records are never evicted. Committed offsets are tracked per
/// (topic, group, partition).
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_max_record_size(DEFAULT_MAX_RECORD_SIZE)
    }

    pub fn with_max_record_size(max_record_size: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                committed: DashMap::new(),
                owners: DashMap::new(),
                max_record_size,
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a topic. Existing topics are left untouched.
    pub fn create_topic(&self, name: impl Into<String>, partitions: u32) {
        let name = name.into();
        self.inner.topics.entry(name.clone()).or_insert_with(|| {
            tracing::info!("Created topic {} with {} partitions", name, partitions);
            Arc::new(Topic {
                partitions: (0..partitions).map(|_| PartitionLog::new()).collect(),
            })
        });
    }

    /// Offset the next published record of a partition will get.
    pub fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, BusError> {
        let t = self.inner.topic(topic)?;
        Ok(t.partition(partition)?.end_offset())
    }

    /// Next offset a group will read from a partition after a rewind.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> u64 {
        self.inner
            .committed
            .get(&(topic.to_string(), group.to_string(), partition))
            .map(|o| *o)
            .unwrap_or(0)
    }

    /// Toggles availability. While unavailable, publish and commit fail with
    /// a retryable error.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Closes the bus and wakes every waiting consumer.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for topic in self.inner.topics.iter() {
            for log in &topic.partitions {
                log.appended.notify_waiters();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, record: ProducerRecord) -> Result<RecordMetadata, BusError> {
        self.inner.check_open()?;
        if record.payload.len() > self.inner.max_record_size {
            return Err(BusError::RecordTooLarge {
                size: record.payload.len(),
                max: self.inner.max_record_size,
            });
        }

        let topic = self.inner.topic(&record.topic)?;
        let log = topic.partition(record.partition)?;

        let stored = {
            let mut records = log.records.write();
            let stored = Record {
                offset: records.len() as u64,
                topic: record.topic,
                partition: record.partition,
                key: record.key,
                payload: record.payload,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            records.push(stored.clone());
            stored
        };
        log.appended.notify_waiters();

        Ok(stored.metadata())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        partition: u32,
    ) -> Result<Box<dyn PartitionConsumer>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.inner.topic(topic)?.partition(partition)?;

        let key = (topic.to_string(), group.to_string(), partition);
        match self.inner.owners.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(BusError::PartitionAssigned {
                    topic: topic.to_string(),
                    group: group.to_string(),
                    partition,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let position = self.committed_offset(topic, group, partition);
        tracing::debug!(
            "Group {} claimed {}/{} at offset {}",
            group,
            topic,
            partition,
            position
        );

        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            key,
            position,
        }))
    }

    fn partition_count(&self, topic: &str) -> Result<u32, BusError> {
        Ok(self.inner.topic(topic)?.partitions.len() as u32)
    }
}

/// Consumer of one partition of a [`MemoryBus`].
///
/// Ownership of the partition is released on drop.
pub struct MemoryConsumer {
    inner: Arc<BusInner>,
    key: GroupKey,
    position: u64,
}

impl MemoryConsumer {
    fn topic(&self) -> &str {
        &self.key.0
    }
}

#[async_trait]
impl PartitionConsumer for MemoryConsumer {
    fn partition(&self) -> u32 {
        self.key.2
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn poll(&mut self) -> Result<Record, BusError> {
        let topic = self.inner.topic(self.topic())?;
        let log = topic.partition(self.partition())?;

        loop {
            // Registered before the check so an append in between still wakes us.
            let appended = log.appended.notified();

            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(BusError::Closed);
            }
            if let Some(record) = log.get(self.position) {
                self.position += 1;
                return Ok(record);
            }

            appended.await;
        }
    }

    async fn commit(&mut self, offset: u64) -> Result<(), BusError> {
        self.inner.check_open()?;
        if offset >= self.position {
            return Err(BusError::InvalidCommit {
                offset,
                position: self.position,
            });
        }

        let next = offset + 1;
        self.inner
            .committed
            .entry(self.key.clone())
            .and_modify(|c| *c = (*c).max(next))
            .or_insert(next);
        Ok(())
    }

    async fn rewind(&mut self) -> Result<(), BusError> {
        let committed = self
            .inner
            .committed
            .get(&self.key)
            .map(|o| *o)
            .unwrap_or(0);
        tracing::debug!(
            "Rewinding {}/{} from {} to {}",
            self.topic(),
            self.partition(),
            self.position,
            committed
        );
        self.position = committed;
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.inner.owners.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.create_topic("events", 7);
        bus
    }

    fn record(partition: u32, key: &str, payload: &'static str) -> ProducerRecord {
        ProducerRecord::new("events", partition, key, payload)
    }

    #[tokio::test]
    async fn test_publish_assigns_sequential_offsets() {
        let bus = bus();
        let a = bus.publish(record(3, "i-1", "a")).await.unwrap();
        let b = bus.publish(record(3, "i-2", "b")).await.unwrap();
        let c = bus.publish(record(4, "i-1", "c")).await.unwrap();

        assert_eq!((a.partition, a.offset), (3, 0));
        assert_eq!((b.partition, b.offset), (3, 1));
        assert_eq!((c.partition, c.offset), (4, 0));
        assert_eq!(bus.end_offset("events", 3).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_poll_in_publish_order() {
        let bus = bus();
        for payload in ["a", "b", "c"] {
            bus.publish(record(0, "k", payload)).await.unwrap();
        }

        let mut consumer = bus.subscribe("events", "g", 0).await.unwrap();
        for (offset, payload) in ["a", "b", "c"].iter().enumerate() {
            let rec = consumer.poll().await.unwrap();
            assert_eq!(rec.offset, offset as u64);
            assert_eq!(&rec.payload[..], payload.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_rewind_redelivers_uncommitted() {
        let bus = bus();
        for payload in ["a", "b", "c"] {
            bus.publish(record(1, "k", payload)).await.unwrap();
        }

        let mut consumer = bus.subscribe("events", "g", 1).await.unwrap();
        let first = consumer.poll().await.unwrap();
        consumer.commit(first.offset).await.unwrap();
        consumer.poll().await.unwrap();
        assert_eq!(consumer.position(), 2);

        consumer.rewind().await.unwrap();
        assert_eq!(consumer.position(), 1);
        assert_eq!(consumer.poll().await.unwrap().offset, 1);
        assert_eq!(bus.committed_offset("events", "g", 1), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_resumes_from_commit() {
        let bus = bus();
        for payload in ["a", "b"] {
            bus.publish(record(2, "k", payload)).await.unwrap();
        }

        {
            let mut consumer = bus.subscribe("events", "g", 2).await.unwrap();
            let rec = consumer.poll().await.unwrap();
            consumer.commit(rec.offset).await.unwrap();
        }

        let mut consumer = bus.subscribe("events", "g", 2).await.unwrap();
        assert_eq!(consumer.poll().await.unwrap().offset, 1);

        let mut other = bus.subscribe("events", "other", 2).await.unwrap();
        assert_eq!(other.poll().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_single_owner_per_group_partition() {
        let bus = bus();
        let consumer = bus.subscribe("events", "g", 5).await.unwrap();
        let err = bus.subscribe("events", "g", 5).await.err().unwrap();
        assert!(matches!(err, BusError::PartitionAssigned { partition: 5, .. }));

        drop(consumer);
        assert!(bus.subscribe("events", "g", 5).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_unknown_topic_and_partition() {
        let bus = bus();
        let err = bus
            .publish(ProducerRecord::new("nope", 0, "k", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownTopic(_)));

        let err = bus.publish(record(7, "k", "x")).await.unwrap_err();
        assert!(matches!(
            err,
            BusError::PartitionOutOfRange {
                partition: 7,
                partitions: 7
            }
        ));
        assert_eq!(bus.partition_count("events").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_commit_beyond_position_rejected() {
        let bus = bus();
        bus.publish(record(0, "k", "a")).await.unwrap();
        let mut consumer = bus.subscribe("events", "g", 0).await.unwrap();
        assert!(matches!(
            consumer.commit(0).await,
            Err(BusError::InvalidCommit { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_is_retryable() {
        let bus = bus();
        bus.set_available(false);
        let err = bus.publish(record(0, "k", "a")).await.unwrap_err();
        assert!(err.is_retryable());

        bus.set_available(true);
        assert!(bus.publish(record(0, "k", "a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_poll_waits_for_publish() {
        let bus = bus();
        let mut consumer = bus.subscribe("events", "g", 6).await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(record(6, "k", "late")).await.unwrap();
        });

        let rec = tokio::time::timeout(Duration::from_secs(2), consumer.poll())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&rec.payload[..], b"late");
    }

    #[tokio::test]
    async fn test_close_wakes_pollers() {
        let bus = bus();
        let mut consumer = bus.subscribe("events", "g", 0).await.unwrap();

        let closer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), consumer.poll())
            .await
            .unwrap();
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn test_record_size_limit() {
        let bus = MemoryBus::with_max_record_size(4);
        bus.create_topic("events", 1);
        let err = bus
            .publish(ProducerRecord::new("events", 0, "k", "too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::RecordTooLarge { size: 8, max: 4 }));
    }
}
