//! Partition workers.
//!
//! One task per partition, strictly sequential within it. A record's offset
//! is committed only after the pipeline reports a final outcome, which for
//! accepted events means after the state cache write. On a transient failure
//! the worker rewinds to the last committed offset and retries with capped
//! exponential backoff, so later records never overtake a failed one.

use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::pipeline::{EventPipeline, Outcome};
use statebus_bus::{BusError, MessageBus, PartitionConsumer};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the next delay and doubles the following one, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Settings shared by all workers of a group.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group_id: String,
    pub partitions: Vec<u32>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Per-worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub dropped: u64,
    /// Transient failures that caused a rewind.
    pub retries: u64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.accepted + self.rejected + self.dropped
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Accepted(_) => self.accepted += 1,
            Outcome::Rejected(_) => self.rejected += 1,
            Outcome::Dropped(_) => self.dropped += 1,
        }
    }
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.dropped += other.dropped;
        self.retries += other.retries;
    }
}

/// Consumes one partition until shutdown or bus close.
pub struct PartitionWorker {
    consumer: Box<dyn PartitionConsumer>,
    pipeline: Arc<EventPipeline>,
    backoff: Backoff,
    shutdown: broadcast::Receiver<()>,
    stats: WorkerStats,
}

impl PartitionWorker {
    pub fn new(
        consumer: Box<dyn PartitionConsumer>,
        pipeline: Arc<EventPipeline>,
        backoff: Backoff,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            consumer,
            pipeline,
            backoff,
            shutdown,
            stats: WorkerStats::default(),
        }
    }

    pub async fn run(mut self) -> WorkerStats {
        let partition = self.consumer.partition();
        tracing::info!(
            "Worker for partition {} started at offset {}",
            partition,
            self.consumer.position()
        );

        loop {
            let polled = tokio::select! {
                polled = self.consumer.poll() => polled,
                _ = self.shutdown.recv() => break,
            };

            let record = match polled {
                Ok(record) => record,
                Err(BusError::Closed) => break,
                Err(e) if e.is_retryable() => {
                    tracing::error!("Poll failed on partition {}: {}", partition, e);
                    if !self.pause().await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!("Worker for partition {} stopping: {}", partition, e);
                    break;
                }
            };

            let result = match self.pipeline.handle(&record).await {
                Ok(outcome) => self
                    .consumer
                    .commit(record.offset)
                    .await
                    .map(|_| outcome)
                    .map_err(ServiceError::from),
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => {
                    self.stats.record(&outcome);
                    self.backoff.reset();
                }
                Err(ServiceError::Bus(BusError::Closed)) => break,
                Err(e) => {
                    self.stats.retries += 1;
                    tracing::error!(
                        "Retrying partition {} from last commit after failure at offset {}: {}",
                        partition,
                        record.offset,
                        e
                    );
                    if let Err(e) = self.consumer.rewind().await {
                        tracing::error!("Rewind failed on partition {}: {}", partition, e);
                    }
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "Worker for partition {} stopped ({} processed, {} retries)",
            partition,
            self.stats.processed(),
            self.stats.retries
        );
        self.stats
    }

    /// Sleeps for the next backoff delay. Returns false if shutdown was
    /// signalled meanwhile.
    async fn pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.recv() => false,
        }
    }
}

/// The set of partition workers owned by this process.
pub struct ConsumerGroup {
    workers: Vec<(u32, JoinHandle<WorkerStats>)>,
    shutdown: broadcast::Sender<()>,
    metrics: Option<Arc<Metrics>>,
}

impl ConsumerGroup {
    /// Claims every configured partition and starts its worker.
    pub async fn start(
        bus: Arc<dyn MessageBus>,
        pipeline: Arc<EventPipeline>,
        settings: &ConsumerSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, ServiceError> {
        let (shutdown, _) = broadcast::channel(1);

        let mut consumers = Vec::with_capacity(settings.partitions.len());
        for &partition in &settings.partitions {
            let consumer = bus
                .subscribe(&settings.topic, &settings.group_id, partition)
                .await?;
            consumers.push(consumer);
        }

        let workers: Vec<_> = consumers
            .into_iter()
            .map(|consumer| {
                let partition = consumer.partition();
                let worker = PartitionWorker::new(
                    consumer,
                    pipeline.clone(),
                    Backoff::new(settings.backoff_initial, settings.backoff_max),
                    shutdown.subscribe(),
                );
                (partition, tokio::spawn(worker.run()))
            })
            .collect();

        if let Some(ref metrics) = metrics {
            metrics.partitions_owned.set(workers.len() as f64);
        }
        tracing::info!(
            "Consumer group {} started on {} partitions of {}",
            settings.group_id,
            workers.len(),
            settings.topic
        );

        Ok(Self {
            workers,
            shutdown,
            metrics,
        })
    }

    /// Partitions with a worker.
    pub fn partitions(&self) -> Vec<u32> {
        self.workers.iter().map(|(p, _)| *p).collect()
    }

    /// Stops every worker after its current record and waits for them.
    pub async fn shutdown(self) -> WorkerStats {
        // workers that already exited have dropped their receivers
        let _ = self.shutdown.send(());

        let mut total = WorkerStats::default();
        for (partition, handle) in self.workers {
            match handle.await {
                Ok(stats) => total += stats,
                Err(e) => tracing::error!("Worker for partition {} panicked: {}", partition, e),
            }
        }

        if let Some(ref metrics) = self.metrics {
            metrics.partitions_owned.set(0.0);
        }
        total
    }
}
