//! Process wiring: builds the adapters from configuration and starts the
//! consumer group and the metrics endpoint.

use crate::broadcast::TransitionBroadcaster;
use crate::config::{CacheBackend, Config, StorageBackend};
use crate::consumer::{ConsumerGroup, ConsumerSettings, WorkerStats};
use crate::error::StartupError;
use crate::io::IoPolicy;
use crate::lifecycle::DefinitionService;
use crate::metrics::{run_metrics_server, Metrics};
use crate::pipeline::EventPipeline;
use crate::producer::EventProducer;
use crate::tables::TableCache;
use statebus_bus::{MemoryBus, MessageBus};
use statebus_storage::{
    DefinitionStore, FileDefinitionStore, MemoryDefinitionStore, MemoryStateCache, StateCache,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const BROADCAST_CAPACITY: usize = 1024;

/// A running service instance.
pub struct Runtime {
    definitions: Arc<DefinitionService>,
    producer: Arc<EventProducer>,
    broadcaster: Arc<TransitionBroadcaster>,
    bus: Arc<dyn MessageBus>,
    consumers: ConsumerGroup,
    metrics: Option<Arc<Metrics>>,
    metrics_shutdown: broadcast::Sender<()>,
    metrics_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Builds every adapter named by `config` and starts consuming.
    pub async fn start(config: Config) -> Result<Self, StartupError> {
        config.validate()?;

        let store: Arc<dyn DefinitionStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryDefinitionStore::new()),
            StorageBackend::File => {
                tracing::info!(
                    "Definition store: {}",
                    config.storage.data_dir.display()
                );
                Arc::new(FileDefinitionStore::open(&config.storage.data_dir)?)
            }
        };

        let cache = build_cache(&config).await?;

        let bus = MemoryBus::new();
        bus.create_topic(config.bus.topic.as_str(), config.bus.partitions);

        Self::with_components(config, store, cache, Arc::new(bus)).await
    }

    /// Starts with caller-supplied adapters. The bus must already carry the
    /// configured topic.
    pub async fn with_components(
        config: Config,
        store: Arc<dyn DefinitionStore>,
        cache: Arc<dyn StateCache>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let partitions = bus.partition_count(&config.bus.topic)?;
        if partitions != config.bus.partitions {
            tracing::warn!(
                "Topic {} has {} partitions, configured {}",
                config.bus.topic,
                partitions,
                config.bus.partitions
            );
        }

        let metrics = if config.metrics.enabled {
            Some(Arc::new(Metrics::new()?))
        } else {
            None
        };

        let mut io = IoPolicy::new(config.consumer.io_timeout());
        if let Some(ref m) = metrics {
            io = io.with_metrics(m.clone());
        }

        let tables = Arc::new(TableCache::new());
        let broadcaster = Arc::new(TransitionBroadcaster::new(BROADCAST_CAPACITY));

        let mut definitions = DefinitionService::new(
            store.clone(),
            tables.clone(),
            config.partition_assignor(),
            io.clone(),
        );
        let mut producer =
            EventProducer::new(store.clone(), bus.clone(), config.bus.topic.as_str(), io.clone());
        let mut pipeline =
            EventPipeline::new(store, cache, tables, io).with_broadcaster(broadcaster.clone());
        if let Some(ref m) = metrics {
            definitions = definitions.with_metrics(m.clone());
            producer = producer.with_metrics(m.clone());
            pipeline = pipeline.with_metrics(m.clone());
        }

        let settings = ConsumerSettings {
            topic: config.bus.topic.clone(),
            group_id: config.bus.group_id.clone(),
            partitions: config.consumed_partitions(),
            backoff_initial: config.consumer.backoff_initial(),
            backoff_max: config.consumer.backoff_max(),
        };
        let consumers =
            ConsumerGroup::start(bus.clone(), Arc::new(pipeline), &settings, metrics.clone())
                .await?;

        let (metrics_shutdown, _) = broadcast::channel(1);
        let metrics_handle = match metrics {
            Some(ref m) => {
                let addr = config.metrics.bind_addr;
                let m = m.clone();
                let rx = metrics_shutdown.subscribe();
                Some(tokio::spawn(async move {
                    if let Err(e) = run_metrics_server(addr, m, rx).await {
                        tracing::error!("Metrics server error: {}", e);
                    }
                }))
            }
            None => None,
        };

        tracing::info!(
            "Runtime started: topic {}, group {}, partitions {:?}, assignment {:?} {}..={}",
            config.bus.topic,
            config.bus.group_id,
            consumers.partitions(),
            config.partitioning.policy,
            config.partitioning.min,
            config.partitioning.max
        );

        Ok(Self {
            definitions: Arc::new(definitions),
            producer: Arc::new(producer),
            broadcaster,
            bus,
            consumers,
            metrics,
            metrics_shutdown,
            metrics_handle,
        })
    }

    pub fn definitions(&self) -> &Arc<DefinitionService> {
        &self.definitions
    }

    pub fn producer(&self) -> &Arc<EventProducer> {
        &self.producer
    }

    pub fn broadcaster(&self) -> &Arc<TransitionBroadcaster> {
        &self.broadcaster
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    pub fn partitions(&self) -> Vec<u32> {
        self.consumers.partitions()
    }

    /// Stops consuming and the metrics endpoint.
    pub async fn shutdown(self) -> WorkerStats {
        let stats = self.consumers.shutdown().await;

        let _ = self.metrics_shutdown.send(());
        if let Some(handle) = self.metrics_handle {
            let _ = handle.await;
        }

        tracing::info!(
            "Runtime stopped ({} accepted, {} rejected, {} dropped, {} retries)",
            stats.accepted,
            stats.rejected,
            stats.dropped,
            stats.retries
        );
        stats
    }
}

async fn build_cache(config: &Config) -> Result<Arc<dyn StateCache>, StartupError> {
    match config.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryStateCache::new())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            let cache = statebus_storage::RedisStateCache::connect(
                &config.cache.redis_url,
                config.cache.key_prefix.as_str(),
            )
            .await?;
            Ok(Arc::new(cache))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => Err(StartupError::Unsupported(
            "cache.backend is redis but statebus was built without the redis feature".into(),
        )),
    }
}
