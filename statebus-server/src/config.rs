//! Service configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or STATEBUS_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use statebus_core::{
    PartitionAssignor, PartitionPolicy, PartitionRange, MAX_PARTITION, MIN_PARTITION,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message bus configuration.
    pub bus: BusConfig,
    /// Partition assignment for new definitions.
    pub partitioning: PartitioningConfig,
    /// Definition store configuration.
    pub storage: StorageConfig,
    /// State cache configuration.
    pub cache: CacheConfig,
    /// Consumer configuration.
    pub consumer: ConsumerConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from `path` (or STATEBUS_CONFIG when `path` is
    /// `None`), then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("STATEBUS_CONFIG") {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.bus.apply_overrides(&var);
        self.partitioning.apply_overrides(&var);
        self.storage.apply_overrides(&var);
        self.cache.apply_overrides(&var);
        self.consumer.apply_overrides(&var);
        self.metrics.apply_overrides(&var);
    }

    /// Checks cross-section constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.topic.is_empty() {
            return Err(ConfigError::ValidationError(
                "bus.topic must not be empty".into(),
            ));
        }
        if self.bus.group_id.is_empty() {
            return Err(ConfigError::ValidationError(
                "bus.group_id must not be empty".into(),
            ));
        }
        if self.bus.partitions == 0 {
            return Err(ConfigError::ValidationError(
                "bus.partitions must be at least 1".into(),
            ));
        }

        let p = &self.partitioning;
        if p.min > p.max {
            return Err(ConfigError::ValidationError(format!(
                "partitioning.min ({}) is greater than partitioning.max ({})",
                p.min, p.max
            )));
        }
        if p.max >= self.bus.partitions {
            return Err(ConfigError::ValidationError(format!(
                "partitioning.max ({}) does not exist on a bus with {} partitions",
                p.max, self.bus.partitions
            )));
        }

        if let Some(ref subset) = self.consumer.partitions {
            if let Some(bad) = subset.iter().find(|p| **p >= self.bus.partitions) {
                return Err(ConfigError::ValidationError(format!(
                    "consumer.partitions contains {} but the bus has {} partitions",
                    bad, self.bus.partitions
                )));
            }
        }

        self.consumer.validate()
    }

    /// Builds the partition assignor described by this configuration.
    pub fn partition_assignor(&self) -> PartitionAssignor {
        PartitionAssignor::new(self.partitioning.range(), self.partitioning.policy)
    }

    /// Partitions this process consumes, sorted and deduplicated.
    pub fn consumed_partitions(&self) -> Vec<u32> {
        let mut partitions = match self.consumer.partitions {
            Some(ref subset) => subset.clone(),
            None => (0..self.bus.partitions).collect(),
        };
        partitions.sort_unstable();
        partitions.dedup();
        partitions
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Topic carrying event envelopes.
    pub topic: String,
    /// Consumer group id.
    pub group_id: String,
    /// Number of partitions of the topic.
    pub partitions: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: "state-machine-events".to_string(),
            group_id: "statebus".to_string(),
            partitions: MAX_PARTITION - MIN_PARTITION + 1,
        }
    }
}

impl BusConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(topic) = var("STATEBUS_TOPIC") {
            self.topic = topic;
        }
        if let Some(group) = var("STATEBUS_GROUP_ID") {
            self.group_id = group;
        }
        if let Some(n) = var("STATEBUS_PARTITIONS").and_then(|v| v.parse().ok()) {
            self.partitions = n;
        }
    }
}

/// Partition assignment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitioningConfig {
    pub policy: PartitionPolicy,
    /// Lowest assignable partition (inclusive).
    pub min: u32,
    /// Highest assignable partition (inclusive).
    pub max: u32,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            policy: PartitionPolicy::default(),
            min: MIN_PARTITION,
            max: MAX_PARTITION,
        }
    }
}

impl PartitioningConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(policy) = var("STATEBUS_PARTITION_POLICY") {
            match policy.to_lowercase().as_str() {
                "random" => self.policy = PartitionPolicy::Random,
                "hashed" => self.policy = PartitionPolicy::Hashed,
                other => tracing::warn!("Ignoring unknown partition policy {:?}", other),
            }
        }
        if let Some(min) = var("STATEBUS_PARTITION_MIN").and_then(|v| v.parse().ok()) {
            self.min = min;
        }
        if let Some(max) = var("STATEBUS_PARTITION_MAX").and_then(|v| v.parse().ok()) {
            self.max = max;
        }
    }

    pub fn range(&self) -> PartitionRange {
        PartitionRange::new(self.min, self.max)
    }
}

/// Definition store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    File,
}

/// Definition store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Data directory for the file backend.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl StorageConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("STATEBUS_STORAGE") {
            match backend.to_lowercase().as_str() {
                "memory" => self.backend = StorageBackend::Memory,
                "file" => self.backend = StorageBackend::File,
                other => tracing::warn!("Ignoring unknown storage backend {:?}", other),
            }
        }
        if let Some(dir) = var("STATEBUS_DATA") {
            self.data_dir = PathBuf::from(dir);
        }
    }
}

/// State cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// State cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    /// Prepended to every instance id to form the cache key.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
        }
    }
}

impl CacheConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("STATEBUS_CACHE") {
            match backend.to_lowercase().as_str() {
                "memory" => self.backend = CacheBackend::Memory,
                "redis" => self.backend = CacheBackend::Redis,
                other => tracing::warn!("Ignoring unknown cache backend {:?}", other),
            }
        }
        if let Some(url) = var("STATEBUS_REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(prefix) = var("STATEBUS_REDIS_KEY_PREFIX") {
            self.key_prefix = prefix;
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Timeout for every store, cache and bus call.
    pub io_timeout_ms: u64,
    /// First retry delay after a transient failure.
    pub backoff_initial_ms: u64,
    /// Upper bound for the retry delay.
    pub backoff_max_ms: u64,
    /// Partitions to consume (all when unset).
    pub partitions: Option<Vec<u32>>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 5000,
            backoff_initial_ms: 100,
            backoff_max_ms: 10_000,
            partitions: None,
        }
    }
}

impl ConsumerConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(ms) = var("STATEBUS_IO_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.io_timeout_ms = ms;
        }
        if let Some(ms) = var("STATEBUS_BACKOFF_INITIAL_MS").and_then(|v| v.parse().ok()) {
            self.backoff_initial_ms = ms;
        }
        if let Some(ms) = var("STATEBUS_BACKOFF_MAX_MS").and_then(|v| v.parse().ok()) {
            self.backoff_max_ms = ms;
        }
        if let Some(list) = var("STATEBUS_CONSUMER_PARTITIONS") {
            let parsed: Result<Vec<u32>, _> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(partitions) if !partitions.is_empty() => self.partitions = Some(partitions),
                Ok(_) => self.partitions = None,
                Err(e) => tracing::warn!("Ignoring STATEBUS_CONSUMER_PARTITIONS: {}", e),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "consumer.io_timeout_ms must be positive".into(),
            ));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(ConfigError::ValidationError(
                "consumer backoff must satisfy 0 < backoff_initial_ms <= backoff_max_ms".into(),
            ));
        }
        Ok(())
    }

    /// Returns the I/O timeout as Duration.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = var("STATEBUS_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Some(addr) = var("STATEBUS_METRICS_BIND").and_then(|v| v.parse().ok()) {
            self.bind_addr = addr;
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
