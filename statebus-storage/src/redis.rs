//! Redis-backed state cache (feature `redis`).
//!
//! Each instance maps to one string key: `<prefix><instance_id>`.

use crate::cache::StateCache;
use crate::error::StorageError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

/// State cache stored in Redis.
#[derive(Clone)]
pub struct RedisStateCache {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStateCache {
    /// Connects to Redis (e.g. `redis://localhost:6379`).
    pub async fn connect(
        redis_url: impl AsRef<str>,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Connected to Redis state cache");
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, instance_id: &str) -> String {
        format!("{}{}", self.key_prefix, instance_id)
    }
}

#[async_trait]
impl StateCache for RedisStateCache {
    async fn get(&self, instance_id: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(instance_id))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, instance_id: &str, state: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(instance_id))
            .arg(state)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
