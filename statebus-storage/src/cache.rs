//! State cache: current state per instance id.

use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Key/value cache holding each instance's current state.
///
/// An absent key means the instance has not transitioned yet.
#[async_trait]
pub trait StateCache: Send + Sync {
    /// Reads the current state of an instance.
    async fn get(&self, instance_id: &str) -> Result<Option<String>, StorageError>;

    /// Overwrites the current state of an instance.
    async fn set(&self, instance_id: &str, state: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<C> StateCache for Arc<C>
where
    C: StateCache + ?Sized,
{
    async fn get(&self, instance_id: &str) -> Result<Option<String>, StorageError> {
        (**self).get(instance_id).await
    }

    async fn set(&self, instance_id: &str, state: &str) -> Result<(), StorageError> {
        (**self).set(instance_id, state).await
    }
}

/// In-memory state cache.
#[derive(Debug, Default)]
pub struct MemoryStateCache {
    states: DashMap<String, String>,
}

impl MemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, for inspection.
    pub fn peek(&self, instance_id: &str) -> Option<String> {
        self.states.get(instance_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl StateCache for MemoryStateCache {
    async fn get(&self, instance_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.peek(instance_id))
    }

    async fn set(&self, instance_id: &str, state: &str) -> Result<(), StorageError> {
        self.states
            .insert(instance_id.to_string(), state.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let cache = MemoryStateCache::new();
        assert!(cache.get("i-1").await.unwrap().is_none());

        cache.set("i-1", "paid").await.unwrap();
        assert_eq!(cache.get("i-1").await.unwrap().as_deref(), Some("paid"));

        cache.set("i-1", "shipped").await.unwrap();
        assert_eq!(cache.peek("i-1").as_deref(), Some("shipped"));
        assert_eq!(cache.len(), 1);
    }
}
