//! Shared test fixtures.

use async_trait::async_trait;
use statebus_core::{Definition, MachineSpec};
use statebus_storage::{MemoryStateCache, StateCache, StorageError};
use std::sync::atomic::{AtomicU32, Ordering};

/// new --pay--> paid --ship--> shipped
pub fn order_definition(id: &str, partition: u32) -> Definition {
    Definition {
        id: id.to_string(),
        name: "order".to_string(),
        spec: order_spec(),
        partition,
    }
}

pub fn order_spec() -> MachineSpec {
    serde_json::from_value(serde_json::json!({
        "states": ["new", "paid", "shipped"],
        "events": ["pay", "ship"],
        "transitions": {"new": {"pay": "paid"}, "paid": {"ship": "shipped"}}
    }))
    .unwrap()
}

/// State cache whose first writes fail with a retryable error.
pub struct FlakyStateCache {
    inner: MemoryStateCache,
    failures_left: AtomicU32,
    set_calls: AtomicU32,
}

impl FlakyStateCache {
    pub fn failing_writes(failures: u32) -> Self {
        Self {
            inner: MemoryStateCache::new(),
            failures_left: AtomicU32::new(failures),
            set_calls: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryStateCache {
        &self.inner
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateCache for FlakyStateCache {
    async fn get(&self, instance_id: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(instance_id).await
    }

    async fn set(&self, instance_id: &str, state: &str) -> Result<(), StorageError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Unavailable("cache write refused".into()));
        }
        self.inner.set(instance_id, state).await
    }
}
