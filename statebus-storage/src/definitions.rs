//! Definition store: documents keyed by definition id.

use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use statebus_core::{Definition, MachineSpec};
use std::sync::Arc;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A document with the same id already exists; nothing was written.
    Conflict,
}

/// Document store holding machine definitions.
///
/// All operations address a single key. Implementations must be safe for
/// concurrent use.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Fetches a definition by id.
    async fn get(&self, id: &str) -> Result<Option<Definition>, StorageError>;

    /// Stores a definition unless one with the same id exists.
    async fn insert_if_absent(&self, definition: &Definition)
        -> Result<InsertOutcome, StorageError>;

    /// Replaces the mutable fields (states, events, transitions).
    ///
    /// Returns the updated document, or `None` if the id is unknown.
    async fn update_fields(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<Option<Definition>, StorageError>;

    /// Removes a definition, returning the removed document.
    async fn delete(&self, id: &str) -> Result<Option<Definition>, StorageError>;
}

#[async_trait]
impl<S> DefinitionStore for Arc<S>
where
    S: DefinitionStore + ?Sized,
{
    async fn get(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        (**self).get(id).await
    }

    async fn insert_if_absent(
        &self,
        definition: &Definition,
    ) -> Result<InsertOutcome, StorageError> {
        (**self).insert_if_absent(definition).await
    }

    async fn update_fields(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<Option<Definition>, StorageError> {
        (**self).update_fields(id, spec).await
    }

    async fn delete(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        (**self).delete(id).await
    }
}

/// In-memory definition store.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    definitions: DashMap<String, Definition>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        Ok(self.definitions.get(id).map(|r| r.clone()))
    }

    async fn insert_if_absent(
        &self,
        definition: &Definition,
    ) -> Result<InsertOutcome, StorageError> {
        match self.definitions.entry(definition.id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(definition.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn update_fields(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<Option<Definition>, StorageError> {
        Ok(self.definitions.get_mut(id).map(|mut def| {
            def.spec = spec.clone();
            def.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        Ok(self.definitions.remove(id).map(|(_, def)| def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(id: &str) -> Definition {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "order",
            "states": ["new", "paid", "shipped"],
            "events": ["pay", "ship"],
            "transitions": {"new": {"pay": "paid"}, "paid": {"ship": "shipped"}},
            "partition": 3
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryDefinitionStore::new();
        let def = sample("d-1");

        assert_eq!(
            store.insert_if_absent(&def).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(store.get("d-1").await.unwrap(), Some(def));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_conflict_keeps_original() {
        let store = MemoryDefinitionStore::new();
        store.insert_if_absent(&sample("d-1")).await.unwrap();

        let mut other = sample("d-1");
        other.partition = 5;
        assert_eq!(
            store.insert_if_absent(&other).await.unwrap(),
            InsertOutcome::Conflict
        );
        assert_eq!(store.get("d-1").await.unwrap().unwrap().partition, 3);
    }

    #[tokio::test]
    async fn test_update_fields_only_touches_spec() {
        let store = MemoryDefinitionStore::new();
        store.insert_if_absent(&sample("d-1")).await.unwrap();

        let spec = MachineSpec {
            states: vec!["a".into(), "b".into()],
            events: vec!["go".into()],
            transitions: Default::default(),
        };
        let updated = store.update_fields("d-1", &spec).await.unwrap().unwrap();

        assert_eq!(updated.spec, spec);
        assert_eq!(updated.name, "order");
        assert_eq!(updated.partition, 3);
        assert!(store.update_fields("nope", &spec).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryDefinitionStore::new();
        store.insert_if_absent(&sample("d-1")).await.unwrap();

        assert!(store.delete("d-1").await.unwrap().is_some());
        assert!(store.delete("d-1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_arc_dyn_store() {
        let store: Arc<dyn DefinitionStore> = Arc::new(MemoryDefinitionStore::new());
        store.insert_if_absent(&sample("d-1")).await.unwrap();
        assert!(store.get("d-1").await.unwrap().is_some());
    }
}
