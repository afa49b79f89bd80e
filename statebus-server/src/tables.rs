//! In-process cache of compiled transition tables.

use dashmap::DashMap;
use statebus_core::{Definition, DefinitionError, TransitionTable};
use std::sync::Arc;

/// Compiled tables keyed by definition id.
///
/// Each entry is checked against the definition's fingerprint on lookup, so a
/// definition updated by another process is recompiled on first use.
#[derive(Debug, Default)]
pub struct TableCache {
    tables: DashMap<String, Arc<TransitionTable>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached table for `definition`, compiling it if missing or
    /// stale.
    pub fn get_or_compile(
        &self,
        definition: &Definition,
    ) -> Result<Arc<TransitionTable>, DefinitionError> {
        let fingerprint = definition.spec.fingerprint();
        let cached = self.tables.get(&definition.id).map(|t| t.clone());
        if let Some(table) = cached {
            if table.fingerprint() == fingerprint {
                return Ok(table);
            }
            tracing::debug!("Recompiling stale table for {}", definition.id);
        }

        let table = match definition.compile() {
            Ok(table) => Arc::new(table),
            Err(e) => {
                self.tables.remove(&definition.id);
                return Err(e);
            }
        };
        self.tables.insert(definition.id.clone(), table.clone());
        Ok(table)
    }

    /// Drops the cached table for a definition.
    pub fn invalidate(&self, id: &str) -> bool {
        self.tables.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tables.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statebus_core::MachineSpec;

    fn definition(states: &[&str]) -> Definition {
        Definition {
            id: "d-1".into(),
            name: "test".into(),
            spec: MachineSpec {
                states: states.iter().map(|s| s.to_string()).collect(),
                events: vec!["go".into()],
                transitions: Default::default(),
            },
            partition: 0,
        }
    }

    #[test]
    fn test_reuses_compiled_table() {
        let cache = TableCache::new();
        let def = definition(&["a", "b"]);

        let first = cache.get_or_compile(&def).unwrap();
        let second = cache.get_or_compile(&def).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_recompiles_when_fingerprint_changes() {
        let cache = TableCache::new();
        let first = cache.get_or_compile(&definition(&["a", "b"])).unwrap();
        let second = cache.get_or_compile(&definition(&["x", "y"])).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.initial().as_str(), "x");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_definition_not_cached() {
        let cache = TableCache::new();
        cache.get_or_compile(&definition(&["a"])).unwrap();

        let err = cache.get_or_compile(&definition(&[])).unwrap_err();
        assert_eq!(err, DefinitionError::NoStates);
        assert!(!cache.contains("d-1"));
    }

    #[test]
    fn test_invalidate() {
        let cache = TableCache::new();
        cache.get_or_compile(&definition(&["a"])).unwrap();
        assert!(cache.invalidate("d-1"));
        assert!(!cache.invalidate("d-1"));
        assert!(cache.is_empty());
    }
}
