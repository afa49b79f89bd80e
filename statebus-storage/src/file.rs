//! File-backed definition store.
//!
//! Layout under the store directory:
//!
//! ```text
//! definitions/<id>.json   one document per definition
//! index.json              id -> DocumentMeta (checksum, size, timestamps)
//! ```
//!
//! Documents are written to a temporary file and renamed into place. Reads
//! verify the CRC32C recorded in the index. The in-memory index only changes
//! after index.json has been persisted; a failed index write restores the
//! previous document so disk and index never disagree.

use crate::definitions::{DefinitionStore, InsertOutcome};
use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use statebus_core::{validate_definition_id, Definition, MachineSpec};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata recorded for each stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub created_at: i64,
    pub updated_at: i64,
}

struct Inner {
    dir: PathBuf,
    index: RwLock<HashMap<String, DocumentMeta>>,
    /// Serializes writers so check-then-write is atomic per store.
    write_lock: Mutex<()>,
}

/// Definition store persisting JSON documents in a directory.
#[derive(Clone)]
pub struct FileDefinitionStore {
    inner: Arc<Inner>,
}

impl FileDefinitionStore {
    /// Opens or creates a store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("definitions"))?;

        let inner = Inner {
            dir,
            index: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        };
        inner.load_index()?;

        tracing::info!(
            "Opened definition store at {} ({} definitions)",
            inner.dir.display(),
            inner.index.read().len()
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Returns metadata for a stored definition.
    pub fn meta(&self, id: &str) -> Option<DocumentMeta> {
        self.inner.index.read().get(id).cloned()
    }

    /// Number of stored definitions.
    pub fn len(&self) -> usize {
        self.inner.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl Inner {
    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join("definitions").join(format!("{}.json", id))
    }

    fn load_index(&self) -> Result<(), StorageError> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Ok(());
        }

        let file = File::open(&index_path)?;
        let reader = BufReader::new(file);
        let index: HashMap<String, DocumentMeta> = serde_json::from_reader(reader)?;
        *self.index.write() = index;

        Ok(())
    }

    fn save_index(&self, index: &HashMap<String, DocumentMeta>) -> Result<(), StorageError> {
        let tmp = self.dir.join("index.json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, index)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        validate_definition_id(id)?;

        let meta = match self.index.read().get(id) {
            Some(meta) => meta.clone(),
            None => return Ok(None),
        };

        let data = match fs::read(self.document_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::Corruption(format!(
                    "definition {} is indexed but its document is missing",
                    id
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = format!("{:08x}", crc32c::crc32c(&data));
        if actual != meta.checksum {
            return Err(StorageError::Corruption(format!(
                "definition {} checksum mismatch",
                id
            )));
        }

        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn write_document(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Caller holds `write_lock`.
    fn write(&self, definition: &Definition, created_at: i64) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(definition)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&data));

        let path = self.document_path(&definition.id);
        let previous = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        self.write_document(&path, &data)?;

        let meta = DocumentMeta {
            id: definition.id.clone(),
            size_bytes: data.len() as u64,
            checksum,
            created_at,
            updated_at: now_millis(),
        };
        let mut next = self.index.read().clone();
        next.insert(definition.id.clone(), meta);

        if let Err(e) = self.save_index(&next) {
            let restored = match previous {
                Some(bytes) => self.write_document(&path, &bytes),
                None => fs::remove_file(&path).map_err(StorageError::from),
            };
            if let Err(restore_err) = restored {
                tracing::error!(
                    "Failed to restore document for {} after index write error: {}",
                    definition.id,
                    restore_err
                );
            }
            return Err(e);
        }

        *self.index.write() = next;
        Ok(())
    }

    fn insert_if_absent(&self, definition: &Definition) -> Result<InsertOutcome, StorageError> {
        validate_definition_id(&definition.id)?;
        let _guard = self.write_lock.lock();

        if self.index.read().contains_key(&definition.id) {
            return Ok(InsertOutcome::Conflict);
        }

        self.write(definition, now_millis())?;
        tracing::debug!("Stored definition {}", definition.id);
        Ok(InsertOutcome::Inserted)
    }

    fn update_fields(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<Option<Definition>, StorageError> {
        let _guard = self.write_lock.lock();

        let mut definition = match self.read(id)? {
            Some(def) => def,
            None => return Ok(None),
        };
        let created_at = self
            .index
            .read()
            .get(id)
            .map(|m| m.created_at)
            .unwrap_or_else(now_millis);

        definition.spec = spec.clone();
        self.write(&definition, created_at)?;
        Ok(Some(definition))
    }

    fn delete(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        let _guard = self.write_lock.lock();

        let definition = match self.read(id)? {
            Some(def) => def,
            None => return Ok(None),
        };

        let mut next = self.index.read().clone();
        next.remove(id);
        self.save_index(&next)?;
        *self.index.write() = next;

        // Unindexed leftovers are harmless: reads go through the index.
        if let Err(e) = fs::remove_file(self.document_path(id)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove document for {}: {}", id, e);
            }
        }

        Ok(Some(definition))
    }
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn get(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        let id = id.to_string();
        self.blocking(move |inner| inner.read(&id)).await
    }

    async fn insert_if_absent(
        &self,
        definition: &Definition,
    ) -> Result<InsertOutcome, StorageError> {
        let definition = definition.clone();
        self.blocking(move |inner| inner.insert_if_absent(&definition))
            .await
    }

    async fn update_fields(
        &self,
        id: &str,
        spec: &MachineSpec,
    ) -> Result<Option<Definition>, StorageError> {
        let id = id.to_string();
        let spec = spec.clone();
        self.blocking(move |inner| inner.update_fields(&id, &spec))
            .await
    }

    async fn delete(&self, id: &str) -> Result<Option<Definition>, StorageError> {
        let id = id.to_string();
        self.blocking(move |inner| inner.delete(&id)).await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id: &str) -> Definition {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "order",
            "states": ["new", "paid", "shipped"],
            "events": ["pay", "ship"],
            "transitions": {"new": {"pay": "paid"}, "paid": {"ship": "shipped"}},
            "partition": 6
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();

        let def = sample("order-flow");
        assert_eq!(
            store.insert_if_absent(&def).await.unwrap(),
            InsertOutcome::Inserted
        );

        let loaded = store.get("order-flow").await.unwrap().unwrap();
        assert_eq!(loaded, def);
        assert!(store.meta("order-flow").is_some());
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();

        store.insert_if_absent(&sample("d-1")).await.unwrap();
        assert_eq!(
            store.insert_if_absent(&sample("d-1")).await.unwrap(),
            InsertOutcome::Conflict
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_preserves_documents() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileDefinitionStore::open(dir.path()).unwrap();
            store.insert_if_absent(&sample("d-1")).await.unwrap();
            store.insert_if_absent(&sample("d-2")).await.unwrap();
            store.delete("d-2").await.unwrap();
        }

        let store = FileDefinitionStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("d-1").await.unwrap().is_some());
        assert!(store.get("d-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();
        store.insert_if_absent(&sample("d-1")).await.unwrap();
        let created_at = store.meta("d-1").unwrap().created_at;

        let spec = MachineSpec {
            states: vec!["x".into(), "y".into()],
            events: vec!["go".into()],
            transitions: Default::default(),
        };
        let updated = store.update_fields("d-1", &spec).await.unwrap().unwrap();
        assert_eq!(updated.partition, 6);
        assert_eq!(updated.name, "order");

        let loaded = store.get("d-1").await.unwrap().unwrap();
        assert_eq!(loaded.spec, spec);
        assert_eq!(store.meta("d-1").unwrap().created_at, created_at);
        assert!(store.update_fields("d-9", &spec).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();
        store.insert_if_absent(&sample("d-1")).await.unwrap();

        let path = dir.path().join("definitions").join("d-1.json");
        fs::write(&path, b"{\"tampered\": true}").unwrap();

        let err = store.get("d-1").await.unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
        assert!(!err.is_retryable());
    }

    /// A directory squatting on the temp path makes every index write fail.
    fn block_index_writes(dir: &Path) -> PathBuf {
        let blocker = dir.join("index.json.tmp");
        fs::create_dir(&blocker).unwrap();
        blocker
    }

    #[tokio::test]
    async fn test_failed_index_write_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();
        store.insert_if_absent(&sample("d-1")).await.unwrap();
        let before = store.get("d-1").await.unwrap().unwrap();

        let blocker = block_index_writes(dir.path());

        assert!(store.insert_if_absent(&sample("d-2")).await.is_err());
        assert_eq!(store.len(), 1);
        assert!(store.get("d-2").await.unwrap().is_none());
        assert!(!dir.path().join("definitions").join("d-2.json").exists());

        let spec = MachineSpec {
            states: vec!["x".into()],
            events: vec![],
            transitions: Default::default(),
        };
        assert!(store.update_fields("d-1", &spec).await.is_err());
        assert_eq!(store.get("d-1").await.unwrap().unwrap(), before);

        assert!(store.delete("d-1").await.is_err());
        assert_eq!(store.get("d-1").await.unwrap().unwrap(), before);

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(
            store.insert_if_absent(&sample("d-2")).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(store.len(), 2);

        let reopened = FileDefinitionStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("d-1").await.unwrap().unwrap(), before);
        assert!(reopened.get("d-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileDefinitionStore::open(dir.path()).unwrap();

        let err = store.get("../escape").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let mut def = sample("ok");
        def.id = "a/b".into();
        assert!(store.insert_if_absent(&def).await.is_err());
    }
}
