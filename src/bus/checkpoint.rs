//! Checkpoint storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: one JSON file per workflow id

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::BusError;

/// Checkpoint store trait - implemented by all storage backends.
///
/// Semantics are overwrite-on-write with no versioning; concurrent writers
/// race and the last write wins.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Save a blob, overwriting any previous one for this workflow.
    async fn save(&self, workflow_id: &str, blob: &str) -> Result<(), BusError>;

    /// Load the last saved blob, if any.
    async fn load(&self, workflow_id: &str) -> Result<Option<String>, BusError>;

    /// Delete a checkpoint. Returns whether one existed.
    async fn delete(&self, workflow_id: &str) -> Result<bool, BusError>;
}

/// Sanitize a workflow id for use as a filename.
fn sanitize_filename(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory backend
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the trait-object form most callers
    /// want.
    pub fn shared() -> Arc<dyn CheckpointStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn save(&self, workflow_id: &str, blob: &str) -> Result<(), BusError> {
        self.blobs
            .write()
            .await
            .insert(workflow_id.to_string(), blob.to_string());
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<String>, BusError> {
        Ok(self.blobs.read().await.get(workflow_id).cloned())
    }

    async fn delete(&self, workflow_id: &str) -> Result<bool, BusError> {
        Ok(self.blobs.write().await.remove(workflow_id).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File backend
// ─────────────────────────────────────────────────────────────────────────────

/// One file per workflow under `base_dir`, written atomically (temp file,
/// then rename).
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(base_dir: PathBuf) -> Result<Self, BusError> {
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| BusError::Storage(format!("create {}: {}", base_dir.display(), e)))?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.checkpoint.json", sanitize_filename(workflow_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn save(&self, workflow_id: &str, blob: &str) -> Result<(), BusError> {
        let path = self.path_for(workflow_id);
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, blob)
            .await
            .map_err(|e| BusError::Storage(format!("write {}: {}", tmp_path.display(), e)))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| BusError::Storage(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<String>, BusError> {
        let path = self.path_for(workflow_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BusError::Storage(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn delete(&self, workflow_id: &str) -> Result<bool, BusError> {
        let path = self.path_for(workflow_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BusError::Storage(format!(
                "remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Checkpoint store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointStoreType {
    #[default]
    Memory,
    File,
}

impl CheckpointStoreType {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "file" | "json" => Self::File,
            "memory" => Self::Memory,
            _ => Self::default(),
        }
    }
}

/// Create a checkpoint store based on type and configuration.
pub fn create_checkpoint_store(
    store_type: CheckpointStoreType,
    base_dir: PathBuf,
) -> Result<Arc<dyn CheckpointStore>, BusError> {
    match store_type {
        CheckpointStoreType::Memory => Ok(MemoryCheckpointStore::shared()),
        CheckpointStoreType::File => Ok(Arc::new(FileCheckpointStore::new(base_dir)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();

        store.save("wf/1", "v1").await.unwrap();
        store.save("wf/1", "v2").await.unwrap();
        assert_eq!(store.load("wf/1").await.unwrap().as_deref(), Some("v2"));

        assert!(store.delete("wf/1").await.unwrap());
        assert!(!store.delete("wf/1").await.unwrap());
        assert_eq!(store.load("wf/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
            store.save("wf-1", "persisted").await.unwrap();
        }
        let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.is_persistent());
        assert_eq!(
            store.load("wf-1").await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("wf/1: run"), "wf_1__run");
        assert_eq!(sanitize_filename(""), "default");
    }

    #[test]
    fn store_type_parsing() {
        assert_eq!(CheckpointStoreType::parse("file"), CheckpointStoreType::File);
        assert_eq!(
            CheckpointStoreType::parse("memory"),
            CheckpointStoreType::Memory
        );
        assert_eq!(
            CheckpointStoreType::parse("bogus"),
            CheckpointStoreType::Memory
        );
    }
}
