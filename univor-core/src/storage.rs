//! Persistence contract for the descriptor tree.
//!
//! The engine only persists records; how they are encoded is up to the
//! implementation. [`MemoryStorage`] keeps everything in process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::access::AccessControl;
use crate::definition::Definition;
use crate::descriptor::Descriptor;
use crate::error::{poisoned, Result, UnivorError};
use crate::path::NodePath;

/// Persisted folder: its common definition and access layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: NodePath,
    #[serde(default)]
    pub common: Definition,
    #[serde(default, skip_serializing_if = "AccessControl::is_empty")]
    pub access: AccessControl,
}

impl FolderRecord {
    pub fn new(path: NodePath) -> Self {
        Self {
            path,
            common: Definition::new(),
            access: AccessControl::default(),
        }
    }
}

/// Everything needed to rebuild a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub folders: Vec<FolderRecord>,
    pub descriptors: Vec<Descriptor>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_tree(&self) -> Result<TreeSnapshot>;

    async fn save_descriptor(&self, descriptor: &Descriptor) -> Result<()>;

    async fn delete_descriptor(&self, path: &NodePath) -> Result<()>;

    async fn save_folder(&self, folder: &FolderRecord) -> Result<()>;

    async fn delete_folder(&self, path: &NodePath) -> Result<()>;
}

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    folders: Mutex<BTreeMap<NodePath, FolderRecord>>,
    descriptors: Mutex<BTreeMap<NodePath, Descriptor>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated storage, e.g. to simulate a restart.
    pub fn with_snapshot(snapshot: TreeSnapshot) -> Self {
        let storage = Self::new();
        if let Ok(mut folders) = storage.folders.lock() {
            folders.extend(snapshot.folders.into_iter().map(|f| (f.path.clone(), f)));
        }
        if let Ok(mut descriptors) = storage.descriptors.lock() {
            descriptors.extend(snapshot.descriptors.into_iter().map(|d| (d.full_name.clone(), d)));
        }
        storage
    }

    /// Make every following call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn descriptor(&self, path: &NodePath) -> Option<Descriptor> {
        self.descriptors.lock().ok()?.get(path).cloned()
    }

    pub fn folder(&self, path: &NodePath) -> Option<FolderRecord> {
        self.folders.lock().ok()?.get(path).cloned()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UnivorError::Storage("Storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_tree(&self) -> Result<TreeSnapshot> {
        self.check()?;
        let folders = self.folders.lock().map_err(poisoned)?.values().cloned().collect();
        let descriptors = self.descriptors.lock().map_err(poisoned)?.values().cloned().collect();
        Ok(TreeSnapshot { folders, descriptors })
    }

    async fn save_descriptor(&self, descriptor: &Descriptor) -> Result<()> {
        self.check()?;
        debug!(path = %descriptor.full_name, status = %descriptor.status, "Saving descriptor");
        self.descriptors
            .lock()
            .map_err(poisoned)?
            .insert(descriptor.full_name.clone(), descriptor.clone());
        Ok(())
    }

    async fn delete_descriptor(&self, path: &NodePath) -> Result<()> {
        self.check()?;
        self.descriptors.lock().map_err(poisoned)?.remove(path);
        Ok(())
    }

    async fn save_folder(&self, folder: &FolderRecord) -> Result<()> {
        self.check()?;
        self.folders
            .lock()
            .map_err(poisoned)?
            .insert(folder.path.clone(), folder.clone());
        Ok(())
    }

    async fn delete_folder(&self, path: &NodePath) -> Result<()> {
        self.check()?;
        self.folders.lock().map_err(poisoned)?.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        let path = NodePath::parse("/courseA/student1").unwrap();
        let descriptor = Descriptor::new(path.clone(), Definition::new());

        storage.save_descriptor(&descriptor).await.unwrap();
        storage
            .save_folder(&FolderRecord::new(NodePath::parse("/courseA").unwrap()))
            .await
            .unwrap();

        let snapshot = storage.load_tree().await.unwrap();
        assert_eq!(snapshot.descriptors, vec![descriptor]);
        assert_eq!(snapshot.folders.len(), 1);

        storage.delete_descriptor(&path).await.unwrap();
        assert_eq!(storage.descriptor_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_storage() {
        let storage = MemoryStorage::new();
        storage.set_failing(true);
        let err = storage.load_tree().await.unwrap_err();
        assert!(matches!(err, UnivorError::Storage(_)));
    }
}
