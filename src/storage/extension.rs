//! Storage extensions
//!
//! A storage extension is registered on the host once and hands each
//! component its own checkpoint client, scoped by the component's id.

use super::{CheckpointStore, DirectoryCheckpointStore, InMemoryCheckpointStore, StoreError};
use crate::host::ComponentId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Hands out checkpoint clients to components
pub trait StorageExtension: Send + Sync + 'static {
    /// Client scoped to `owner`. Two owners never see each other's keys.
    fn client<'a>(
        &'a self,
        owner: &'a ComponentId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn CheckpointStore>, StoreError>> + Send + 'a>>;
}

/// Flatten a component id into a single path/prefix segment
pub(crate) fn owner_segment(owner: &ComponentId) -> String {
    match owner.name() {
        Some(name) => format!("{}_{}", owner.kind(), name),
        None => owner.kind().to_string(),
    }
}

/// Local filesystem storage: one directory per owner below `directory`
#[derive(Debug, Clone)]
pub struct FileStorageExtension {
    directory: PathBuf,
}

impl FileStorageExtension {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileStorageExtension {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl StorageExtension for FileStorageExtension {
    fn client<'a>(
        &'a self,
        owner: &'a ComponentId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn CheckpointStore>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let dir = self.directory.join(owner_segment(owner));
            tokio::fs::create_dir_all(&dir).await?;
            let store: Arc<dyn CheckpointStore> = Arc::new(DirectoryCheckpointStore::new(dir));
            Ok(store)
        })
    }
}

/// In-process storage; each owner's store outlives its clients
///
/// Asking for the same owner again returns a store over the same data, so
/// a restarted component sees what the previous instance wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageExtension {
    stores: Arc<Mutex<HashMap<ComponentId, InMemoryCheckpointStore>>>,
}

impl MemoryStorageExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to an owner's store (for testing)
    pub fn store_for(&self, owner: &ComponentId) -> InMemoryCheckpointStore {
        self.stores.lock().entry(owner.clone()).or_default().clone()
    }
}

impl StorageExtension for MemoryStorageExtension {
    fn client<'a>(
        &'a self,
        owner: &'a ComponentId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn CheckpointStore>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let store = self.store_for(owner);
            store.reopen();
            let store: Arc<dyn CheckpointStore> = Arc::new(store);
            Ok(store)
        })
    }
}
