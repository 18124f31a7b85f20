//! Local filesystem checkpoint stores

use super::{CheckpointStore, StoreError};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Write `data` to `path` via a sibling temp file and a rename, so readers
/// never observe a partially written checkpoint.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

// ============================================================================
// FileCheckpointStore - single file target
// ============================================================================

/// Checkpoint store backed by exactly one file
///
/// Holds a single record: every key maps onto the same file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCheckpointStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get<'a>(
        &'a self,
        _key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + 'a>> {
        Box::pin(async move { read_optional(&self.path).await })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move { write_atomic(&self.path, value).await })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ============================================================================
// DirectoryCheckpointStore - one file per key
// ============================================================================

/// Checkpoint store that keeps each key in its own file under `base_path`
#[derive(Debug, Clone)]
pub struct DirectoryCheckpointStore {
    base_path: PathBuf,
}

impl DirectoryCheckpointStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        DirectoryCheckpointStore {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Keys are flat names: no separators, no parent references
    fn full_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(|c: char| c == '/' || c == '\\') || key == "." || key == ".." {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }
}

impl CheckpointStore for DirectoryCheckpointStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            read_optional(&path).await
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key)?;
            write_atomic(&path, value).await
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
