//! Checkpoint store abstraction
//!
//! Follows the object store pattern: boxed futures keep the trait
//! object-safe so backends can be chosen at runtime and shared as
//! `Arc<dyn CheckpointStore>`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Error type for checkpoint store operations
///
/// A missing key is not an error: `get` returns `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Key cannot be mapped onto the backend
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Client was closed
    #[error("store is closed")]
    Closed,
    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Key/value persistence used for checkpoints
pub trait CheckpointStore: Send + Sync + 'static {
    /// Read the value stored under `key`; `None` if nothing was stored
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + 'a>>;

    /// Store `value` under `key`, replacing any previous value
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Release backend resources. Called once at shutdown.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

// ============================================================================
// InMemoryCheckpointStore - For tests
// ============================================================================

#[derive(Debug, Default)]
struct FaultSwitches {
    fail_get: AtomicBool,
    fail_set: AtomicBool,
}

/// In-memory checkpoint store
///
/// Clones share the same data, so a test can play "process restart" by
/// handing a clone to a fresh engine.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    faults: Arc<FaultSwitches>,
    closed: Arc<AtomicBool>,
    sets: Arc<AtomicU64>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get` fail until switched off
    pub fn fail_gets(&self, fail: bool) {
        self.faults.fail_get.store(fail, Ordering::SeqCst);
    }

    /// Make `set` fail until switched off
    pub fn fail_sets(&self, fail: bool) {
        self.faults.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Raw stored bytes (for testing)
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Overwrite stored bytes directly (for testing corrupt records)
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.data.write().insert(key.to_string(), value.to_vec());
    }

    /// Number of successful `set` calls
    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reopen after `close` (for testing restarts on a shared store)
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            if self.faults.fail_get.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected get failure".to_string()));
            }
            Ok(self.data.read().get(key).cloned())
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            if self.faults.fail_set.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected set failure".to_string()));
            }
            self.data.write().insert(key.to_string(), value.to_vec());
            self.sets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_set_get() {
        let store = InMemoryCheckpointStore::new();

        assert!(store.get("aggregations").await.unwrap().is_none());
        store.set("aggregations", b"hello").await.unwrap();
        assert_eq!(store.get("aggregations").await.unwrap().unwrap(), b"hello");
        assert_eq!(store.set_count(), 1);
    }

    #[tokio::test]
    async fn test_inmemory_clones_share_data() {
        let store = InMemoryCheckpointStore::new();
        let other = store.clone();

        store.set("k", b"v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap().unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_inmemory_failure_injection() {
        let store = InMemoryCheckpointStore::new();
        store.set("k", b"v1").await.unwrap();

        store.fail_sets(true);
        assert!(matches!(store.set("k", b"v2").await, Err(StoreError::Backend(_))));
        assert_eq!(store.raw("k").unwrap(), b"v1");

        store.fail_gets(true);
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_inmemory_close() {
        let store = InMemoryCheckpointStore::new();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.set("k", b"v").await, Err(StoreError::Closed)));

        store.reopen();
        store.set("k", b"v").await.unwrap();
    }
}
