//! S3 checkpoint store
//!
//! Backed by the `object_store` crate, so any S3-compatible service
//! (AWS S3, MinIO, LocalStack) can hold checkpoints shared across
//! collector restarts.

use super::extension::owner_segment;
use super::{CheckpointStore, StorageExtension, StoreError};
use crate::host::ComponentId;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// S3 connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix within the bucket
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Build the underlying client
///
/// Credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
fn build_store(config: &S3Config) -> Result<Arc<dyn ObjectStore>, StoreError> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket)
        .with_region(&config.region)
        .with_access_key_id(std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default())
        .with_secret_access_key(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

    if let Some(endpoint) = &config.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    let store = builder
        .build()
        .map_err(|e| StoreError::Backend(format!("failed to create S3 client: {}", e)))?;
    Ok(Arc::new(store))
}

fn map_error(err: object_store::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Checkpoint store over an `object_store` backend
#[derive(Clone)]
pub struct ObjectStoreCheckpointStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreCheckpointStore {
    pub fn new(config: &S3Config) -> Result<Self, StoreError> {
        Ok(ObjectStoreCheckpointStore {
            store: build_store(config)?,
            prefix: config.prefix.clone(),
        })
    }

    /// Wrap an existing backend (for testing with `object_store::memory`)
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        ObjectStoreCheckpointStore {
            store,
            prefix: prefix.into(),
        }
    }

    fn object_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{key}", self.prefix))
        }
    }
}

impl std::fmt::Debug for ObjectStoreCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreCheckpointStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl CheckpointStore for ObjectStoreCheckpointStore {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.object_path(key);
            let result = match self.store.get(&path).await {
                Ok(result) => result,
                Err(object_store::Error::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(map_error(e)),
            };
            let data = result.bytes().await.map_err(map_error)?;
            Ok(Some(data.to_vec()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.object_path(key);
            self.store
                .put(&path, bytes::Bytes::copy_from_slice(value).into())
                .await
                .map_err(map_error)?;
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Storage extension placing each owner under `<prefix>/<owner>/`
#[derive(Clone)]
pub struct S3StorageExtension {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl S3StorageExtension {
    pub fn new(config: &S3Config) -> Result<Self, StoreError> {
        Ok(S3StorageExtension {
            store: build_store(config)?,
            prefix: config.prefix.clone(),
        })
    }

    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        S3StorageExtension {
            store,
            prefix: prefix.into(),
        }
    }
}

impl std::fmt::Debug for S3StorageExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageExtension")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl StorageExtension for S3StorageExtension {
    fn client<'a>(
        &'a self,
        owner: &'a ComponentId,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn CheckpointStore>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let segment = owner_segment(owner);
            let prefix = if self.prefix.is_empty() {
                segment
            } else {
                format!("{}/{}", self.prefix, segment)
            };
            let store: Arc<dyn CheckpointStore> = Arc::new(
                ObjectStoreCheckpointStore::from_store(self.store.clone(), prefix),
            );
            Ok(store)
        })
    }
}
