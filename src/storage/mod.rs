//! Checkpoint Storage
//!
//! The aggregator persists its state through the narrow `CheckpointStore`
//! contract: get bytes by key, set bytes by key, close. Backends:
//!
//! - `FileCheckpointStore`: a single local file (the `checkpoint_file` target)
//! - `DirectoryCheckpointStore`: one file per key under a base directory
//! - `InMemoryCheckpointStore`: for tests, with failure injection
//! - `ObjectStoreCheckpointStore`: S3 and compatible services (feature `s3`)
//!
//! Storage extensions (`StorageExtension`) hand out per-component clients
//! and are looked up by id on the `Host` at startup.

mod store;
mod file;
mod extension;
#[cfg(feature = "s3")]
mod s3;

pub use store::{CheckpointStore, InMemoryCheckpointStore, StoreError};
pub use file::{DirectoryCheckpointStore, FileCheckpointStore};
pub use extension::{FileStorageExtension, MemoryStorageExtension, StorageExtension};
#[cfg(feature = "s3")]
pub use s3::{ObjectStoreCheckpointStore, S3Config, S3StorageExtension};
