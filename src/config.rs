//! Collector Configuration
//!
//! Loaded from a TOML file, then adjusted from the environment:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | COLLECTOR_FLUSH_INTERVAL_MS | `aggregator.flush_interval_ms` |
//! | COLLECTOR_CHECKPOINT_FILE | `aggregator.checkpoint_file` |
//! | COLLECTOR_STORAGE | `aggregator.storage` |
//! | COLLECTOR_LOG_FORMAT | `logging.format` (`text` or `json`) |
//!
//! ```toml
//! [aggregator]
//! flush_interval_ms = 5000
//! storage = "file_storage"
//!
//! [breaker]
//! max_requests = 1
//! timeout_ms = 60000
//!
//! [[storage]]
//! id = "file_storage"
//! type = "file"
//! directory = "/var/lib/collector"
//! ```

use crate::aggregator::AggregatorConfig;
use crate::breaker::{BreakerConfig, BreakerExtension};
use crate::host::{ComponentId, Extension, Host, HostError};
use crate::observability::{LogFormat, LoggingConfig};
use crate::storage::{FileStorageExtension, MemoryStorageExtension, StorageExtension, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("failed to get storage client from {id}: {source}")]
    StorageClient { id: ComponentId, source: StoreError },
    #[error("component already started")]
    AlreadyStarted,
}

/// Backend of a storage extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    /// One directory per client under `directory`
    File { directory: PathBuf },
    /// Process-local; gone on restart
    Memory,
    #[cfg(feature = "s3")]
    S3(crate::storage::S3Config),
}

/// One `[[storage]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageExtensionConfig {
    pub id: ComponentId,
    #[serde(flatten)]
    pub backend: StorageBackend,
}

impl StorageExtensionConfig {
    pub fn build(&self) -> Result<Arc<dyn StorageExtension>, ConfigError> {
        match &self.backend {
            StorageBackend::File { directory } => {
                Ok(Arc::new(FileStorageExtension::new(directory.clone())))
            }
            StorageBackend::Memory => Ok(Arc::new(MemoryStorageExtension::new())),
            #[cfg(feature = "s3")]
            StorageBackend::S3(s3) => crate::storage::S3StorageExtension::new(s3)
                .map(|ext| Arc::new(ext) as Arc<dyn StorageExtension>)
                .map_err(|source| ConfigError::StorageClient {
                    id: self.id.clone(),
                    source,
                }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub aggregator: AggregatorConfig,
    pub breaker: BreakerConfig,
    pub storage: Vec<StorageExtensionConfig>,
    pub logging: LoggingConfig,
}

impl CollectorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Apply `COLLECTOR_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = lookup("COLLECTOR_FLUSH_INTERVAL_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("COLLECTOR_FLUSH_INTERVAL_MS={:?} is not a number", ms))
            })?;
            self.aggregator.flush_interval = Duration::from_millis(ms);
        }
        if let Some(path) = lookup("COLLECTOR_CHECKPOINT_FILE") {
            self.aggregator.checkpoint_file = Some(PathBuf::from(path));
        }
        if let Some(id) = lookup("COLLECTOR_STORAGE") {
            self.aggregator.storage = Some(ComponentId::parse(&id)?);
        }
        if let Some(format) = lookup("COLLECTOR_LOG_FORMAT") {
            self.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "COLLECTOR_LOG_FORMAT={:?}, expected text or json",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregator.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.storage {
            if !seen.insert(&entry.id) {
                return Err(ConfigError::Invalid(format!(
                    "storage extension {} defined twice",
                    entry.id
                )));
            }
        }
        if let Some(id) = &self.aggregator.storage {
            if !seen.contains(id) {
                return Err(ConfigError::Invalid(format!(
                    "aggregator.storage refers to undefined storage extension {}",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Host populated with every configured storage extension
    pub fn build_host(&self) -> Result<Host, ConfigError> {
        let mut host = Host::new();
        for entry in &self.storage {
            host.add_extension(entry.id.clone(), Extension::Storage(entry.build()?));
        }
        Ok(host)
    }

    /// Breaker for the aggregator's downstream send
    ///
    /// The aggregator drops a send that outlives `send_timeout_ms`, so a
    /// dropped call always counts as a failure here. A hung downstream
    /// trips the breaker like a failing one.
    pub fn exporter_breaker(&self, name: impl Into<String>) -> BreakerExtension {
        let mut breaker = self.breaker.clone();
        breaker.count_cancellation_as_failure = true;
        BreakerExtension::from_config(name, &breaker)
    }
}

/// Serde helper for Duration as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
