//! Aggregator configuration

use crate::config::{duration_millis, ConfigError};
use crate::host::ComponentId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest accepted flush interval or send timeout
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Where checkpoints go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointTarget {
    /// No persistence; state lives only in memory
    Disabled,
    /// A single local file
    File(PathBuf),
    /// A storage extension registered on the host
    Storage(ComponentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Id of this aggregator; storage clients are scoped by it
    pub id: ComponentId,
    #[serde(rename = "flush_interval_ms", with = "duration_millis")]
    pub flush_interval: Duration,
    /// Upper bound on one downstream send
    #[serde(rename = "send_timeout_ms", with = "duration_millis")]
    pub send_timeout: Duration,
    pub checkpoint_file: Option<PathBuf>,
    /// Storage extension id; takes precedence over `checkpoint_file`
    pub storage: Option<ComponentId>,
    pub checkpoint_key: String,
    /// Attribute whose value is the group key
    pub group_by: String,
    /// Sum metrics to aggregate; empty aggregates every sum
    pub include_metrics: Vec<String>,
    pub output_metric: String,
    pub output_unit: String,
    pub scope_name: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            id: ComponentId::new("simple"),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            checkpoint_file: None,
            storage: None,
            checkpoint_key: "aggregations".to_string(),
            group_by: "work.type".to_string(),
            include_metrics: Vec::new(),
            output_metric: "work_done_batched".to_string(),
            output_unit: "1".to_string(),
            scope_name: "simple-aggregator".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn checkpoint_target(&self) -> CheckpointTarget {
        match (&self.storage, &self.checkpoint_file) {
            (Some(id), _) => CheckpointTarget::Storage(id.clone()),
            (None, Some(path)) => CheckpointTarget::File(path.clone()),
            (None, None) => CheckpointTarget::Disabled,
        }
    }

    /// Whether sums named `name` are aggregated
    pub fn includes(&self, name: &str) -> bool {
        self.include_metrics.is_empty() || self.include_metrics.iter().any(|m| m == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "aggregator.flush_interval_ms must be greater than 0".into(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "aggregator.send_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.flush_interval > MAX_INTERVAL || self.send_timeout > MAX_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "aggregator.flush_interval_ms and send_timeout_ms must be at most {}",
                MAX_INTERVAL.as_millis()
            )));
        }
        if self.group_by.is_empty() {
            return Err(ConfigError::Invalid("aggregator.group_by must not be empty".into()));
        }
        if self.checkpoint_key.is_empty() {
            return Err(ConfigError::Invalid(
                "aggregator.checkpoint_key must not be empty".into(),
            ));
        }
        if self.output_metric.is_empty() {
            return Err(ConfigError::Invalid(
                "aggregator.output_metric must not be empty".into(),
            ));
        }
        if matches!(&self.checkpoint_file, Some(path) if path.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(
                "aggregator.checkpoint_file must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.checkpoint_key, "aggregations");
        assert_eq!(config.group_by, "work.type");
        assert_eq!(config.checkpoint_target(), CheckpointTarget::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_takes_precedence_over_file() {
        let config = AggregatorConfig {
            checkpoint_file: Some(PathBuf::from("/tmp/ckpt.json")),
            storage: Some(ComponentId::new("file_storage")),
            ..Default::default()
        };
        assert_eq!(
            config.checkpoint_target(),
            CheckpointTarget::Storage(ComponentId::new("file_storage"))
        );
    }

    #[test]
    fn test_include_filter() {
        let mut config = AggregatorConfig::default();
        assert!(config.includes("anything"));
        config.include_metrics = vec!["work_done".into()];
        assert!(config.includes("work_done"));
        assert!(!config.includes("other"));
    }

    #[test]
    fn test_zero_flush_interval_rejected() {
        let config = AggregatorConfig {
            flush_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        let config = AggregatorConfig {
            flush_interval: Duration::from_millis(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AggregatorConfig {
            send_timeout: MAX_INTERVAL + Duration::from_millis(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregatorConfig {
            flush_interval: MAX_INTERVAL,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
