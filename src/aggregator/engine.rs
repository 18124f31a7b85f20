//! Aggregator engine
//!
//! Accumulates cumulative sums per group key and periodically emits one
//! reduced batch downstream.
//!
//! ## Locking
//!
//! - `state` (sync mutex) is taken briefly by `ingest` to add, and by
//!   flush/save to copy a snapshot. It is never held across I/O.
//! - `flush_gate` (async mutex) serializes flush, save and load, so
//!   snapshots reach the store in the order they were taken and flushes
//!   never overlap.
//! - `start_gate` (async mutex) is held for the whole of `start` and
//!   taken first by `shutdown`, so a shutdown issued mid-start waits for
//!   the storage client and closes it.

use super::checkpoint::{self, CheckpointError, Decoded};
use super::config::{AggregatorConfig, CheckpointTarget};
use super::state::AggregationState;
use super::worker::{spawn_flush_worker, FlushWorkerHandle};
use crate::clock::Clock;
use crate::config::ConfigError;
use crate::consumer::{Capabilities, ConsumerError, MetricsConsumer};
use crate::host::Host;
use crate::pdata::{
    Attributes, Metric, MetricData, MetricsBatch, NumberDataPoint, Scope, Temporality,
};
use crate::storage::{CheckpointStore, FileCheckpointStore, StoreError};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one `ingest` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Points added to a group
    pub accepted: usize,
    /// Sum points left out: no string group label, non-integer or negative
    pub skipped: usize,
}

#[derive(Debug)]
pub enum CheckpointStatus {
    Saved,
    /// No checkpoint target configured
    Disabled,
    Failed(CheckpointError),
}

#[derive(Debug)]
pub enum SendStatus {
    Sent,
    /// Nothing to send
    Skipped,
    Failed(ConsumerError),
}

/// What one flush did
#[derive(Debug)]
pub struct FlushReport {
    pub groups: usize,
    pub checkpoint: CheckpointStatus,
    pub send: SendStatus,
}

/// State shared between the engine and its flush task
pub(crate) struct Shared {
    config: AggregatorConfig,
    next: Arc<dyn MetricsConsumer>,
    clock: Arc<dyn Clock>,
    state: Mutex<AggregationState>,
    store: RwLock<Option<Arc<dyn CheckpointStore>>>,
    flush_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    fn ingest(&self, batch: &MetricsBatch) -> IngestStats {
        let config = &self.config;
        let now = self.clock.now();
        let mut stats = IngestStats::default();
        let mut state = self.state.lock();

        for metric in batch.metrics() {
            let MetricData::Sum(sum) = &metric.data else {
                continue;
            };
            if !config.includes(&metric.name) {
                continue;
            }
            for point in &sum.data_points {
                let Some(key) = point.attributes.get_str(&config.group_by) else {
                    stats.skipped += 1;
                    continue;
                };
                let Some(value) = point.value.as_int() else {
                    stats.skipped += 1;
                    continue;
                };
                if value < 0 {
                    warn!(
                        metric = %metric.name,
                        group = %key,
                        value,
                        "skipping negative increment on cumulative sum"
                    );
                    stats.skipped += 1;
                    continue;
                }
                state.add(key, value, now);
                stats.accepted += 1;
            }
        }
        stats
    }

    fn current_store(&self) -> Option<Arc<dyn CheckpointStore>> {
        self.store.read().clone()
    }

    async fn write_checkpoint(
        &self,
        store: &dyn CheckpointStore,
        state: &AggregationState,
    ) -> Result<(), CheckpointError> {
        let bytes = checkpoint::encode(state)?;
        store.set(&self.config.checkpoint_key, &bytes).await?;
        Ok(())
    }

    pub(crate) async fn flush(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        let snapshot = self.state.lock().clone();

        // Persist before sending: a crash after this point still has
        // the latest values on disk.
        let checkpoint = match self.current_store() {
            None => CheckpointStatus::Disabled,
            Some(store) => match self.write_checkpoint(&*store, &snapshot).await {
                Ok(()) => CheckpointStatus::Saved,
                Err(e) => {
                    error!(key = %self.config.checkpoint_key, error = %e, "failed to write checkpoint");
                    CheckpointStatus::Failed(e)
                }
            },
        };

        if snapshot.is_empty() {
            return FlushReport {
                groups: 0,
                checkpoint,
                send: SendStatus::Skipped,
            };
        }

        let batch = self.build_batch(&snapshot);
        let timeout = self.config.send_timeout;
        let send = match tokio::time::timeout(timeout, self.next.consume(batch)).await {
            Ok(Ok(())) => SendStatus::Sent,
            Ok(Err(e)) => {
                error!(error = %e, groups = snapshot.len(), "failed to flush metrics");
                SendStatus::Failed(e)
            }
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "downstream send timed out");
                SendStatus::Failed(ConsumerError::Timeout(timeout))
            }
        };

        FlushReport {
            groups: snapshot.len(),
            checkpoint,
            send,
        }
    }

    async fn save_checkpoint(&self) -> Result<bool, CheckpointError> {
        let _gate = self.flush_gate.lock().await;
        let Some(store) = self.current_store() else {
            return Ok(false);
        };
        let snapshot = self.state.lock().clone();
        self.write_checkpoint(&*store, &snapshot).await?;
        Ok(true)
    }

    async fn load_checkpoint(&self) -> Result<usize, CheckpointError> {
        let _gate = self.flush_gate.lock().await;
        let Some(store) = self.current_store() else {
            return Ok(0);
        };
        let key = &self.config.checkpoint_key;

        let bytes = match store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(key = %key, "no checkpoint found, starting empty");
                return Ok(0);
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to read checkpoint, starting empty");
                return Err(e.into());
            }
        };

        let restored = match checkpoint::decode(&bytes, self.clock.now()) {
            Ok(Decoded::Current(state)) => state,
            Ok(Decoded::Legacy(state)) => {
                warn!(
                    key = %key,
                    groups = state.len(),
                    "checkpoint has no start times; restored groups begin a new epoch"
                );
                state
            }
            Err(e) => {
                error!(key = %key, error = %e, "discarding malformed checkpoint, starting empty");
                return Err(e);
            }
        };

        let groups = restored.len();
        *self.state.lock() = restored;
        info!(key = %key, groups, "restored checkpoint");
        Ok(groups)
    }

    fn build_batch(&self, snapshot: &AggregationState) -> MetricsBatch {
        let config = &self.config;
        let now = self.clock.now();
        let points = snapshot
            .iter()
            .map(|(key, acc)| {
                let attrs = Attributes::new().with(config.group_by.clone(), key.clone());
                NumberDataPoint::int(attrs, acc.value).with_times(acc.start_time, now)
            })
            .collect();
        let metric = Metric::sum(config.output_metric.clone(), Temporality::Cumulative, points)
            .with_unit(config.output_unit.clone());
        let scope = Scope {
            name: config.scope_name.clone(),
            version: String::new(),
        };
        MetricsBatch::single(Attributes::new(), scope, vec![metric])
    }
}

enum Lifecycle {
    Created,
    Starting,
    Running(FlushWorkerHandle),
    Stopped,
}

/// Grouped cumulative-sum aggregator
pub struct Aggregator {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    start_gate: tokio::sync::Mutex<()>,
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        next: Arc<dyn MetricsConsumer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // A file target needs no host lookup; storage clients come at start
        let store: Option<Arc<dyn CheckpointStore>> = match config.checkpoint_target() {
            CheckpointTarget::File(path) => Some(Arc::new(FileCheckpointStore::new(path))),
            CheckpointTarget::Storage(_) | CheckpointTarget::Disabled => None,
        };
        Aggregator {
            shared: Arc::new(Shared {
                config,
                next,
                clock,
                state: Mutex::new(AggregationState::new()),
                store: RwLock::new(store),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
            lifecycle: Mutex::new(Lifecycle::Created),
            start_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Acquire the checkpoint client, restore the last checkpoint and
    /// start the flush task.
    ///
    /// A missing or wrong-kind storage extension fails the start and
    /// leaves the aggregator un-started.
    pub async fn start(&self, host: &Host) -> Result<(), ConfigError> {
        let _starting = self.start_gate.lock().await;
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Created) {
                return Err(ConfigError::AlreadyStarted);
            }
            *lifecycle = Lifecycle::Starting;
        }

        if let Err(e) = self.acquire_store(host).await {
            *self.lifecycle.lock() = Lifecycle::Created;
            return Err(e);
        }

        // Errors are logged inside; a bad checkpoint means an empty start
        let _ = self.shared.load_checkpoint().await;

        let interval = self.shared.config.flush_interval;
        *self.lifecycle.lock() = Lifecycle::Running(spawn_flush_worker(self.shared.clone(), interval));
        info!(
            id = %self.shared.config.id,
            flush_interval_ms = interval.as_millis() as u64,
            "aggregator started"
        );
        Ok(())
    }

    async fn acquire_store(&self, host: &Host) -> Result<(), ConfigError> {
        let config = &self.shared.config;
        config.validate()?;

        let CheckpointTarget::Storage(storage_id) = config.checkpoint_target() else {
            return Ok(());
        };
        if config.checkpoint_file.is_some() {
            warn!(storage = %storage_id, "both storage and checkpoint_file set; using storage");
        }
        let extension = host.storage(&storage_id)?;
        let client = extension
            .client(&config.id)
            .await
            .map_err(|source| ConfigError::StorageClient {
                id: storage_id.clone(),
                source,
            })?;
        *self.shared.store.write() = Some(client);
        debug!(storage = %storage_id, owner = %config.id, "acquired storage client");
        Ok(())
    }

    /// Add a batch to the running totals. Never forwards anything.
    pub fn ingest(&self, batch: &MetricsBatch) -> IngestStats {
        self.shared.ingest(batch)
    }

    /// Persist, then send one point per group downstream
    pub async fn flush(&self) -> FlushReport {
        self.shared.flush().await
    }

    /// Replace the in-memory groups with the stored checkpoint
    ///
    /// Returns the number of restored groups. Absence or an error leaves
    /// the in-memory state as it was.
    pub async fn load_checkpoint(&self) -> Result<usize, CheckpointError> {
        self.shared.load_checkpoint().await
    }

    /// Persist the current state; `Ok(false)` when no target is configured
    pub async fn save_checkpoint(&self) -> Result<bool, CheckpointError> {
        self.shared.save_checkpoint().await
    }

    /// Stop the flush task, run a final flush and close the store client
    ///
    /// Waits for an in-progress `start`. A second call is a no-op.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        let _starting = self.start_gate.lock().await;
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Running(worker) => worker.stop().await,
            Lifecycle::Created | Lifecycle::Starting => {}
        }

        let report = self.shared.flush().await;
        info!(groups = report.groups, "final flush on shutdown");

        let store = self.shared.store.write().take();
        if let Some(store) = store {
            store.close().await?;
        }
        Ok(())
    }

    /// Copy of the current groups
    pub fn snapshot(&self) -> AggregationState {
        self.shared.state.lock().clone()
    }
}

impl MetricsConsumer for Aggregator {
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        Box::pin(async move {
            self.ingest(&batch);
            Ok(())
        })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { mutates_data: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SimulatedClock, Timestamp};
    use crate::consumer::CapturingConsumer;
    use crate::pdata::{AttributeValue, NumberValue};

    fn work_batch(work_type: &str, ids: std::ops::Range<u32>) -> MetricsBatch {
        let points = ids
            .map(|id| {
                let attrs = Attributes::new()
                    .with("work.type", work_type)
                    .with("work.id", id.to_string());
                NumberDataPoint::int(attrs, 1)
            })
            .collect();
        MetricsBatch::single(
            Attributes::new(),
            Scope::default(),
            vec![Metric::sum("work_done", Temporality::Delta, points)],
        )
    }

    fn aggregator(
        config: AggregatorConfig,
    ) -> (Aggregator, CapturingConsumer, SimulatedClock) {
        let sink = CapturingConsumer::new();
        let clock = SimulatedClock::new(Timestamp::from_millis(1_000));
        let agg = Aggregator::new(config, Arc::new(sink.clone()), Arc::new(clock.clone()));
        (agg, sink, clock)
    }

    #[test]
    fn test_ingest_skips_unlabelled_and_non_integer_points() {
        let (agg, _sink, _clock) = aggregator(AggregatorConfig::default());
        let points = vec![
            NumberDataPoint::int(Attributes::new().with("work.type", "manual"), 4),
            NumberDataPoint::int(Attributes::new(), 9),
            NumberDataPoint::int(Attributes::new().with("work.type", 7i64), 9),
            NumberDataPoint::double(Attributes::new().with("work.type", "manual"), 1.5),
            NumberDataPoint::int(Attributes::new().with("work.type", "manual"), -3),
        ];
        let batch = MetricsBatch::single(
            Attributes::new(),
            Scope::default(),
            vec![
                Metric::sum("work_done", Temporality::Delta, points),
                Metric::gauge(
                    "queue",
                    vec![NumberDataPoint::int(Attributes::new().with("work.type", "manual"), 50)],
                ),
            ],
        );

        let stats = agg.ingest(&batch);
        assert_eq!(stats, IngestStats { accepted: 1, skipped: 4 });
        assert_eq!(agg.snapshot().get("manual").unwrap().value, 4);
        assert_eq!(agg.snapshot().len(), 1);
    }

    #[test]
    fn test_include_metrics_filter() {
        let config = AggregatorConfig {
            include_metrics: vec!["other".into()],
            ..Default::default()
        };
        let (agg, _sink, _clock) = aggregator(config);
        let stats = agg.ingest(&work_batch("manual", 0..10));
        assert_eq!(stats, IngestStats::default());
        assert!(agg.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_flush_builds_cumulative_output() {
        let (agg, sink, clock) = aggregator(AggregatorConfig::default());
        agg.ingest(&work_batch("manual", 0..3));
        clock.advance_ms(500);
        agg.ingest(&work_batch("auto", 0..2));

        let report = agg.flush().await;
        assert_eq!(report.groups, 2);
        assert!(matches!(report.checkpoint, CheckpointStatus::Disabled));
        assert!(matches!(report.send, SendStatus::Sent));

        let batch = sink.last().unwrap();
        let scope = &batch.resource_metrics[0].scope_metrics[0];
        assert_eq!(scope.scope.name, "simple-aggregator");
        let metric = &scope.metrics[0];
        assert_eq!(metric.name, "work_done_batched");
        assert_eq!(metric.unit, "1");
        let MetricData::Sum(sum) = &metric.data else {
            panic!("expected sum");
        };
        assert_eq!(sum.temporality, Temporality::Cumulative);
        assert!(sum.is_monotonic);

        // Sorted by group key
        let auto = &sum.data_points[0];
        assert_eq!(auto.attributes.get("work.type"), Some(&AttributeValue::from("auto")));
        assert!(auto.attributes.get("work.id").is_none());
        assert_eq!(auto.value, NumberValue::Int(2));
        assert_eq!(auto.start_time, Timestamp::from_millis(1_500));

        let manual = &sum.data_points[1];
        assert_eq!(manual.value, NumberValue::Int(3));
        assert_eq!(manual.start_time, Timestamp::from_millis(1_000));
        assert_eq!(manual.time, Timestamp::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_send_failure_retains_state() {
        let (agg, sink, _clock) = aggregator(AggregatorConfig::default());
        agg.ingest(&work_batch("manual", 0..5));
        sink.set_failing(true);

        let report = agg.flush().await;
        assert!(matches!(report.send, SendStatus::Failed(ConsumerError::Unavailable(_))));
        assert_eq!(agg.snapshot().get("manual").unwrap().value, 5);

        sink.set_failing(false);
        agg.ingest(&work_batch("manual", 5..6));
        agg.flush().await;
        let last = sink.last().unwrap();
        let MetricData::Sum(sum) = &last.resource_metrics[0].scope_metrics[0].metrics[0].data else {
            panic!("expected sum");
        };
        assert_eq!(sum.data_points[0].value, NumberValue::Int(6));
    }

    #[tokio::test]
    async fn test_consumer_interface_ingests() {
        let (agg, sink, _clock) = aggregator(AggregatorConfig::default());
        agg.consume(work_batch("manual", 0..2)).await.unwrap();
        assert_eq!(agg.snapshot().get("manual").unwrap().value, 2);
        assert!(agg.capabilities().mutates_data);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (agg, _sink, _clock) = aggregator(AggregatorConfig::default());
        let host = Host::new();
        agg.start(&host).await.unwrap();
        assert!(agg.is_running());
        assert!(matches!(agg.start(&host).await, Err(ConfigError::AlreadyStarted)));
        agg.shutdown().await.unwrap();
        assert!(!agg.is_running());
        agg.shutdown().await.unwrap();
    }
}
