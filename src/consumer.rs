//! Downstream consumer seam
//!
//! A pipeline stage hands batches to the next stage through
//! `MetricsConsumer`. The host owns the concrete consumers; the
//! aggregator only sees this trait.

use crate::breaker::BreakerError;
use crate::pdata::MetricsBatch;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Error reported by a downstream consumer
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The consumer is (temporarily) unable to accept data
    #[error("consumer unavailable: {0}")]
    Unavailable(String),
    /// The send did not finish within the allotted time
    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The data was rejected and will not be accepted on retry
    #[error("data rejected: {0}")]
    Rejected(String),
    /// A circuit breaker in front of the consumer refused the send
    #[error("circuit breaker is open: {0}")]
    BreakerOpen(#[from] BreakerError),
    #[error("{0}")]
    Other(String),
}

/// What a stage does to the data it is handed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub mutates_data: bool,
}

/// Receives metric batches from an upstream stage
pub trait MetricsConsumer: Send + Sync + 'static {
    /// Accept a batch. Errors are reported to the caller; whether they are
    /// retried is the caller's decision.
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

impl<C: MetricsConsumer + ?Sized> MetricsConsumer for Arc<C> {
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        (**self).consume(batch)
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}

/// Terminal consumer that logs a summary of each batch
#[derive(Debug, Default, Clone)]
pub struct LoggingConsumer;

impl MetricsConsumer for LoggingConsumer {
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        Box::pin(async move {
            for metric in batch.metrics() {
                for point in metric.data.data_points() {
                    let attrs: Vec<String> = point
                        .attributes
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect();
                    info!(
                        metric = %metric.name,
                        attributes = %attrs.join(","),
                        value = ?point.value,
                        start_time = %point.start_time,
                        "exported data point"
                    );
                }
            }
            Ok(())
        })
    }
}

/// Consumer that records every batch it accepts
///
/// Can be switched into a failing mode to exercise error paths.
#[derive(Debug, Default, Clone)]
pub struct CapturingConsumer {
    batches: Arc<Mutex<Vec<MetricsBatch>>>,
    attempts: Arc<Mutex<usize>>,
    failing: Arc<AtomicBool>,
}

impl CapturingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (`true`) or succeed (`false`)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Batches accepted so far
    pub fn batches(&self) -> Vec<MetricsBatch> {
        self.batches.lock().clone()
    }

    /// Number of send attempts, including failed ones
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn last(&self) -> Option<MetricsBatch> {
        self.batches.lock().last().cloned()
    }
}

impl MetricsConsumer for CapturingConsumer {
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        Box::pin(async move {
            *self.attempts.lock() += 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConsumerError::Unavailable("simulated downstream failure".into()));
            }
            self.batches.lock().push(batch);
            Ok(())
        })
    }
}
