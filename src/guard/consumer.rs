//! Breaker-guarded downstream consumer

use crate::breaker::{CircuitBreaker, ExecuteError};
use crate::consumer::{Capabilities, ConsumerError, MetricsConsumer};
use crate::pdata::MetricsBatch;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Downstream consumer behind a breaker
///
/// Rejections surface as `ConsumerError::BreakerOpen`; any consumer error
/// counts as a breaker failure.
pub struct GuardedConsumer<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
}

impl<C: MetricsConsumer> GuardedConsumer<C> {
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>) -> Self {
        GuardedConsumer { inner, breaker }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<C: MetricsConsumer> MetricsConsumer for GuardedConsumer<C> {
    fn consume(&self, batch: MetricsBatch) -> BoxFuture<'_, Result<(), ConsumerError>> {
        Box::pin(async move {
            match self.breaker.execute_async(self.inner.consume(batch)).await {
                Ok(()) => Ok(()),
                Err(ExecuteError::Rejected(e)) => Err(ConsumerError::BreakerOpen(e)),
                Err(ExecuteError::Failed(e)) => Err(e),
            }
        })
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}
