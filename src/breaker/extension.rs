//! Breaker extension: one shared breaker, many guarded call sites

use super::{BreakerConfig, CircuitBreaker, Settings};
use crate::consumer::MetricsConsumer;
use crate::guard::{BreakerInterceptor, BreakerRoundTripper, GuardedConsumer, RoundTrip};
use crate::host::Extension;
use std::sync::Arc;

/// Owns the breaker and hands out guards that share it
///
/// Every guard created from one extension trips together.
#[derive(Debug, Clone)]
pub struct BreakerExtension {
    breaker: Arc<CircuitBreaker>,
}

impl BreakerExtension {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        BreakerExtension { breaker }
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self::new(Arc::new(CircuitBreaker::new(settings)))
    }

    /// Breaker named `name`, logging its transitions
    pub fn from_config(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::from_settings(config.to_settings(name))
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Wrap an HTTP transport
    pub fn round_tripper<T: RoundTrip>(&self, inner: T) -> BreakerRoundTripper<T> {
        BreakerRoundTripper::new(inner, self.breaker.clone())
    }

    /// Interceptor for unary calls and stream establishment
    pub fn interceptor(&self) -> BreakerInterceptor {
        BreakerInterceptor::new(self.breaker.clone())
    }

    /// Guard a downstream metrics consumer
    pub fn guard_consumer<C: MetricsConsumer>(&self, inner: C) -> GuardedConsumer<C> {
        GuardedConsumer::new(inner, self.breaker.clone())
    }

    /// Host registration form
    pub fn as_extension(&self) -> Extension {
        Extension::CircuitBreaker(self.breaker.clone())
    }
}
