//! Breaker settings
//!
//! `Settings` is the runtime form (closures, clock); `BreakerConfig` is
//! what a config file can express.

use super::state::{Counts, State};
use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_REQUESTS: u32 = 1;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Decides, after a failure while closed, whether to open
pub type TripPredicate = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Called with `(name, from, to)` on every state change
///
/// Runs while the breaker's lock is held: it must not call back into the
/// same breaker.
pub type StateChangeCallback = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Runtime breaker settings, fixed at construction
#[derive(Clone)]
pub struct Settings {
    pub name: String,
    /// Calls admitted while half-open; 0 is treated as 1
    pub max_requests: u32,
    /// Closed-state counting window; zero never clears
    pub interval: Duration,
    /// Time spent open before probing; zero is treated as 60s
    pub timeout: Duration,
    /// `None` trips after more than 5 consecutive failures
    pub ready_to_trip: Option<TripPredicate>,
    /// `None` logs transitions
    pub on_state_change: Option<StateChangeCallback>,
    /// Whether a caller abandoning a call counts against the breaker
    pub count_cancellation_as_failure: bool,
    /// `None` uses the production clock
    pub clock: Option<Arc<dyn Clock>>,
}

impl Settings {
    pub fn new(name: impl Into<String>) -> Self {
        Settings {
            name: name.into(),
            max_requests: DEFAULT_MAX_REQUESTS,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            ready_to_trip: None,
            on_state_change: None,
            count_cancellation_as_failure: false,
            clock: None,
        }
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ready_to_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Arc::new(f));
        self
    }

    pub fn with_on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    pub fn with_count_cancellation_as_failure(mut self, count: bool) -> Self {
        self.count_cancellation_as_failure = count;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("custom_ready_to_trip", &self.ready_to_trip.is_some())
            .field("custom_on_state_change", &self.on_state_change.is_some())
            .field("count_cancellation_as_failure", &self.count_cancellation_as_failure)
            .finish()
    }
}

/// Breaker section of the collector config
///
/// Zero values fall back to the defaults when converted to `Settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub max_requests: u32,
    #[serde(rename = "interval_ms", with = "crate::config::duration_millis")]
    pub interval: Duration,
    #[serde(rename = "timeout_ms", with = "crate::config::duration_millis")]
    pub timeout: Duration,
    pub count_cancellation_as_failure: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            max_requests: DEFAULT_MAX_REQUESTS,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            count_cancellation_as_failure: false,
        }
    }
}

impl BreakerConfig {
    /// Runtime settings with zero values replaced by defaults
    pub fn to_settings(&self, name: impl Into<String>) -> Settings {
        let max_requests = if self.max_requests == 0 {
            DEFAULT_MAX_REQUESTS
        } else {
            self.max_requests
        };
        let interval = if self.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.interval
        };
        let timeout = if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        };
        Settings::new(name)
            .with_max_requests(max_requests)
            .with_interval(interval)
            .with_timeout(timeout)
            .with_count_cancellation_as_failure(self.count_cancellation_as_failure)
    }
}
