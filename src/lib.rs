pub mod aggregator;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod guard;
pub mod host;
pub mod observability;
pub mod pdata;
pub mod storage;

pub use aggregator::{Aggregator, AggregatorConfig, FlushReport};
pub use breaker::{BreakerError, BreakerExtension, CircuitBreaker, ExecuteError, Settings, State};
pub use clock::{Clock, ProductionClock, SimulatedClock, Timestamp};
pub use config::{CollectorConfig, ConfigError};
pub use consumer::{ConsumerError, MetricsConsumer};
pub use host::{ComponentId, Extension, Host, HostError};
pub use pdata::MetricsBatch;
