//! Telemetry Data Model
//!
//! A typed, OTLP-shaped metrics model: the unit the pipeline hands to a
//! stage (`MetricsBatch`) and the unit a stage hands downstream.
//!
//! ```text
//! MetricsBatch
//!   └─ ResourceMetrics (resource attributes)
//!        └─ ScopeMetrics (instrumentation scope)
//!             └─ Metric (name, unit, Sum | Gauge)
//!                  └─ NumberDataPoint (attributes, start_time, time, value)
//! ```

mod attributes;
mod metrics;

pub use attributes::{AttributeValue, Attributes};
pub use metrics::{
    Gauge, Metric, MetricData, MetricsBatch, NumberDataPoint, NumberValue, ResourceMetrics,
    Scope, ScopeMetrics, Sum, Temporality,
};
