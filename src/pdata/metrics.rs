//! Core metric types carried through the pipeline

use super::Attributes;
use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};

/// How a sum's points relate to each other over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    /// Not specified by the producer
    #[default]
    Unspecified,
    /// Each point reports the change since the previous report
    Delta,
    /// Each point reports the total since `start_time`
    Cumulative,
}

/// Numeric payload of a data point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberValue {
    Int(i64),
    Double(f64),
}

impl NumberValue {
    /// Integer payload; `None` for double points
    pub fn as_int(&self) -> Option<i64> {
        match self {
            NumberValue::Int(v) => Some(*v),
            NumberValue::Double(_) => None,
        }
    }
}

/// A single numeric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberDataPoint {
    pub attributes: Attributes,
    /// Start of the accumulation window (meaningful for cumulative sums)
    pub start_time: Timestamp,
    /// Observation time
    pub time: Timestamp,
    pub value: NumberValue,
}

impl NumberDataPoint {
    /// Integer point with the given attributes
    pub fn int(attributes: Attributes, value: i64) -> Self {
        NumberDataPoint {
            attributes,
            start_time: Timestamp::ZERO,
            time: Timestamp::ZERO,
            value: NumberValue::Int(value),
        }
    }

    /// Double point with the given attributes
    pub fn double(attributes: Attributes, value: f64) -> Self {
        NumberDataPoint {
            attributes,
            start_time: Timestamp::ZERO,
            time: Timestamp::ZERO,
            value: NumberValue::Double(value),
        }
    }

    pub fn with_times(mut self, start_time: Timestamp, time: Timestamp) -> Self {
        self.start_time = start_time;
        self.time = time;
        self
    }
}

/// Sum (counter) payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sum {
    pub temporality: Temporality,
    pub is_monotonic: bool,
    pub data_points: Vec<NumberDataPoint>,
}

/// Gauge payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub data_points: Vec<NumberDataPoint>,
}

/// Shape of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricData {
    Sum(Sum),
    Gauge(Gauge),
}

impl MetricData {
    pub fn data_points(&self) -> &[NumberDataPoint] {
        match self {
            MetricData::Sum(sum) => &sum.data_points,
            MetricData::Gauge(gauge) => &gauge.data_points,
        }
    }
}

/// A named metric and its points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    pub data: MetricData,
}

impl Metric {
    /// Create a monotonic sum metric
    pub fn sum(
        name: impl Into<String>,
        temporality: Temporality,
        data_points: Vec<NumberDataPoint>,
    ) -> Self {
        Metric {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Sum(Sum {
                temporality,
                is_monotonic: true,
                data_points,
            }),
        }
    }

    /// Create a gauge metric
    pub fn gauge(name: impl Into<String>, data_points: Vec<NumberDataPoint>) -> Self {
        Metric {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Gauge(Gauge { data_points }),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Instrumentation scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Metrics produced by one instrumentation scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    pub scope: Scope,
    pub metrics: Vec<Metric>,
}

/// Metrics produced by one resource (process, host, service)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub resource: Attributes,
    pub scope_metrics: Vec<ScopeMetrics>,
}

/// The unit of data exchanged between pipeline stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBatch {
    pub resource_metrics: Vec<ResourceMetrics>,
}

impl MetricsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch holding a single resource with a single scope
    pub fn single(resource: Attributes, scope: Scope, metrics: Vec<Metric>) -> Self {
        MetricsBatch {
            resource_metrics: vec![ResourceMetrics {
                resource,
                scope_metrics: vec![ScopeMetrics { scope, metrics }],
            }],
        }
    }

    /// Iterate every metric in the batch, regardless of resource or scope
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.resource_metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
    }

    /// Total number of data points across all metrics
    pub fn data_point_count(&self) -> usize {
        self.metrics().map(|m| m.data.data_points().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data_point_count() == 0
    }
}
