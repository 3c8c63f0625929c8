//! Metric records as accepted by the metrics-ingestion service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit attached to every data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Count,
    Seconds,
    Percent,
}

/// Name/value tag used to sub-aggregate a metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single timestamped data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: Unit,
    pub dimensions: Vec<Dimension>,
}

impl MetricRecord {
    pub fn new(
        metric_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        unit: Unit,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            timestamp,
            value,
            unit,
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.push(Dimension::new(name, value));
        self
    }

    /// Value of the named dimension, if present
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}
