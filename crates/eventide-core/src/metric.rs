//! Materialized metrics and their query DTOs

use crate::types::{AggregationPeriod, MetricType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A materialized numeric value, written by the aggregator and read back as
/// time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: Option<String>,
    #[serde(default)]
    pub dimensions: HashMap<String, serde_json::Value>,
    pub period: Option<AggregationPeriod>,
    pub module: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Request to persist a metric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCreate {
    pub name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: Option<String>,
    #[serde(default)]
    pub dimensions: HashMap<String, serde_json::Value>,
    pub period: Option<AggregationPeriod>,
    pub module: Option<String>,
    /// Defaults to now when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricCreate {
    pub fn new(name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            name: name.into(),
            metric_type,
            value,
            unit: None,
            dimensions: HashMap::new(),
            period: None,
            module: None,
            timestamp: None,
        }
    }

    pub fn with_period(mut self, period: AggregationPeriod) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.dimensions.insert(key.into(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn into_metric(self) -> Metric {
        let now = Utc::now();
        Metric {
            id: crate::generate_id(),
            name: self.name,
            metric_type: self.metric_type,
            value: self.value,
            unit: self.unit,
            dimensions: self.dimensions,
            period: self.period,
            module: self.module,
            timestamp: self.timestamp.unwrap_or(now),
            created_at: now,
        }
    }
}

/// Filterable metric query with pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricQuery {
    pub names: Option<Vec<String>>,
    pub metric_types: Option<Vec<MetricType>>,
    pub module: Option<String>,
    pub period: Option<AggregationPeriod>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: u32,
    pub limit: Option<u32>,
}

/// One point of a metric time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
