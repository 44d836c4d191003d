//! Row shapes returned by the primary store

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::primary::AggregateKey;
use crate::value::Value;

/// One timestamped metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// A primary-store row: attributes keyed by backend column, plus optional
/// time-series metrics keyed by metric column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreRow {
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Vec<Sample>>,
}

impl StoreRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(column.to_string(), value.into());
        self
    }

    pub fn with_series(mut self, column: &str, samples: Vec<Sample>) -> Self {
        self.metrics.insert(column.to_string(), samples);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }
}

/// One aggregate value computed by the store for a group.
///
/// `key` is `None` for metrics the store adds on its own (the per-group row
/// count), which no request asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetric {
    /// Store-side metric name, e.g. `price_average`
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<AggregateKey>,
    pub value: f64,
}

/// One group of a grouped primary query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreGroup {
    pub rows: Vec<StoreRow>,
    pub aggregates: Vec<AggregateMetric>,
}

/// Result of a primary query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimaryResult {
    /// Matching rows (empty for grouped queries)
    pub rows: Vec<StoreRow>,
    /// Groups (empty for ungrouped queries)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<StoreGroup>,
    /// Total matches before pagination, when the store reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}
