use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::schema::FeatureSchema;
use crate::models::{BikeId, Component};

/// Whether the bike had any activity to summarise at the vector's as-of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCoverage {
    /// No rides and no telemetry: every window carries the sentinel
    Empty,
    Observed,
}

/// Fixed-order numeric summary of one bike's history for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub bike_id: BikeId,
    pub component: Component,
    pub as_of: DateTime<Utc>,
    pub schema: Arc<FeatureSchema>,
    pub values: Vec<f64>,
    pub coverage: HistoryCoverage,
}

impl FeatureVector {
    pub fn schema_version(&self) -> &str {
        &self.schema.version
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .index_of(name)
            .and_then(|i| self.values.get(i).copied())
    }

    /// Feature name and value pairs in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn is_defaulted(&self) -> bool {
        self.coverage == HistoryCoverage::Empty
    }

    /// Bitwise equality of the numeric payload under the same schema
    pub fn same_values(&self, other: &FeatureVector) -> bool {
        self.schema.version == other.schema.version
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}
