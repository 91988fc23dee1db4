//! Labeled training dataset

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::vector::FeatureVector;
use crate::models::{BikeId, Component};

/// One labeled example: the vector computed just before a labeled maintenance record
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRow {
    pub vector: FeatureVector,
    pub label: bool,
    pub component: Component,
    /// Timestamp of the maintenance record that supplied the label
    pub label_at: DateTime<Utc>,
    pub record_id: u64,
}

impl TrainingRow {
    pub fn bike_id(&self) -> BikeId {
        self.vector.bike_id
    }
}

/// Counters describing how the dataset was assembled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetDiagnostics {
    pub bikes_scanned: usize,
    pub labeled_records: usize,
    /// Labeled records with no ride or telemetry before them
    pub dropped_no_history: usize,
    /// Bikes left out because their history could not be loaded or extracted
    pub failed_bikes: Vec<(BikeId, String)>,
    pub rows_per_component: BTreeMap<Component, usize>,
    pub positives_per_component: BTreeMap<Component, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingDataset {
    /// Ordered by (component, bike, label time)
    pub rows: Vec<TrainingRow>,
    pub diagnostics: DatasetDiagnostics,
}

impl TrainingDataset {
    /// Sort rows into canonical order and recount the per-component diagnostics
    pub fn from_rows(mut rows: Vec<TrainingRow>, mut diagnostics: DatasetDiagnostics) -> Self {
        rows.sort_by_key(|r| (r.component, r.bike_id(), r.label_at, r.record_id));

        diagnostics.rows_per_component.clear();
        diagnostics.positives_per_component.clear();
        for row in &rows {
            *diagnostics.rows_per_component.entry(row.component).or_default() += 1;
            if row.label {
                *diagnostics
                    .positives_per_component
                    .entry(row.component)
                    .or_default() += 1;
            }
        }

        Self { rows, diagnostics }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Components with at least one row, in enum order
    pub fn components(&self) -> Vec<Component> {
        self.diagnostics.rows_per_component.keys().copied().collect()
    }

    pub fn rows_for(&self, component: Component) -> impl Iterator<Item = &TrainingRow> {
        self.rows.iter().filter(move |r| r.component == component)
    }
}
