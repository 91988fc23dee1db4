//! Feature engineering: schemas, pure extraction and the async engineer

pub mod aggregates;
pub mod dataset;
pub mod engineer;
pub mod extractor;
pub mod schema;
pub mod vector;

pub use dataset::{DatasetDiagnostics, TrainingDataset, TrainingRow};
pub use engineer::{BulkUpdateReport, FeatureEngineer};
pub use extractor::FeatureExtractor;
pub use schema::{FeatureSchema, MISSING_SENTINEL, SCHEMA_REVISION};
pub use vector::{FeatureVector, HistoryCoverage};
