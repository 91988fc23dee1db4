//! Bikefleet - Predictive maintenance for shared bike fleets
//!
//! This library provides:
//! - Time-windowed feature vectors per bike and component from rides, telemetry and maintenance
//! - Labeled training datasets joined without look-ahead
//! - One gradient-boosted failure classifier per component, with held-out evaluation
//! - A model registry with atomic publishing and on-disk artifacts
//! - Risk scoring of single bikes and batches
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bikefleet::config::{FeatureConfig, PredictionConfig, TrainingConfig};
//! use bikefleet::data::load_fleet_dir;
//! use bikefleet::features::FeatureEngineer;
//! use bikefleet::predictor::PredictionService;
//! use bikefleet::registry::ModelRegistry;
//! use bikefleet::training::TrainingPipeline;
//! use bikefleet::Component;
//!
//! # async fn run() -> bikefleet::Result<()> {
//! let store = Arc::new(load_fleet_dir("data/fleet")?);
//! let engineer = FeatureEngineer::new(store, FeatureConfig::default())?;
//!
//! let registry = Arc::new(ModelRegistry::new());
//! let dataset = engineer.get_training_dataset().await?;
//! TrainingPipeline::new(Arc::clone(&registry), TrainingConfig::default())
//!     .train_models(&dataset)
//!     .await?;
//!
//! let service = PredictionService::new(engineer, registry, PredictionConfig::default());
//! let risk = service.predict(17, Component::Brakes, None).await?;
//! println!("brakes risk for bike 17: {:.2}", risk.risk_score);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod models;
pub mod predictor;
pub mod registry;
pub mod training;

#[cfg(test)]
mod fixtures;

// Re-export commonly used types
pub use error::{MaintenanceError, Result};
pub use features::{FeatureEngineer, FeatureVector};
pub use models::{
    Bike, BikeId, Component, MaintenanceAction, MaintenanceRecord, Ride, SensorChannel,
    TelemetrySample,
};
pub use predictor::{PredictionService, RiskLevel, RiskPrediction};
pub use registry::ModelRegistry;
pub use training::TrainingPipeline;
