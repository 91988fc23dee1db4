use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{BikeId, Component};

/// Errors raised by the maintenance prediction core
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// Bike has no rides or telemetry at or before `as_of`
    #[error("bike {bike_id} has no ride or telemetry history before {as_of}")]
    InsufficientHistory { bike_id: BikeId, as_of: DateTime<Utc> },

    #[error("feature schema mismatch for {component}: model expects {expected}, vector has {found}")]
    FeatureSchemaMismatch {
        component: Component,
        expected: String,
        found: String,
    },

    #[error("no published model for component {0}")]
    ModelNotAvailable(Component),

    #[error("bike {0} not found")]
    BikeNotFound(BikeId),

    #[error("training for {0} was cancelled")]
    TrainingCancelled(Component),

    #[error("feature {name} has non-finite value {value}")]
    InvalidFeatureValue { name: String, value: f64 },

    #[error("raw entity store error: {0}")]
    Store(String),

    #[error("model artifact error: {0}")]
    Artifact(String),

    #[error("CSV load error: {0}")]
    Csv(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

impl MaintenanceError {
    /// Equivalent error for another caller; I/O and serde sources collapse to their message
    pub fn replicate(&self) -> Self {
        use MaintenanceError::*;

        match self {
            InsufficientHistory { bike_id, as_of } => InsufficientHistory {
                bike_id: *bike_id,
                as_of: *as_of,
            },
            FeatureSchemaMismatch {
                component,
                expected,
                found,
            } => FeatureSchemaMismatch {
                component: *component,
                expected: expected.clone(),
                found: found.clone(),
            },
            ModelNotAvailable(c) => ModelNotAvailable(*c),
            BikeNotFound(id) => BikeNotFound(*id),
            TrainingCancelled(c) => TrainingCancelled(*c),
            InvalidFeatureValue { name, value } => InvalidFeatureValue {
                name: name.clone(),
                value: *value,
            },
            Store(msg) => Store(msg.clone()),
            Artifact(msg) => Artifact(msg.clone()),
            Csv(msg) => Csv(msg.clone()),
            InvalidConfig(msg) => InvalidConfig(msg.clone()),
            Io(e) => Store(e.to_string()),
            Serialization(e) => Store(e.to_string()),
        }
    }
}

impl From<polars::prelude::PolarsError> for MaintenanceError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        MaintenanceError::Csv(err.to_string())
    }
}

/// Validation functions
pub fn validate_probability(prob: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(MaintenanceError::InvalidFeatureValue {
            name: "probability".to_string(),
            value: prob,
        });
    }
    Ok(())
}

pub fn validate_feature_values(names: &[String], values: &[f64]) -> Result<()> {
    for (name, &value) in names.iter().zip(values) {
        if !value.is_finite() {
            return Err(MaintenanceError::InvalidFeatureValue {
                name: name.clone(),
                value,
            });
        }
    }
    Ok(())
}

pub fn validate_fraction(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(MaintenanceError::InvalidConfig(format!(
            "{} must be in (0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_probability_valid() {
        assert!(validate_probability(0.0).is_ok());
        assert!(validate_probability(0.5).is_ok());
        assert!(validate_probability(1.0).is_ok());
    }

    #[test]
    fn test_validate_probability_invalid() {
        assert!(validate_probability(-0.1).is_err());
        assert!(validate_probability(1.1).is_err());
        assert!(validate_probability(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_feature_values() {
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(validate_feature_values(&names, &[1.0, -1.0]).is_ok());

        let err = validate_feature_values(&names, &[1.0, f64::INFINITY]).unwrap_err();
        match err {
            MaintenanceError::InvalidFeatureValue { name, .. } => assert_eq!(name, "b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_fraction() {
        assert!(validate_fraction("eval_fraction", 0.25).is_ok());
        assert!(validate_fraction("eval_fraction", 0.0).is_err());
        assert!(validate_fraction("eval_fraction", 1.0).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = MaintenanceError::ModelNotAvailable(Component::Brakes);
        assert!(err.to_string().contains("brakes"));

        let err = MaintenanceError::FeatureSchemaMismatch {
            component: Component::Chain,
            expected: "r1-aaaa".to_string(),
            found: "r1-bbbb".to_string(),
        };
        assert!(err.to_string().contains("r1-aaaa"));
        assert!(err.to_string().contains("r1-bbbb"));
    }

    #[test]
    fn test_replicate() {
        let err = MaintenanceError::BikeNotFound(12);
        assert!(matches!(err.replicate(), MaintenanceError::BikeNotFound(12)));

        let io = MaintenanceError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        match io.replicate() {
            MaintenanceError::Store(msg) => assert!(msg.contains("disk gone")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
