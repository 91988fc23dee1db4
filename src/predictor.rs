//! Prediction Service
//!
//! Scores fresh feature vectors against the published component models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PredictionConfig;
use crate::data::BikeHistory;
use crate::error::{MaintenanceError, Result};
use crate::features::{FeatureEngineer, FeatureVector};
use crate::models::{BikeId, Component};
use crate::registry::ModelRegistry;
use crate::training::ComponentModel;

/// Coarse risk band of a failure probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64, config: &PredictionConfig) -> Self {
        if score >= config.high_risk_threshold {
            RiskLevel::High
        } else if score >= config.medium_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Failure risk of one component of one bike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrediction {
    pub bike_id: BikeId,
    pub component: Component,
    pub as_of: DateTime<Utc>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub schema_version: String,
    pub model_trained_at: DateTime<Utc>,
    /// The bike had no history and was scored on defaulted features
    pub defaulted_features: bool,
}

pub struct PredictionService {
    engineer: FeatureEngineer,
    registry: Arc<ModelRegistry>,
    config: PredictionConfig,
}

impl PredictionService {
    pub fn new(engineer: FeatureEngineer, registry: Arc<ModelRegistry>, config: PredictionConfig) -> Self {
        Self {
            engineer,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn score_with(&self, model: &ComponentModel, vector: &FeatureVector) -> Result<RiskPrediction> {
        let risk_score = model.score(vector)?;
        Ok(RiskPrediction {
            bike_id: vector.bike_id,
            component: vector.component,
            as_of: vector.as_of,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score, &self.config),
            schema_version: model.schema.version.clone(),
            model_trained_at: model.provenance.trained_at,
            defaulted_features: vector.is_defaulted(),
        })
    }

    /// Risk of `component` failing on `bike_id`, as of now unless given
    pub async fn predict(
        &self,
        bike_id: BikeId,
        component: Component,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<RiskPrediction> {
        let model = self.registry.require(component)?;
        let as_of = as_of.unwrap_or_else(Utc::now);

        let vector = self
            .engineer
            .compute_features(bike_id, component, as_of)
            .await?;
        let prediction = self.score_with(&model, &vector)?;

        debug!(
            "Bike {} {}: risk {:.3} ({})",
            bike_id,
            component,
            prediction.risk_score,
            prediction.risk_level.as_str()
        );
        Ok(prediction)
    }

    /// Score a vector computed elsewhere
    pub fn score_vector(&self, vector: &FeatureVector) -> Result<RiskPrediction> {
        let model = self.registry.require(vector.component)?;
        self.score_with(&model, vector)
    }

    /// Score many (bike, component) pairs; results come back in request order
    ///
    /// Every component is scored against one model snapshot for the whole
    /// batch, each bike's history is loaded once, and repeated pairs share one
    /// result. A failing pair does not affect the others.
    pub async fn predict_batch(
        &self,
        requests: &[(BikeId, Component)],
        as_of: Option<DateTime<Utc>>,
    ) -> Vec<Result<RiskPrediction>> {
        let as_of = as_of.unwrap_or_else(Utc::now);

        let mut models: HashMap<Component, Option<Arc<ComponentModel>>> = HashMap::new();
        for &(_, component) in requests {
            models
                .entry(component)
                .or_insert_with(|| self.registry.snapshot(component));
        }

        let mut histories: HashMap<BikeId, Result<BikeHistory>> = HashMap::new();
        let mut scored: HashMap<(BikeId, Component), Result<RiskPrediction>> = HashMap::new();
        let mut results = Vec::with_capacity(requests.len());

        for &(bike_id, component) in requests {
            if let Some(done) = scored.get(&(bike_id, component)) {
                results.push(done.as_ref().cloned().map_err(MaintenanceError::replicate));
                continue;
            }

            let result = match models.get(&component).and_then(Option::as_ref) {
                None => Err(MaintenanceError::ModelNotAvailable(component)),
                Some(model) => {
                    if !histories.contains_key(&bike_id) {
                        let history = self.engineer.load_history(bike_id).await;
                        histories.insert(bike_id, history);
                    }
                    match &histories[&bike_id] {
                        Ok(history) => self
                            .engineer
                            .extract(history, component, as_of)
                            .and_then(|vector| self.score_with(model, &vector)),
                        Err(e) => Err(e.replicate()),
                    }
                }
            };

            results.push(result.as_ref().cloned().map_err(MaintenanceError::replicate));
            scored.insert((bike_id, component), result);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Scored batch of {} requests ({} distinct, {} failed)",
            requests.len(),
            scored.len(),
            failed
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureConfig, TrainingConfig};
    use crate::fixtures::{self, fleet_now, FLEET_SIZE};
    use crate::training::TrainingPipeline;

    fn service_with_constant_models(components: &[Component]) -> PredictionService {
        let store = fixtures::fleet_store(3);
        fixtures::add_idle_bike(&store, 40);
        let engineer = FeatureEngineer::new(store, FeatureConfig::default()).unwrap();
        let registry = Arc::new(ModelRegistry::new());
        for &component in components {
            let schema = engineer.schema(component).as_ref().clone();
            registry.publish(fixtures::constant_model(schema, 0.0));
        }
        PredictionService::new(engineer, registry, PredictionConfig::default())
    }

    #[test]
    fn test_risk_levels() {
        let config = PredictionConfig::default();
        assert_eq!(RiskLevel::from_score(0.1, &config), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3, &config), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.69, &config), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.7, &config), RiskLevel::High);
    }

    #[tokio::test]
    async fn test_predict_requires_published_model() {
        let service = service_with_constant_models(&[]);
        let err = service
            .predict(1, Component::Brakes, Some(fleet_now()))
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::ModelNotAvailable(Component::Brakes)));
    }

    #[tokio::test]
    async fn test_zero_history_bike_is_scored() {
        let service = service_with_constant_models(&[Component::Battery]);
        let prediction = service
            .predict(40, Component::Battery, Some(fleet_now()))
            .await
            .unwrap();
        assert!(prediction.defaulted_features);
        assert!((prediction.risk_score - 0.5).abs() < 1e-12);
        assert_eq!(prediction.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn test_score_vector_guards_schema() {
        let service = service_with_constant_models(&[Component::Brakes]);

        let other = FeatureEngineer::new(
            fixtures::fleet_store(1),
            FeatureConfig {
                windows_days: vec![14],
                ..FeatureConfig::default()
            },
        )
        .unwrap();
        let foreign = other
            .compute_features(1, Component::Brakes, fleet_now())
            .await
            .unwrap();

        assert!(matches!(
            service.score_vector(&foreign),
            Err(MaintenanceError::FeatureSchemaMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_predict_batch_order_duplicates_and_isolation() {
        let service = service_with_constant_models(&[Component::Brakes, Component::Chain]);
        let requests = [
            (2, Component::Brakes),
            (404, Component::Brakes),
            (1, Component::Tires),
            (2, Component::Brakes),
            (3, Component::Chain),
        ];

        let results = service.predict_batch(&requests, Some(fleet_now())).await;
        assert_eq!(results.len(), requests.len());

        let first = results[0].as_ref().unwrap();
        assert_eq!((first.bike_id, first.component), (2, Component::Brakes));
        assert!(matches!(results[1], Err(MaintenanceError::BikeNotFound(404))));
        assert!(matches!(
            results[2],
            Err(MaintenanceError::ModelNotAvailable(Component::Tires))
        ));
        assert_eq!(results[3].as_ref().unwrap(), first);
        assert_eq!(results[4].as_ref().unwrap().bike_id, 3);
    }

    #[tokio::test]
    async fn test_batch_matches_single_predictions() {
        let service = service_with_constant_models(&[Component::Chain]);
        let batch = service
            .predict_batch(&[(1, Component::Chain)], Some(fleet_now()))
            .await;
        let single = service
            .predict(1, Component::Chain, Some(fleet_now()))
            .await
            .unwrap();
        assert_eq!(batch[0].as_ref().unwrap(), &single);
    }

    #[tokio::test]
    async fn test_end_to_end_fleet() {
        let store = fixtures::fleet_store(FLEET_SIZE);
        let engineer = FeatureEngineer::new(store, FeatureConfig::default()).unwrap();

        let dataset = engineer.get_training_dataset().await.unwrap();
        assert!(dataset.diagnostics.rows_per_component[&Component::Brakes] >= 15);
        for row in &dataset.rows {
            assert!(row.vector.as_of < row.label_at);
        }

        let registry = Arc::new(ModelRegistry::new());
        let pipeline = TrainingPipeline::new(Arc::clone(&registry), TrainingConfig::default());
        let reports = pipeline.train_models(&dataset).await.unwrap();
        let brakes = &reports[&Component::Brakes];
        assert!(brakes.status.is_published());
        let auc = brakes.metrics.as_ref().unwrap().roc_auc;
        assert!((0.0..=1.0).contains(&auc));

        let service = PredictionService::new(engineer, registry, PredictionConfig::default());
        for bike_id in 1..=FLEET_SIZE {
            let prediction = service
                .predict(bike_id, Component::Brakes, Some(fleet_now()))
                .await
                .unwrap();
            assert!((0.0..=1.0).contains(&prediction.risk_score));
            assert!(!prediction.defaulted_features);
        }
    }
}
