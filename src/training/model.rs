//! Trained component model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::gbm::GradientBoostedModel;
use super::metrics::EvaluationMetrics;
use crate::error::{validate_probability, Result};
use crate::features::{FeatureSchema, FeatureVector};
use crate::models::Component;

const TOP_FEATURES: usize = 5;

/// How and from what a model was trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProvenance {
    pub trained_at: DateTime<Utc>,
    pub seed: u64,
    pub schema_version: String,
    pub sample_count: usize,
    pub train_rows: usize,
    pub eval_rows: usize,
    /// Weight applied to positive rows (negatives per positive in the train split)
    pub positive_class_weight: f64,
    pub crate_version: String,
}

/// Published, read-only classifier for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub component: Component,
    pub schema: FeatureSchema,
    pub booster: GradientBoostedModel,
    pub metrics: EvaluationMetrics,
    pub provenance: ModelProvenance,
}

/// Short description of a published model for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub component: Component,
    pub schema_version: String,
    pub trained_at: DateTime<Utc>,
    pub roc_auc: f64,
    pub sample_count: usize,
    pub trees: usize,
    pub top_features: Vec<(String, f64)>,
}

impl ComponentModel {
    /// Failure probability for a vector built under this model's schema
    pub fn score(&self, vector: &FeatureVector) -> Result<f64> {
        self.schema.validate(vector)?;
        let probability = self.booster.predict_proba(&vector.values);
        validate_probability(probability)?;
        Ok(probability)
    }

    /// Features ranked by share of split gain
    pub fn top_features(&self, n: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .schema
            .names
            .iter()
            .cloned()
            .zip(self.booster.feature_importance())
            .filter(|(_, gain)| *gain > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            component: self.component,
            schema_version: self.schema.version.clone(),
            trained_at: self.provenance.trained_at,
            roc_auc: self.metrics.roc_auc,
            sample_count: self.metrics.sample_count,
            trees: self.booster.trees.len(),
            top_features: self.top_features(TOP_FEATURES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::fixtures::{self, ts};
    use crate::features::FeatureExtractor;
    use crate::data::BikeHistory;
    use std::collections::BTreeMap;

    #[test]
    fn test_constant_model_scores_its_prior() {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let schema = extractor.schema(Component::Chain);
        let model = fixtures::constant_model((*schema).clone(), 0.0);

        let history =
            BikeHistory::from_parts(fixtures::bike(1), vec![], BTreeMap::new(), BTreeMap::new());
        let vector = extractor.extract(&history, Component::Chain, ts(1)).unwrap();
        assert!((model.score(&vector).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_score_rejects_foreign_schema() {
        let extractor = FeatureExtractor::new(FeatureConfig::default()).unwrap();
        let model = fixtures::constant_model((*extractor.schema(Component::Chain)).clone(), 0.0);

        let history =
            BikeHistory::from_parts(fixtures::bike(1), vec![], BTreeMap::new(), BTreeMap::new());
        // gears shares chain's feature names but not its version
        let vector = extractor.extract(&history, Component::Gears, ts(1)).unwrap();
        assert!(matches!(
            model.score(&vector),
            Err(crate::error::MaintenanceError::FeatureSchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_summary_without_splits_has_no_top_features() {
        let schema = FeatureSchema::from_names(Component::Tires, vec!["a".into(), "b".into()]);
        let model = fixtures::constant_model(schema, 1.0);
        let summary = model.summary();
        assert_eq!(summary.trees, 0);
        assert!(summary.top_features.is_empty());
        assert_eq!(summary.schema_version, model.schema.version);
    }
}
