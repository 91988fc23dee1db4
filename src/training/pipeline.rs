//! Training Pipeline
//!
//! Fits one classifier per component present in a training dataset. Each
//! component trains on its own blocking thread, is evaluated on a stratified
//! held-out split, and is persisted and published only when evaluation holds.
//! A component that cannot be trained never aborts the others.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::gbm::{FitError, GradientBoostedModel};
use super::metrics::{calculate_metrics, EvaluationMetrics};
use super::model::{ComponentModel, ModelProvenance};
use super::split::stratified_split;
use crate::config::TrainingConfig;
use crate::error::Result;
use crate::features::{FeatureSchema, TrainingDataset, TrainingRow};
use crate::models::Component;
use crate::registry::{ModelArtifactStore, ModelRegistry};

/// Outcome of one component in a training run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Published,
    InsufficientData { rows: usize, minimum: usize },
    NoPositiveExamples,
    NoNegativeExamples,
    EvaluationFailed { reason: String },
    Cancelled,
    Failed { reason: String },
}

impl ReportStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, ReportStatus::Published)
    }

    /// Skipped before any fit was attempted
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ReportStatus::InsufficientData { .. }
                | ReportStatus::NoPositiveExamples
                | ReportStatus::NoNegativeExamples
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Published => write!(f, "published"),
            ReportStatus::InsufficientData { rows, minimum } => {
                write!(f, "insufficient data ({} rows, need {})", rows, minimum)
            }
            ReportStatus::NoPositiveExamples => write!(f, "no positive examples"),
            ReportStatus::NoNegativeExamples => write!(f, "no negative examples"),
            ReportStatus::EvaluationFailed { reason } => write!(f, "evaluation failed: {}", reason),
            ReportStatus::Cancelled => write!(f, "cancelled"),
            ReportStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub component: Component,
    pub status: ReportStatus,
    /// Present whenever the model got as far as evaluation
    pub metrics: Option<EvaluationMetrics>,
    pub rows: usize,
    pub positives: usize,
}

type FitOutcome = std::result::Result<ComponentModel, (ReportStatus, Option<EvaluationMetrics>)>;

/// Everything a blocking fit needs, owned
struct TrainJob {
    component: Component,
    schema: FeatureSchema,
    x: Vec<Vec<f64>>,
    y: Vec<bool>,
    config: TrainingConfig,
}

fn evaluation_failed(reason: impl Into<String>) -> (ReportStatus, Option<EvaluationMetrics>) {
    (
        ReportStatus::EvaluationFailed {
            reason: reason.into(),
        },
        None,
    )
}

fn fit_component(job: TrainJob, cancel: &AtomicBool, deadline: Option<Instant>) -> FitOutcome {
    let TrainJob {
        component,
        schema,
        x,
        y,
        config,
    } = job;
    let seed = config.seed ^ component.seed_salt();
    let split = stratified_split(&y, config.eval_fraction, seed);

    let train_x: Vec<Vec<f64>> = split.train.iter().map(|&i| x[i].clone()).collect();
    let train_y: Vec<bool> = split.train.iter().map(|&i| y[i]).collect();
    let n_pos = train_y.iter().filter(|&&l| l).count();
    let n_neg = train_y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(evaluation_failed("train split lacks one of the classes"));
    }

    // Positives weigh as much in total as negatives
    let positive_class_weight = n_neg as f64 / n_pos as f64;
    let weights: Vec<f64> = train_y
        .iter()
        .map(|&l| if l { positive_class_weight } else { 1.0 })
        .collect();

    let should_stop =
        || cancel.load(Ordering::SeqCst) || deadline.map_or(false, |d| Instant::now() >= d);
    let booster =
        match GradientBoostedModel::fit(&train_x, &train_y, &weights, &config.gbm, seed, &should_stop) {
            Ok(booster) => booster,
            Err(FitError::Cancelled { completed_trees }) => {
                debug!("{} fit cancelled after {} trees", component, completed_trees);
                return Err((ReportStatus::Cancelled, None));
            }
            Err(e @ FitError::InvalidInput(_)) => return Err(evaluation_failed(e.to_string())),
        };

    let eval_y: Vec<bool> = split.eval.iter().map(|&i| y[i]).collect();
    if !eval_y.iter().any(|&l| l) || eval_y.iter().all(|&l| l) {
        return Err(evaluation_failed("eval split lacks one of the classes"));
    }
    let scores: Vec<f64> = split
        .eval
        .iter()
        .map(|&i| booster.predict_proba(&x[i]))
        .collect();

    let metrics = match calculate_metrics(&scores, &eval_y, config.decision_threshold, train_y.len()) {
        Some(m) if m.roc_auc.is_finite() => m,
        _ => return Err(evaluation_failed("ROC-AUC is undefined on the eval split")),
    };

    Ok(ComponentModel {
        component,
        provenance: ModelProvenance {
            trained_at: Utc::now(),
            seed: config.seed,
            schema_version: schema.version.clone(),
            sample_count: metrics.sample_count,
            train_rows: metrics.train_rows,
            eval_rows: metrics.eval_rows,
            positive_class_weight,
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        schema,
        booster,
        metrics,
    })
}

/// Await a fit, raising its cancel flag once `timeout` elapses
async fn await_fit(
    mut handle: JoinHandle<FitOutcome>,
    cancel: Arc<AtomicBool>,
    timeout: Option<Duration>,
) -> FitOutcome {
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                handle.await
            }
        },
        None => handle.await,
    };

    joined.unwrap_or_else(|e| {
        Err((
            ReportStatus::Failed {
                reason: format!("training task failed: {}", e),
            },
            None,
        ))
    })
}

/// Trains and publishes per-component models
pub struct TrainingPipeline {
    registry: Arc<ModelRegistry>,
    artifacts: Option<ModelArtifactStore>,
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(registry: Arc<ModelRegistry>, config: TrainingConfig) -> Self {
        Self {
            registry,
            artifacts: None,
            config,
        }
    }

    /// Persist every model before publishing it
    pub fn with_artifacts(mut self, artifacts: ModelArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn skip_reason(&self, rows: usize, positives: usize) -> Option<ReportStatus> {
        if rows < self.config.min_rows {
            Some(ReportStatus::InsufficientData {
                rows,
                minimum: self.config.min_rows,
            })
        } else if positives == 0 {
            Some(ReportStatus::NoPositiveExamples)
        } else if positives == rows {
            Some(ReportStatus::NoNegativeExamples)
        } else {
            None
        }
    }

    /// Train every component present in `dataset`
    pub async fn train_models(
        &self,
        dataset: &TrainingDataset,
    ) -> Result<BTreeMap<Component, ComponentReport>> {
        self.config.validate()?;

        let mut reports = BTreeMap::new();
        let mut running = Vec::new();

        for component in dataset.components() {
            let rows: Vec<&TrainingRow> = dataset.rows_for(component).collect();
            let positives = rows.iter().filter(|r| r.label).count();
            let mut report = ComponentReport {
                component,
                status: ReportStatus::Published,
                metrics: None,
                rows: rows.len(),
                positives,
            };

            if let Some(status) = self.skip_reason(rows.len(), positives) {
                info!("Skipping {}: {}", component, status);
                report.status = status;
                reports.insert(component, report);
                continue;
            }

            let schema = rows[0].vector.schema.as_ref().clone();
            if let Some(row) = rows.iter().find(|r| r.vector.schema_version() != schema.version) {
                let reason = format!(
                    "dataset mixes feature schemas {} and {}",
                    schema.version,
                    row.vector.schema_version()
                );
                self.registry.begin_training(component);
                self.registry.mark_failed(component, reason.clone());
                report.status = ReportStatus::Failed { reason };
                reports.insert(component, report);
                continue;
            }

            let job = TrainJob {
                component,
                schema,
                x: rows.iter().map(|r| r.vector.values.clone()).collect(),
                y: rows.iter().map(|r| r.label).collect(),
                config: self.config.clone(),
            };

            info!(
                "Training {} on {} rows ({} positive)",
                component,
                rows.len(),
                positives
            );
            self.registry.begin_training(component);

            let cancel = Arc::new(AtomicBool::new(false));
            let timeout = self.config.component_timeout;
            let deadline = timeout.map(|t| Instant::now() + t);
            let flag = Arc::clone(&cancel);
            let fit = tokio::task::spawn_blocking(move || fit_component(job, &flag, deadline));
            let handle = tokio::spawn(await_fit(fit, cancel, timeout));

            running.push((report, handle));
        }

        for (mut report, handle) in running {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err((
                    ReportStatus::Failed {
                        reason: format!("training task failed: {}", e),
                    },
                    None,
                ))
            });

            let (status, metrics) = match outcome {
                Ok(model) => self.persist_and_publish(model),
                Err((status, metrics)) => {
                    self.registry.mark_failed(report.component, status.to_string());
                    (status, metrics)
                }
            };
            report.status = status;
            report.metrics = metrics;
            reports.insert(report.component, report);
        }

        let published = reports.values().filter(|r| r.status.is_published()).count();
        info!(
            "Training run finished: {} of {} components published",
            published,
            reports.len()
        );
        Ok(reports)
    }

    fn persist_and_publish(&self, model: ComponentModel) -> (ReportStatus, Option<EvaluationMetrics>) {
        let metrics = Some(model.metrics.clone());

        if let Some(artifacts) = &self.artifacts {
            if let Err(e) = artifacts.save(&model) {
                let reason = format!("could not persist model: {}", e);
                self.registry.mark_failed(model.component, reason.clone());
                return (ReportStatus::Failed { reason }, metrics);
            }
        }

        self.registry.publish(model);
        (ReportStatus::Published, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::features::FeatureEngineer;
    use crate::fixtures;
    use crate::registry::ModelState;
    use tempfile::TempDir;

    async fn fleet_dataset(bikes: u32) -> TrainingDataset {
        let engineer =
            FeatureEngineer::new(fixtures::fleet_store(bikes), FeatureConfig::default()).unwrap();
        engineer.get_training_dataset().await.unwrap()
    }

    fn pipeline(config: TrainingConfig) -> TrainingPipeline {
        TrainingPipeline::new(Arc::new(ModelRegistry::new()), config)
    }

    fn relabel(dataset: &TrainingDataset, label: bool) -> TrainingDataset {
        let rows = dataset
            .rows
            .iter()
            .cloned()
            .map(|mut r| {
                r.label = label;
                r
            })
            .collect();
        TrainingDataset::from_rows(rows, dataset.diagnostics.clone())
    }

    #[tokio::test]
    async fn test_train_publishes_brakes() {
        let dataset = fleet_dataset(30).await;
        let pipeline = pipeline(TrainingConfig::default());
        let reports = pipeline.train_models(&dataset).await.unwrap();

        assert_eq!(reports.len(), 1);
        let brakes = &reports[&Component::Brakes];
        assert_eq!(brakes.status, ReportStatus::Published);
        assert_eq!(brakes.rows, 150);
        assert_eq!(brakes.positives, 90);

        let metrics = brakes.metrics.as_ref().unwrap();
        assert!((0.0..=1.0).contains(&metrics.roc_auc));
        assert_eq!(metrics.eval_rows + metrics.train_rows, 150);
        assert_eq!(pipeline.registry().state(Component::Brakes), ModelState::Published);
        assert_eq!(pipeline.registry().state(Component::Chain), ModelState::Untrained);
    }

    #[tokio::test]
    async fn test_training_is_deterministic() {
        let dataset = fleet_dataset(10).await;
        let config = TrainingConfig {
            min_rows: 10,
            ..TrainingConfig::default()
        };
        let first = pipeline(config.clone()).train_models(&dataset).await.unwrap();
        let second = pipeline(config).train_models(&dataset).await.unwrap();

        assert_eq!(
            first[&Component::Brakes].metrics,
            second[&Component::Brakes].metrics
        );
    }

    #[tokio::test]
    async fn test_insufficient_data_keeps_published_model() {
        let dataset = fleet_dataset(3).await;
        let pipeline = pipeline(TrainingConfig::default());
        let schema = dataset.rows[0].vector.schema.as_ref().clone();
        pipeline
            .registry()
            .publish(fixtures::constant_model(schema, 0.0));
        let before = pipeline.registry().snapshot(Component::Brakes).unwrap();

        let reports = pipeline.train_models(&dataset).await.unwrap();
        assert_eq!(
            reports[&Component::Brakes].status,
            ReportStatus::InsufficientData {
                rows: 15,
                minimum: 20
            }
        );

        let after = pipeline.registry().snapshot(Component::Brakes).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(pipeline.registry().state(Component::Brakes), ModelState::Published);
    }

    #[tokio::test]
    async fn test_single_class_components_are_skipped() {
        let dataset = fleet_dataset(5).await;
        let pipeline = pipeline(TrainingConfig::default());

        let reports = pipeline.train_models(&relabel(&dataset, false)).await.unwrap();
        assert_eq!(reports[&Component::Brakes].status, ReportStatus::NoPositiveExamples);

        let reports = pipeline.train_models(&relabel(&dataset, true)).await.unwrap();
        assert_eq!(reports[&Component::Brakes].status, ReportStatus::NoNegativeExamples);
        assert!(reports[&Component::Brakes].status.is_skip());
    }

    #[tokio::test]
    async fn test_zero_timeout_cancels_and_keeps_previous_model() {
        let dataset = fleet_dataset(6).await;
        let pipeline = pipeline(TrainingConfig {
            component_timeout: Some(Duration::ZERO),
            ..TrainingConfig::default()
        });
        let schema = dataset.rows[0].vector.schema.as_ref().clone();
        pipeline
            .registry()
            .publish(fixtures::constant_model(schema, 0.0));

        let reports = pipeline.train_models(&dataset).await.unwrap();
        assert_eq!(reports[&Component::Brakes].status, ReportStatus::Cancelled);
        assert_eq!(pipeline.registry().state(Component::Brakes), ModelState::Failed);
        let kept = pipeline.registry().snapshot(Component::Brakes).unwrap();
        assert!(kept.booster.trees.is_empty());
    }

    #[tokio::test]
    async fn test_models_are_persisted_before_publish() {
        let dir = TempDir::new().unwrap();
        let artifacts = ModelArtifactStore::new(dir.path());
        let dataset = fleet_dataset(6).await;
        let pipeline = pipeline(TrainingConfig::default()).with_artifacts(artifacts.clone());

        let reports = pipeline.train_models(&dataset).await.unwrap();
        assert!(reports[&Component::Brakes].status.is_published());

        let published = pipeline.registry().snapshot(Component::Brakes).unwrap();
        let reloaded = artifacts.load(Component::Brakes).unwrap().unwrap();
        assert_eq!(reloaded.schema.version, published.schema.version);
        for row in &dataset.rows {
            assert_eq!(
                reloaded.score(&row.vector).unwrap().to_bits(),
                published.score(&row.vector).unwrap().to_bits()
            );
        }
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_publish() {
        let dir = TempDir::new().unwrap();
        // a regular file where the artifact directory should be
        let blocker = dir.path().join("models");
        std::fs::write(&blocker, "").unwrap();

        let dataset = fleet_dataset(6).await;
        let pipeline =
            pipeline(TrainingConfig::default()).with_artifacts(ModelArtifactStore::new(&blocker));
        let reports = pipeline.train_models(&dataset).await.unwrap();

        assert!(matches!(
            reports[&Component::Brakes].status,
            ReportStatus::Failed { .. }
        ));
        assert!(reports[&Component::Brakes].metrics.is_some());
        assert!(pipeline.registry().snapshot(Component::Brakes).is_none());
        assert_eq!(pipeline.registry().state(Component::Brakes), ModelState::Failed);
    }

    #[tokio::test]
    async fn test_mixed_feature_schemas_fail_the_component() {
        let current = fleet_dataset(6).await;
        let wide = FeatureEngineer::new(
            fixtures::fleet_store(2),
            FeatureConfig {
                windows_days: vec![14],
                ..FeatureConfig::default()
            },
        )
        .unwrap()
        .get_training_dataset()
        .await
        .unwrap();
        assert_ne!(
            current.rows[0].vector.schema_version(),
            wide.rows[0].vector.schema_version()
        );

        let rows = current.rows.iter().chain(&wide.rows).cloned().collect();
        let mixed = TrainingDataset::from_rows(rows, current.diagnostics.clone());
        let pipeline = pipeline(TrainingConfig::default());
        let reports = pipeline.train_models(&mixed).await.unwrap();

        match &reports[&Component::Brakes].status {
            ReportStatus::Failed { reason } => assert!(reason.contains("mixes feature schemas")),
            other => panic!("unexpected status: {other}"),
        }
        assert!(reports[&Component::Brakes].metrics.is_none());
        assert_eq!(pipeline.registry().state(Component::Brakes), ModelState::Failed);
        assert!(pipeline.registry().snapshot(Component::Brakes).is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let dataset = fleet_dataset(2).await;
        let pipeline = pipeline(TrainingConfig {
            eval_fraction: 1.5,
            ..TrainingConfig::default()
        });
        assert!(pipeline.train_models(&dataset).await.is_err());
    }
}
