//! Per-component model training: split, boosted trees, evaluation, pipeline

pub mod gbm;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod split;

pub use gbm::{FitError, GradientBoostedModel, RegressionTree, TreeNode};
pub use metrics::{calculate_metrics, roc_auc, EvaluationMetrics};
pub use model::{ComponentModel, ModelProvenance, ModelSummary};
pub use pipeline::{ComponentReport, ReportStatus, TrainingPipeline};
pub use split::{stratified_split, Split};
