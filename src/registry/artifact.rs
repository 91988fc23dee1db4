//! Model Artifacts
//!
//! `<dir>/<component>.model.json`, written to a temporary file and renamed into
//! place so a reader never sees a half-written model.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{MaintenanceError, Result};
use crate::features::FeatureSchema;
use crate::models::Component;
use crate::training::{ComponentModel, EvaluationMetrics, GradientBoostedModel, ModelProvenance};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// On-disk layout of a component model
#[derive(Debug, Serialize, Deserialize)]
struct ModelArtifact {
    format_version: u32,
    component: Component,
    schema: FeatureSchema,
    booster: GradientBoostedModel,
    metrics: EvaluationMetrics,
    provenance: ModelProvenance,
}

impl ModelArtifact {
    fn from_model(model: &ComponentModel) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            component: model.component,
            schema: model.schema.clone(),
            booster: model.booster.clone(),
            metrics: model.metrics.clone(),
            provenance: model.provenance.clone(),
        }
    }

    /// Reject artifacts that cannot be scored safely
    fn into_model(self, expected: Component) -> Result<ComponentModel> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(MaintenanceError::Artifact(format!(
                "{}: format version {} is not supported (expected {})",
                expected, self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if self.component != expected || self.schema.component != expected {
            return Err(MaintenanceError::Artifact(format!(
                "{} artifact holds a {} model",
                expected, self.component
            )));
        }
        if !self.schema.is_consistent() {
            return Err(MaintenanceError::Artifact(format!(
                "{}: feature names do not match schema version {}",
                expected, self.schema.version
            )));
        }
        if self.booster.n_features != self.schema.len() {
            return Err(MaintenanceError::Artifact(format!(
                "{}: booster expects {} features, schema has {}",
                expected,
                self.booster.n_features,
                self.schema.len()
            )));
        }

        Ok(ComponentModel {
            component: self.component,
            schema: self.schema,
            booster: self.booster,
            metrics: self.metrics,
            provenance: self.provenance,
        })
    }
}

/// Directory of persisted component models
#[derive(Debug, Clone)]
pub struct ModelArtifactStore {
    dir: PathBuf,
}

impl ModelArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, component: Component) -> PathBuf {
        self.dir.join(format!("{}.model.json", component))
    }

    /// Persist `model`, replacing any previous artifact atomically
    pub fn save(&self, model: &ComponentModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(model.component);
        let tmp = self.dir.join(format!("{}.model.json.tmp", model.component));
        let json = serde_json::to_vec_pretty(&ModelArtifact::from_model(model))?;

        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        info!("Saved {} model to {:?}", model.component, path);
        Ok(path)
    }

    /// Load one component's artifact; `Ok(None)` when none was saved
    pub fn load(&self, component: Component) -> Result<Option<ComponentModel>> {
        let path = self.path_for(component);
        if !path.exists() {
            debug!("No artifact for {} at {:?}", component, path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let artifact: ModelArtifact = serde_json::from_str(&content)
            .map_err(|e| MaintenanceError::Artifact(format!("{:?}: {}", path, e)))?;
        artifact.into_model(component).map(Some)
    }

    /// Every saved artifact, each with its own load result
    pub fn load_all(&self) -> Vec<(Component, Result<ComponentModel>)> {
        Component::ALL
            .iter()
            .filter_map(|&c| match self.load(c) {
                Ok(Some(model)) => Some((c, Ok(model))),
                Ok(None) => None,
                Err(e) => Some((c, Err(e))),
            })
            .collect()
    }
}
