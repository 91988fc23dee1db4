//! Model Registry
//!
//! One slot per component holding its lifecycle state and the currently
//! published model. Publishing swaps an `Arc`; scorers clone the `Arc` under a
//! short read lock and never hold the lock while scoring.

pub mod artifact;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::error::{MaintenanceError, Result};
use crate::models::Component;
use crate::training::{ComponentModel, ModelSummary};

pub use artifact::{ModelArtifactStore, ARTIFACT_FORMAT_VERSION};

/// Lifecycle of a component's model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Untrained,
    Training,
    Published,
    /// Last attempt failed; a previously published model stays in service
    Failed,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelState::Untrained => "untrained",
            ModelState::Training => "training",
            ModelState::Published => "published",
            ModelState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    state: ModelState,
    published: Option<Arc<ComponentModel>>,
    last_error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: ModelState::Untrained,
            published: None,
            last_error: None,
            updated_at: None,
        }
    }
}

/// Status of one component as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: Component,
    pub state: ModelState,
    pub published: Option<ModelSummary>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Versioned store of per-component models
#[derive(Debug)]
pub struct ModelRegistry {
    slots: RwLock<BTreeMap<Component, Slot>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        let slots = Component::ALL
            .iter()
            .map(|&c| (c, Slot::default()))
            .collect();
        Self {
            slots: RwLock::new(slots),
        }
    }

    // A panic while holding the lock leaves every slot in a valid state
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Component, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Component, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F: FnOnce(&mut Slot)>(&self, component: Component, f: F) {
        let mut slots = self.write();
        let slot = slots.entry(component).or_default();
        f(slot);
        slot.updated_at = Some(Utc::now());
    }

    pub fn begin_training(&self, component: Component) {
        self.update(component, |slot| {
            slot.state = ModelState::Training;
            slot.last_error = None;
        });
    }

    /// Make `model` the one served for its component
    pub fn publish(&self, model: ComponentModel) -> Arc<ComponentModel> {
        let component = model.component;
        let model = Arc::new(model);
        self.update(component, |slot| {
            slot.state = ModelState::Published;
            slot.published = Some(Arc::clone(&model));
            slot.last_error = None;
        });
        info!(
            "Published {} model (schema {}, ROC-AUC {:.3})",
            component, model.schema.version, model.metrics.roc_auc
        );
        model
    }

    /// Record a failed attempt; the published model, if any, is kept
    pub fn mark_failed(&self, component: Component, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Training for {} failed: {}", component, reason);
        self.update(component, |slot| {
            slot.state = ModelState::Failed;
            slot.last_error = Some(reason);
        });
    }

    pub fn state(&self, component: Component) -> ModelState {
        self.read()
            .get(&component)
            .map(|slot| slot.state)
            .unwrap_or(ModelState::Untrained)
    }

    pub fn snapshot(&self, component: Component) -> Option<Arc<ComponentModel>> {
        self.read()
            .get(&component)
            .and_then(|slot| slot.published.clone())
    }

    /// Published model or `ModelNotAvailable`
    pub fn require(&self, component: Component) -> Result<Arc<ComponentModel>> {
        self.snapshot(component)
            .ok_or(MaintenanceError::ModelNotAvailable(component))
    }

    pub fn status(&self) -> Vec<ComponentStatus> {
        self.read()
            .iter()
            .map(|(&component, slot)| ComponentStatus {
                component,
                state: slot.state,
                published: slot.published.as_ref().map(|m| m.summary()),
                last_error: slot.last_error.clone(),
                updated_at: slot.updated_at,
            })
            .collect()
    }

    /// Publish every valid artifact found in `store`; returns how many were loaded
    pub fn load_published(&self, store: &ModelArtifactStore) -> usize {
        let mut loaded = 0;
        for (component, result) in store.load_all() {
            match result {
                Ok(model) => {
                    self.publish(model);
                    loaded += 1;
                }
                Err(e) => self.mark_failed(component, format!("artifact rejected: {}", e)),
            }
        }
        info!("Loaded {} model artifacts from {:?}", loaded, store.dir());
        loaded
    }
}
