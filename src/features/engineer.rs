//! Feature Engineer
//!
//! Async front of the feature layer. Loads bike histories from the raw entity
//! store, hands them to the pure extractor on blocking threads, and keeps the
//! current-time vectors of every bike in a watermark-guarded cache.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use super::dataset::{DatasetDiagnostics, TrainingDataset, TrainingRow};
use super::extractor::FeatureExtractor;
use super::schema::FeatureSchema;
use super::vector::FeatureVector;
use crate::config::FeatureConfig;
use crate::data::{BikeHistory, DataWatermark, RawEntityStore};
use crate::error::{MaintenanceError, Result};
use crate::models::{Bike, BikeId, Component};

/// Outcome of a bulk feature refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkUpdateReport {
    /// (bike, component) vectors whose values changed or were computed for the first time
    pub updated_count: usize,
    pub unchanged_count: usize,
    /// Bikes that could not be refreshed, with the reason
    pub failed: Vec<(BikeId, String)>,
}

#[derive(Debug, Clone, Default)]
struct CachedBike {
    watermark: DataWatermark,
    vectors: BTreeMap<Component, FeatureVector>,
}

/// Training rows of a single bike
#[derive(Debug, Default)]
struct BikeRows {
    rows: Vec<TrainingRow>,
    labeled: usize,
    dropped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct RefreshCounts {
    updated: usize,
    unchanged: usize,
}

fn join_error(err: tokio::task::JoinError) -> MaintenanceError {
    MaintenanceError::Store(format!("feature task failed: {}", err))
}

/// Turns raw bike entities into per-component feature vectors
#[derive(Clone)]
pub struct FeatureEngineer {
    store: Arc<dyn RawEntityStore>,
    extractor: Arc<FeatureExtractor>,
    cache: Arc<RwLock<HashMap<BikeId, CachedBike>>>,
}

impl FeatureEngineer {
    pub fn new(store: Arc<dyn RawEntityStore>, config: FeatureConfig) -> Result<Self> {
        Ok(Self {
            store,
            extractor: Arc::new(FeatureExtractor::new(config)?),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn schema(&self, component: Component) -> Arc<FeatureSchema> {
        self.extractor.schema(component)
    }

    pub fn config(&self) -> &FeatureConfig {
        self.extractor.config()
    }

    pub fn store(&self) -> &Arc<dyn RawEntityStore> {
        &self.store
    }

    /// Load everything any component's features need for one bike
    pub async fn load_history(&self, bike_id: BikeId) -> Result<BikeHistory> {
        BikeHistory::load(
            self.store.as_ref(),
            bike_id,
            &self.extractor.channels(),
            &Component::ALL,
        )
        .await
    }

    /// Extract from an already loaded history
    pub fn extract(
        &self,
        history: &BikeHistory,
        component: Component,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        self.extractor.extract(history, component, as_of)
    }

    /// Feature vector of one bike at `as_of`; defaulted when the bike has no history yet
    pub async fn compute_features(
        &self,
        bike_id: BikeId,
        component: Component,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let history = self.load_history(bike_id).await?;
        self.extractor.extract(&history, component, as_of)
    }

    /// Like `compute_features`, but no history is `InsufficientHistory`
    pub async fn compute_features_checked(
        &self,
        bike_id: BikeId,
        component: Component,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let history = self.load_history(bike_id).await?;
        self.extractor.extract_checked(&history, component, as_of)
    }

    /// Cached current-time vector from the last bulk update
    pub async fn cached(&self, bike_id: BikeId, component: Component) -> Option<FeatureVector> {
        let cache = self.cache.read().await;
        cache
            .get(&bike_id)
            .and_then(|slot| slot.vectors.get(&component))
            .cloned()
    }

    pub async fn bulk_update_features(&self, bikes: &[Bike]) -> Result<BulkUpdateReport> {
        self.bulk_update_features_at(bikes, Utc::now()).await
    }

    /// Refresh cached vectors of `bikes` at `as_of`
    ///
    /// Bikes whose raw data is unchanged since the last refresh keep their cached
    /// vectors as they are. A failing bike is reported and skipped.
    pub async fn bulk_update_features_at(
        &self,
        bikes: &[Bike],
        as_of: DateTime<Utc>,
    ) -> Result<BulkUpdateReport> {
        let semaphore = Arc::new(Semaphore::new(self.config().max_concurrency));
        let mut handles = Vec::with_capacity(bikes.len());

        for bike in bikes {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| MaintenanceError::Store(e.to_string()))?;
            let engineer = self.clone();
            let bike_id = bike.id;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                engineer.refresh_bike(bike_id, as_of).await
            });
            handles.push((bike_id, handle));
        }

        let mut report = BulkUpdateReport::default();
        for (bike_id, handle) in handles {
            match handle.await.map_err(join_error).and_then(|r| r) {
                Ok(counts) => {
                    report.updated_count += counts.updated;
                    report.unchanged_count += counts.unchanged;
                }
                Err(e) => {
                    warn!("Feature update failed for bike {}: {}", bike_id, e);
                    report.failed.push((bike_id, e.to_string()));
                }
            }
        }

        info!(
            "Bulk feature update: {} bikes, {} updated, {} unchanged, {} failed",
            bikes.len(),
            report.updated_count,
            report.unchanged_count,
            report.failed.len()
        );
        Ok(report)
    }

    async fn refresh_bike(&self, bike_id: BikeId, as_of: DateTime<Utc>) -> Result<RefreshCounts> {
        let history = self.load_history(bike_id).await?;
        let watermark = history.watermark();

        {
            let cache = self.cache.read().await;
            if let Some(slot) = cache.get(&bike_id) {
                if slot.watermark == watermark && slot.vectors.len() == Component::ALL.len() {
                    debug!("Bike {} unchanged since last update", bike_id);
                    return Ok(RefreshCounts {
                        updated: 0,
                        unchanged: slot.vectors.len(),
                    });
                }
            }
        }

        let extractor = Arc::clone(&self.extractor);
        let fresh = tokio::task::spawn_blocking(move || {
            Component::ALL
                .iter()
                .map(|&c| extractor.extract(&history, c, as_of).map(|v| (c, v)))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(join_error)??;

        let mut cache = self.cache.write().await;
        let slot = cache.entry(bike_id).or_default();
        let mut counts = RefreshCounts::default();
        for (component, vector) in fresh {
            match slot.vectors.get(&component) {
                Some(old) if old.same_values(&vector) => counts.unchanged += 1,
                _ => {
                    slot.vectors.insert(component, vector);
                    counts.updated += 1;
                }
            }
        }
        slot.watermark = watermark;

        Ok(counts)
    }

    /// Join every labeled maintenance record to the vector computed just before it
    ///
    /// A bike whose history cannot be loaded or extracted contributes no rows and
    /// is listed in `diagnostics.failed_bikes`; the rest of the fleet still builds.
    pub async fn get_training_dataset(&self) -> Result<TrainingDataset> {
        let bikes = self.store.list_bikes().await?;
        let gap = Duration::seconds(self.config().label_gap_secs);

        let mut rows = Vec::new();
        let mut diagnostics = DatasetDiagnostics::default();

        for bike in &bikes {
            diagnostics.bikes_scanned += 1;
            match self.labeled_rows(bike.id, gap).await {
                Ok(bike_rows) => {
                    diagnostics.labeled_records += bike_rows.labeled;
                    diagnostics.dropped_no_history += bike_rows.dropped;
                    rows.extend(bike_rows.rows);
                }
                Err(e) => {
                    warn!("Skipping bike {} in training dataset: {}", bike.id, e);
                    diagnostics.failed_bikes.push((bike.id, e.to_string()));
                }
            }
        }

        let dataset = TrainingDataset::from_rows(rows, diagnostics);
        info!(
            "Training dataset: {} rows from {} bikes ({} labeled records, {} dropped without history, {} bikes failed)",
            dataset.len(),
            dataset.diagnostics.bikes_scanned,
            dataset.diagnostics.labeled_records,
            dataset.diagnostics.dropped_no_history,
            dataset.diagnostics.failed_bikes.len()
        );
        Ok(dataset)
    }

    async fn labeled_rows(&self, bike_id: BikeId, gap: Duration) -> Result<BikeRows> {
        let history = self.load_history(bike_id).await?;
        let extractor = Arc::clone(&self.extractor);

        tokio::task::spawn_blocking(move || {
            let mut out = BikeRows::default();

            for component in Component::ALL {
                for record in history.maintenance(component) {
                    let Some(label) = record.failure else {
                        continue;
                    };
                    out.labeled += 1;

                    // nothing can precede a label this close to the time origin
                    let Some(as_of) = record.performed_at.checked_sub_signed(gap) else {
                        out.dropped += 1;
                        continue;
                    };
                    match extractor.extract_checked(&history, component, as_of) {
                        Ok(vector) => out.rows.push(TrainingRow {
                            vector,
                            label,
                            component,
                            label_at: record.performed_at,
                            record_id: record.id,
                        }),
                        Err(MaintenanceError::InsufficientHistory { .. }) => out.dropped += 1,
                        Err(e) => return Err(e),
                    }
                }
            }
            Ok(out)
        })
        .await
        .map_err(join_error)?
    }
}
