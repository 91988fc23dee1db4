//! Bike History
//!
//! One bike's raw entities, loaded once and sliced by time for any number of
//! (component, as-of) feature computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::store::RawEntityStore;
use crate::error::{MaintenanceError, Result};
use crate::models::{
    Bike, BikeId, Component, MaintenanceRecord, Ride, SensorChannel, TelemetrySample,
};

/// Summary of a bike's raw data used to detect whether anything new arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataWatermark {
    pub rides: usize,
    pub last_ride: Option<DateTime<Utc>>,
    pub telemetry: usize,
    pub last_telemetry: Option<DateTime<Utc>>,
    pub maintenance: usize,
    pub last_maintenance: Option<DateTime<Utc>>,
}

/// Raw entities of a single bike, each sequence in timestamp order
///
/// A ride is recorded on completion, so rides are ordered and sliced by `ended_at`.
#[derive(Debug, Clone)]
pub struct BikeHistory {
    pub bike: Bike,
    rides: Vec<Ride>,
    telemetry: BTreeMap<SensorChannel, Vec<TelemetrySample>>,
    maintenance: BTreeMap<Component, Vec<MaintenanceRecord>>,
}

impl BikeHistory {
    /// Load everything needed for the given channels and components
    pub async fn load(
        store: &dyn RawEntityStore,
        bike_id: BikeId,
        channels: &BTreeSet<SensorChannel>,
        components: &[Component],
    ) -> Result<Self> {
        let bike = store
            .get_bike(bike_id)
            .await?
            .ok_or(MaintenanceError::BikeNotFound(bike_id))?;

        let rides = store.list_rides(bike_id, None).await?;

        let mut telemetry = BTreeMap::new();
        for &channel in channels {
            let samples = store.list_telemetry(bike_id, channel, None).await?;
            telemetry.insert(channel, samples);
        }

        let mut maintenance = BTreeMap::new();
        for &component in components {
            let records = store.list_maintenance(bike_id, component, None).await?;
            maintenance.insert(component, records);
        }

        Ok(Self::from_parts(bike, rides, telemetry, maintenance))
    }

    /// Build from already fetched sequences; each is re-sorted so ordering never depends on the store
    pub fn from_parts(
        bike: Bike,
        mut rides: Vec<Ride>,
        mut telemetry: BTreeMap<SensorChannel, Vec<TelemetrySample>>,
        mut maintenance: BTreeMap<Component, Vec<MaintenanceRecord>>,
    ) -> Self {
        rides.sort_by_key(|r| (r.ended_at, r.id));
        for samples in telemetry.values_mut() {
            samples.sort_by_key(|s| s.recorded_at);
        }
        for records in maintenance.values_mut() {
            records.sort_by_key(|m| (m.performed_at, m.id));
        }

        Self {
            bike,
            rides,
            telemetry,
            maintenance,
        }
    }

    pub fn bike_id(&self) -> BikeId {
        self.bike.id
    }

    /// Rides that ended at or before `as_of`
    pub fn rides_until(&self, as_of: DateTime<Utc>) -> &[Ride] {
        let end = self.rides.partition_point(|r| r.ended_at <= as_of);
        &self.rides[..end]
    }

    /// Samples of `channel` recorded at or before `as_of`
    pub fn telemetry_until(&self, channel: SensorChannel, as_of: DateTime<Utc>) -> &[TelemetrySample] {
        match self.telemetry.get(&channel) {
            Some(samples) => {
                let end = samples.partition_point(|s| s.recorded_at <= as_of);
                &samples[..end]
            }
            None => &[],
        }
    }

    /// Maintenance on `component` performed at or before `as_of`
    pub fn maintenance_until(&self, component: Component, as_of: DateTime<Utc>) -> &[MaintenanceRecord] {
        match self.maintenance.get(&component) {
            Some(records) => {
                let end = records.partition_point(|m| m.performed_at <= as_of);
                &records[..end]
            }
            None => &[],
        }
    }

    /// Every maintenance record for `component`, regardless of time
    pub fn maintenance(&self, component: Component) -> &[MaintenanceRecord] {
        self.maintenance
            .get(&component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when the bike has any ride or telemetry at or before `as_of`
    pub fn has_activity_until(&self, as_of: DateTime<Utc>) -> bool {
        !self.rides_until(as_of).is_empty()
            || self
                .telemetry
                .keys()
                .any(|&channel| !self.telemetry_until(channel, as_of).is_empty())
    }

    pub fn watermark(&self) -> DataWatermark {
        let telemetry_last = self
            .telemetry
            .values()
            .filter_map(|samples| samples.last().map(|s| s.recorded_at))
            .max();
        let maintenance_last = self
            .maintenance
            .values()
            .filter_map(|records| records.last().map(|m| m.performed_at))
            .max();

        DataWatermark {
            rides: self.rides.len(),
            last_ride: self.rides.last().map(|r| r.ended_at),
            telemetry: self.telemetry.values().map(Vec::len).sum(),
            last_telemetry: telemetry_last,
            maintenance: self.maintenance.values().map(Vec::len).sum(),
            last_maintenance: maintenance_last,
        }
    }
}
