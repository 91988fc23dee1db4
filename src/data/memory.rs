//! In-memory raw entity store
//!
//! Backs the CLI (filled from CSV exports) and the test suite. Records are kept
//! per bike in timestamp order so range reads are a binary search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::store::RawEntityStore;
use crate::error::Result;
use crate::models::{
    Bike, BikeId, Component, MaintenanceRecord, Ride, SensorChannel, TelemetrySample,
};

#[derive(Debug, Default)]
struct BikeRecords {
    rides: Vec<Ride>,
    telemetry: BTreeMap<SensorChannel, Vec<TelemetrySample>>,
    maintenance: BTreeMap<Component, Vec<MaintenanceRecord>>,
}

#[derive(Debug, Default)]
struct Inner {
    bikes: BTreeMap<BikeId, Bike>,
    records: HashMap<BikeId, BikeRecords>,
}

/// Thread-safe store holding every raw entity in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

/// Insert keeping `items` sorted by `key`; equal keys keep insertion order
fn insert_sorted<T, K: Ord>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> K) {
    let k = key(&item);
    let pos = items.partition_point(|existing| key(existing) <= k);
    items.insert(pos, item);
}

/// Clone the suffix of a timestamp-ordered slice starting at `since`
fn tail_since<T: Clone>(
    items: &[T],
    since: Option<DateTime<Utc>>,
    ts: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    match since {
        Some(since) => {
            let start = items.partition_point(|item| ts(item) < since);
            items[start..].to_vec()
        }
        None => items.to_vec(),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_bike(&self, bike: Bike) {
        let mut inner = self.write();
        inner.records.entry(bike.id).or_default();
        inner.bikes.insert(bike.id, bike);
    }

    pub fn add_ride(&self, ride: Ride) {
        let mut inner = self.write();
        let records = inner.records.entry(ride.bike_id).or_default();
        insert_sorted(&mut records.rides, ride, |r| r.started_at);
    }

    pub fn add_telemetry(&self, sample: TelemetrySample) {
        let mut inner = self.write();
        let records = inner.records.entry(sample.bike_id).or_default();
        let channel = records.telemetry.entry(sample.channel).or_default();
        insert_sorted(channel, sample, |s| s.recorded_at);
    }

    pub fn add_maintenance(&self, record: MaintenanceRecord) {
        let mut inner = self.write();
        let records = inner.records.entry(record.bike_id).or_default();
        let component = records.maintenance.entry(record.component).or_default();
        insert_sorted(component, record, |m| m.performed_at);
    }

    pub fn bike_count(&self) -> usize {
        self.read().bikes.len()
    }

    /// Total (rides, telemetry samples, maintenance records) held
    pub fn record_counts(&self) -> (usize, usize, usize) {
        let inner = self.read();
        inner.records.values().fold((0, 0, 0), |(r, t, m), rec| {
            (
                r + rec.rides.len(),
                t + rec.telemetry.values().map(Vec::len).sum::<usize>(),
                m + rec.maintenance.values().map(Vec::len).sum::<usize>(),
            )
        })
    }
}

#[async_trait]
impl RawEntityStore for InMemoryStore {
    async fn get_bike(&self, bike_id: BikeId) -> Result<Option<Bike>> {
        Ok(self.read().bikes.get(&bike_id).cloned())
    }

    async fn list_bikes(&self) -> Result<Vec<Bike>> {
        Ok(self.read().bikes.values().cloned().collect())
    }

    async fn list_rides(&self, bike_id: BikeId, since: Option<DateTime<Utc>>) -> Result<Vec<Ride>> {
        let inner = self.read();
        Ok(inner
            .records
            .get(&bike_id)
            .map(|rec| tail_since(&rec.rides, since, |r| r.started_at))
            .unwrap_or_default())
    }

    async fn list_telemetry(
        &self,
        bike_id: BikeId,
        channel: SensorChannel,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TelemetrySample>> {
        let inner = self.read();
        Ok(inner
            .records
            .get(&bike_id)
            .and_then(|rec| rec.telemetry.get(&channel))
            .map(|samples| tail_since(samples, since, |s| s.recorded_at))
            .unwrap_or_default())
    }

    async fn list_maintenance(
        &self,
        bike_id: BikeId,
        component: Component,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MaintenanceRecord>> {
        let inner = self.read();
        Ok(inner
            .records
            .get(&bike_id)
            .and_then(|rec| rec.maintenance.get(&component))
            .map(|records| tail_since(records, since, |m| m.performed_at))
            .unwrap_or_default())
    }
}
