//! Raw entity repository boundary
//!
//! The core only reads through this trait. Sequences are expected in timestamp
//! order, and `since` is inclusive; `None` means the full history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Bike, BikeId, Component, MaintenanceRecord, Ride, SensorChannel, TelemetrySample,
};

#[async_trait]
pub trait RawEntityStore: Send + Sync {
    async fn get_bike(&self, bike_id: BikeId) -> Result<Option<Bike>>;

    async fn list_bikes(&self) -> Result<Vec<Bike>>;

    async fn list_rides(&self, bike_id: BikeId, since: Option<DateTime<Utc>>) -> Result<Vec<Ride>>;

    async fn list_telemetry(
        &self,
        bike_id: BikeId,
        channel: SensorChannel,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TelemetrySample>>;

    async fn list_maintenance(
        &self,
        bike_id: BikeId,
        component: Component,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MaintenanceRecord>>;
}
