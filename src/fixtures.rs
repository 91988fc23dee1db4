//! Shared test fleet
//!
//! Deterministic synthetic fleet: every bike rides once a day, reports brake pad
//! wear and vibration on every ride, and has brakes serviced every ten days.
//! Wear in the run-up to a failed service is high, otherwise low, so the
//! brakes model has a learnable signal.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::data::InMemoryStore;
use crate::models::{
    Bike, BikeId, Component, MaintenanceAction, MaintenanceRecord, Ride, RouteMeta,
    SensorChannel, TelemetrySample,
};

pub const FLEET_SIZE: u32 = 30;
pub const RIDES_PER_BIKE: i64 = 50;
pub const SERVICE_INTERVAL_DAYS: i64 = 10;

/// Fleet epoch plus whole days
pub fn ts(day: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::days(day)
}

/// Clock after every fixture record
pub fn fleet_now() -> DateTime<Utc> {
    ts(RIDES_PER_BIKE + 1)
}

/// Service `k` (1-based) of `bike` is a failure for three of every five services
pub fn service_failed(bike: BikeId, k: i64) -> bool {
    (k + bike as i64) % 5 < 3
}

fn jitter(bike: BikeId, i: i64) -> f64 {
    ((bike as i64 * 31 + i * 17) % 7) as f64 * 0.01
}

pub fn bike(id: BikeId) -> Bike {
    Bike {
        id,
        registered_at: ts(0),
        current_mileage_km: 0.0,
        total_rides: 0,
    }
}

/// Populate `store` with one fixture bike
pub fn add_fleet_bike(store: &InMemoryStore, id: BikeId) {
    store.add_bike(bike(id));

    for day in 1..=RIDES_PER_BIKE {
        let started_at = ts(day) + Duration::hours(8);
        store.add_ride(Ride {
            id: id as u64 * 1_000 + day as u64,
            bike_id: id,
            started_at,
            ended_at: started_at + Duration::minutes(30),
            distance_km: 3.0 + (day % 4) as f64,
            route: RouteMeta::default(),
        });

        let upcoming = (day + SERVICE_INTERVAL_DAYS - 1) / SERVICE_INTERVAL_DAYS;
        let wear = if service_failed(id, upcoming) { 0.8 } else { 0.3 };
        store.add_telemetry(TelemetrySample {
            bike_id: id,
            recorded_at: started_at,
            channel: SensorChannel::BrakePadWear,
            value: wear + jitter(id, day),
        });
        store.add_telemetry(TelemetrySample {
            bike_id: id,
            recorded_at: started_at,
            channel: SensorChannel::Vibration,
            value: 1.0 + jitter(id, day + 3),
        });
    }

    for k in 1..=(RIDES_PER_BIKE / SERVICE_INTERVAL_DAYS) {
        store.add_maintenance(MaintenanceRecord {
            id: id as u64 * 1_000 + k as u64,
            bike_id: id,
            component: Component::Brakes,
            performed_at: ts(k * SERVICE_INTERVAL_DAYS) + Duration::hours(20),
            action: MaintenanceAction::Repair,
            failure: Some(service_failed(id, k)),
            cause: None,
        });
    }
}

/// `bikes` fixture bikes with ids `1..=bikes`
pub fn fleet_store(bikes: u32) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for id in 1..=bikes {
        add_fleet_bike(&store, id);
    }
    Arc::new(store)
}

/// Registered bike with no rides, telemetry or maintenance
pub fn add_idle_bike(store: &InMemoryStore, id: BikeId) {
    store.add_bike(bike(id));
}

/// Model with no trees that scores every vector at `sigmoid(base_score)`
pub fn constant_model(
    schema: crate::features::FeatureSchema,
    base_score: f64,
) -> crate::training::ComponentModel {
    use crate::training::{
        ComponentModel, EvaluationMetrics, GradientBoostedModel, ModelProvenance,
    };

    ComponentModel {
        component: schema.component,
        provenance: ModelProvenance {
            trained_at: ts(0),
            seed: 0,
            schema_version: schema.version.clone(),
            sample_count: 0,
            train_rows: 0,
            eval_rows: 0,
            positive_class_weight: 1.0,
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        booster: GradientBoostedModel {
            n_features: schema.len(),
            base_score,
            learning_rate: 0.1,
            trees: Vec::new(),
        },
        metrics: EvaluationMetrics::default(),
        schema,
    }
}
