//! Feature Extraction
//!
//! Pure transformation of a loaded `BikeHistory` into a `FeatureVector`.
//! Nothing here touches the store or the clock: the same history and as-of
//! always give the same values, in the order laid out by `feature_names`.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::aggregates::{days_between, summarize, window_start, WindowStats};
use super::schema::{canonical_windows, FeatureSchema, MISSING_SENTINEL};
use super::vector::{FeatureVector, HistoryCoverage};
use crate::config::FeatureConfig;
use crate::data::BikeHistory;
use crate::error::{validate_feature_values, MaintenanceError, Result};
use crate::models::{Component, SensorChannel};

fn flag(present: bool) -> f64 {
    if present {
        1.0
    } else {
        0.0
    }
}

/// Push `[count, sum, mean, max, slope, present]` for one window
fn push_stats(values: &mut Vec<f64>, stats: Option<WindowStats>) {
    match stats {
        Some(s) => values.extend([
            s.count as f64,
            s.sum,
            s.mean,
            s.max,
            s.slope.unwrap_or(MISSING_SENTINEL),
            1.0,
        ]),
        None => values.extend([
            0.0,
            MISSING_SENTINEL,
            MISSING_SENTINEL,
            MISSING_SENTINEL,
            MISSING_SENTINEL,
            0.0,
        ]),
    }
}

/// Builds feature vectors for every component from a shared configuration
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    windows: Vec<u32>,
    schemas: BTreeMap<Component, Arc<FeatureSchema>>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;

        let schemas = Component::ALL
            .iter()
            .map(|&c| (c, Arc::new(FeatureSchema::build(&config, c))))
            .collect();

        Ok(Self {
            windows: canonical_windows(&config),
            config,
            schemas,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn schema(&self, component: Component) -> Arc<FeatureSchema> {
        // populated for every variant in `new`
        Arc::clone(&self.schemas[&component])
    }

    /// Union of channels any component reads
    pub fn channels(&self) -> BTreeSet<SensorChannel> {
        self.config
            .channel_map
            .values()
            .flat_map(|channels| channels.iter().copied())
            .collect()
    }

    /// Compute the vector; a bike without activity gets a defaulted vector
    pub fn extract(
        &self,
        history: &BikeHistory,
        component: Component,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let schema = self.schema(component);
        let coverage = if history.has_activity_until(as_of) {
            HistoryCoverage::Observed
        } else {
            HistoryCoverage::Empty
        };

        let mut values = Vec::with_capacity(schema.len());
        self.push_lifetime(&mut values, history, as_of);
        self.push_maintenance(&mut values, history, component, as_of);

        for &window in &self.windows {
            // windows reaching past the earliest representable instant cover everything
            let start = as_of
                .checked_sub_signed(Duration::days(i64::from(window)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            self.push_ride_window(&mut values, history, as_of, start);
            for &channel in self.config.channels_for(component) {
                self.push_channel_window(&mut values, history, channel, as_of, start);
            }
        }

        debug_assert_eq!(values.len(), schema.len());
        validate_feature_values(&schema.names, &values)?;

        Ok(FeatureVector {
            bike_id: history.bike_id(),
            component,
            as_of,
            schema,
            values,
            coverage,
        })
    }

    /// Like `extract`, but a bike without activity is `InsufficientHistory`
    pub fn extract_checked(
        &self,
        history: &BikeHistory,
        component: Component,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        if !history.has_activity_until(as_of) {
            return Err(MaintenanceError::InsufficientHistory {
                bike_id: history.bike_id(),
                as_of,
            });
        }
        self.extract(history, component, as_of)
    }

    fn push_lifetime(&self, values: &mut Vec<f64>, history: &BikeHistory, as_of: DateTime<Utc>) {
        let rides = history.rides_until(as_of);
        let age = days_between(history.bike.registered_at, as_of).max(0.0);
        let distance: f64 = rides.iter().map(|r| r.distance_km).sum();

        values.extend([age, distance, rides.len() as f64]);
    }

    fn push_maintenance(
        &self,
        values: &mut Vec<f64>,
        history: &BikeHistory,
        component: Component,
        as_of: DateTime<Utc>,
    ) {
        let records = history.maintenance_until(component, as_of);
        let last = records.last();
        // Without prior service the clock starts at registration
        let since = last
            .map(|m| m.performed_at)
            .unwrap_or(history.bike.registered_at);

        let rides = history.rides_until(as_of);
        let distance_since: f64 = rides[window_start(rides, since, |r| r.ended_at)..]
            .iter()
            .map(|r| r.distance_km)
            .sum();
        let prior_failures = records
            .iter()
            .filter(|m| m.failure == Some(true))
            .count();

        values.extend([
            days_between(since, as_of).max(0.0),
            distance_since,
            flag(last.is_some()),
            prior_failures as f64,
        ]);
    }

    fn push_ride_window(
        &self,
        values: &mut Vec<f64>,
        history: &BikeHistory,
        as_of: DateTime<Utc>,
        start: DateTime<Utc>,
    ) {
        let rides = history.rides_until(as_of);
        let in_window = &rides[window_start(rides, start, |r| r.ended_at)..];

        let points: Vec<(f64, f64)> = in_window
            .iter()
            .map(|r| (days_between(as_of, r.ended_at), r.distance_km))
            .collect();

        match summarize(&points) {
            Some(stats) => {
                let duration_mean = in_window.iter().map(|r| r.duration_minutes()).sum::<f64>()
                    / in_window.len() as f64;
                values.extend([
                    stats.count as f64,
                    stats.sum,
                    stats.mean,
                    stats.max,
                    duration_mean,
                    stats.slope.unwrap_or(MISSING_SENTINEL),
                    1.0,
                ]);
            }
            None => values.extend([
                0.0,
                MISSING_SENTINEL,
                MISSING_SENTINEL,
                MISSING_SENTINEL,
                MISSING_SENTINEL,
                MISSING_SENTINEL,
                0.0,
            ]),
        }
    }

    fn push_channel_window(
        &self,
        values: &mut Vec<f64>,
        history: &BikeHistory,
        channel: SensorChannel,
        as_of: DateTime<Utc>,
        start: DateTime<Utc>,
    ) {
        let samples = history.telemetry_until(channel, as_of);
        let points: Vec<(f64, f64)> = samples[window_start(samples, start, |s| s.recorded_at)..]
            .iter()
            .map(|s| (days_between(as_of, s.recorded_at), s.value))
            .collect();

        push_stats(values, summarize(&points));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Bike, MaintenanceAction, MaintenanceRecord, Ride, RouteMeta, TelemetrySample,
    };

    fn ts(day: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::days(day)
    }

    fn bike() -> Bike {
        Bike {
            id: 3,
            registered_at: ts(0),
            current_mileage_km: 999.0,
            total_rides: 999,
        }
    }

    fn ride(id: u64, day: i64, km: f64) -> Ride {
        Ride {
            id,
            bike_id: 3,
            started_at: ts(day),
            ended_at: ts(day) + Duration::minutes(20),
            distance_km: km,
            route: RouteMeta::default(),
        }
    }

    fn wear(day: i64, value: f64) -> TelemetrySample {
        TelemetrySample {
            bike_id: 3,
            recorded_at: ts(day),
            channel: SensorChannel::BrakePadWear,
            value,
        }
    }

    fn history() -> BikeHistory {
        let rides = vec![ride(1, 10, 2.0), ride(2, 95, 4.0), ride(3, 98, 6.0)];
        let mut telemetry = BTreeMap::new();
        telemetry.insert(
            SensorChannel::BrakePadWear,
            vec![wear(95, 0.2), wear(98, 0.5)],
        );
        let mut maintenance = BTreeMap::new();
        maintenance.insert(
            Component::Brakes,
            vec![MaintenanceRecord {
                id: 1,
                bike_id: 3,
                component: Component::Brakes,
                performed_at: ts(50),
                action: MaintenanceAction::Repair,
                failure: Some(true),
                cause: None,
            }],
        );
        BikeHistory::from_parts(bike(), rides, telemetry, maintenance)
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_is_deterministic() {
        let history = history();
        let extractor = extractor();
        let a = extractor.extract(&history, Component::Brakes, ts(100)).unwrap();
        let b = extractor.extract(&history, Component::Brakes, ts(100)).unwrap();
        assert!(a.same_values(&b));
        assert_eq!(a.values.len(), a.schema.len());
    }

    #[test]
    fn test_window_aggregates() {
        let vector = extractor()
            .extract(&history(), Component::Brakes, ts(100))
            .unwrap();

        assert_eq!(vector.get("rides_count_7d"), Some(2.0));
        assert_eq!(vector.get("ride_distance_sum_7d"), Some(10.0));
        assert_eq!(vector.get("ride_distance_max_7d"), Some(6.0));
        assert_eq!(vector.get("ride_duration_mean_7d"), Some(20.0));
        assert_eq!(vector.get("rides_count_90d"), Some(2.0));
        assert_eq!(vector.get("lifetime_rides"), Some(3.0));
        assert_eq!(vector.get("lifetime_distance"), Some(12.0));

        let slope = vector.get("brake_pad_wear_slope_7d").unwrap();
        assert!((slope - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_missing_window_uses_sentinel() {
        let vector = extractor()
            .extract(&history(), Component::Brakes, ts(100))
            .unwrap();

        // vibration is mapped to brakes but never recorded
        assert_eq!(vector.get("vibration_count_30d"), Some(0.0));
        assert_eq!(vector.get("vibration_mean_30d"), Some(MISSING_SENTINEL));
        assert_eq!(vector.get("vibration_present_30d"), Some(0.0));
    }

    #[test]
    fn test_single_sample_slope_is_sentinel_but_present() {
        let vector = extractor()
            .extract(&history(), Component::Brakes, ts(96))
            .unwrap();
        assert_eq!(vector.get("brake_pad_wear_count_7d"), Some(1.0));
        assert_eq!(vector.get("brake_pad_wear_slope_7d"), Some(MISSING_SENTINEL));
        assert_eq!(vector.get("brake_pad_wear_present_7d"), Some(1.0));
    }

    #[test]
    fn test_maintenance_features() {
        let extractor = extractor();
        let history = history();

        let before = extractor.extract(&history, Component::Brakes, ts(40)).unwrap();
        assert_eq!(before.get("maintenance_present"), Some(0.0));
        assert_eq!(before.get("days_since_maintenance"), Some(40.0));
        assert_eq!(before.get("distance_since_maintenance"), Some(2.0));

        let after = extractor.extract(&history, Component::Brakes, ts(100)).unwrap();
        assert_eq!(after.get("maintenance_present"), Some(1.0));
        assert_eq!(after.get("days_since_maintenance"), Some(50.0));
        assert_eq!(after.get("distance_since_maintenance"), Some(10.0));
        assert_eq!(after.get("prior_failures"), Some(1.0));
    }

    #[test]
    fn test_future_data_is_ignored() {
        let extractor = extractor();
        let mut rides = vec![ride(1, 10, 2.0)];
        let base = BikeHistory::from_parts(bike(), rides.clone(), BTreeMap::new(), BTreeMap::new());
        rides.push(ride(2, 30, 50.0));
        let extended = BikeHistory::from_parts(bike(), rides, BTreeMap::new(), BTreeMap::new());

        let a = extractor.extract(&base, Component::Chain, ts(20)).unwrap();
        let b = extractor.extract(&extended, Component::Chain, ts(20)).unwrap();
        assert!(a.same_values(&b));
    }

    #[test]
    fn test_ride_ending_after_as_of_is_ignored() {
        let extractor = extractor();
        let mut overnight = ride(2, 19, 40.0);
        overnight.ended_at = ts(21);
        let history = BikeHistory::from_parts(
            bike(),
            vec![ride(1, 10, 2.0), overnight],
            BTreeMap::new(),
            BTreeMap::new(),
        );

        let during = extractor.extract(&history, Component::Chain, ts(20)).unwrap();
        assert_eq!(during.get("lifetime_rides"), Some(1.0));
        assert_eq!(during.get("lifetime_distance"), Some(2.0));
        assert_eq!(during.get("rides_count_7d"), Some(0.0));

        let after = extractor.extract(&history, Component::Chain, ts(22)).unwrap();
        assert_eq!(after.get("lifetime_distance"), Some(42.0));
        assert_eq!(after.get("rides_count_7d"), Some(1.0));
    }

    #[test]
    fn test_window_start_saturates_near_time_origin() {
        let extractor = FeatureExtractor::new(FeatureConfig {
            windows_days: vec![crate::config::MAX_WINDOW_DAYS],
            ..FeatureConfig::default()
        })
        .unwrap();
        let as_of = DateTime::<Utc>::MIN_UTC + Duration::days(10);
        let empty = BikeHistory::from_parts(bike(), vec![], BTreeMap::new(), BTreeMap::new());

        let vector = extractor.extract(&empty, Component::Brakes, as_of).unwrap();
        assert!(vector.is_defaulted());
    }

    #[test]
    fn test_empty_history_defaults_and_checked_errors() {
        let extractor = extractor();
        let empty = BikeHistory::from_parts(bike(), vec![], BTreeMap::new(), BTreeMap::new());

        let vector = extractor.extract(&empty, Component::Tires, ts(5)).unwrap();
        assert!(vector.is_defaulted());
        assert_eq!(vector.get("rides_present_7d"), Some(0.0));
        assert_eq!(vector.get("tire_pressure_max_90d"), Some(MISSING_SENTINEL));

        let err = extractor
            .extract_checked(&empty, Component::Tires, ts(5))
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::InsufficientHistory { bike_id: 3, .. }));
    }

    #[test]
    fn test_channels_union() {
        let channels = extractor().channels();
        assert_eq!(channels.len(), SensorChannel::ALL.len());
    }
}
