//! CSV loading for raw fleet exports
//!
//! Expects a directory with `bikes.csv`, `rides.csv`, `telemetry.csv` and
//! `maintenance.csv`. Timestamps are UNIX epoch seconds.

use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use super::memory::InMemoryStore;
use crate::error::{MaintenanceError, Result};
use crate::models::{
    Bike, Component, MaintenanceAction, MaintenanceRecord, Ride, RouteMeta, SensorChannel,
    TelemetrySample,
};

pub const BIKES_FILE: &str = "bikes.csv";
pub const RIDES_FILE: &str = "rides.csv";
pub const TELEMETRY_FILE: &str = "telemetry.csv";
pub const MAINTENANCE_FILE: &str = "maintenance.csv";

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

// Columns are cast explicitly so integer-looking float columns still load
fn i64_col(df: &DataFrame, name: &str) -> Result<Int64Chunked> {
    Ok(df.column(name)?.cast(&DataType::Int64)?.i64()?.clone())
}

fn f64_col(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    Ok(df.column(name)?.cast(&DataType::Float64)?.f64()?.clone())
}

fn str_col(df: &DataFrame, name: &str) -> Result<StringChunked> {
    Ok(df.column(name)?.cast(&DataType::String)?.str()?.clone())
}

fn opt_f64_col(df: &DataFrame, name: &str) -> Result<Option<Float64Chunked>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    f64_col(df, name).map(Some)
}

fn opt_str_col(df: &DataFrame, name: &str) -> Result<Option<StringChunked>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    str_col(df, name).map(Some)
}

fn epoch(secs: Option<i64>, file: &str, row: usize) -> Result<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| MaintenanceError::Csv(format!("{}: invalid timestamp at row {}", file, row)))
}

fn required<T>(value: Option<T>, file: &str, column: &str, row: usize) -> Result<T> {
    value.ok_or_else(|| MaintenanceError::Csv(format!("{}: missing {} at row {}", file, column, row)))
}

/// Integer cell narrowed to the target id type; negative or oversized values are rejected
fn narrow_id<T>(value: Option<i64>, file: &str, column: &str, row: usize) -> Result<T>
where
    T: TryFrom<i64>,
{
    let raw = required(value, file, column, row)?;
    T::try_from(raw).map_err(|_| {
        MaintenanceError::Csv(format!(
            "{}: {} {} out of range at row {}",
            file, column, raw, row
        ))
    })
}

fn finite(value: f64, file: &str, column: &str, row: usize) -> Result<f64> {
    if !value.is_finite() {
        return Err(MaintenanceError::Csv(format!(
            "{}: non-finite {} at row {}",
            file, column, row
        )));
    }
    Ok(value)
}

/// Load bikes: `bike_id, registered_at, current_mileage_km, total_rides`
pub fn load_bikes(path: &Path) -> Result<Vec<Bike>> {
    let df = read_csv(path)?;
    let id_col = i64_col(&df, "bike_id")?;
    let registered_col = i64_col(&df, "registered_at")?;
    let mileage_col = opt_f64_col(&df, "current_mileage_km")?;
    let rides_col = if df.column("total_rides").is_ok() {
        Some(i64_col(&df, "total_rides")?)
    } else {
        None
    };

    let mut bikes = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let total_rides: u32 = match rides_col.as_ref().and_then(|c| c.get(i)) {
            Some(n) => narrow_id(Some(n), BIKES_FILE, "total_rides", i)?,
            None => 0,
        };
        let mileage = mileage_col.as_ref().and_then(|c| c.get(i)).unwrap_or(0.0);

        bikes.push(Bike {
            id: narrow_id(id_col.get(i), BIKES_FILE, "bike_id", i)?,
            registered_at: epoch(registered_col.get(i), BIKES_FILE, i)?,
            current_mileage_km: finite(mileage, BIKES_FILE, "current_mileage_km", i)?,
            total_rides,
        });
    }
    Ok(bikes)
}

/// Load rides: `ride_id, bike_id, started_at, ended_at, distance_km` plus optional route columns
pub fn load_rides(path: &Path) -> Result<Vec<Ride>> {
    let df = read_csv(path)?;
    let id_col = i64_col(&df, "ride_id")?;
    let bike_col = i64_col(&df, "bike_id")?;
    let start_col = i64_col(&df, "started_at")?;
    let end_col = i64_col(&df, "ended_at")?;
    let distance_col = f64_col(&df, "distance_km")?;
    let start_station_col = opt_str_col(&df, "start_station")?;
    let end_station_col = opt_str_col(&df, "end_station")?;
    let elevation_col = opt_f64_col(&df, "elevation_gain_m")?;

    let mut rides = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        rides.push(Ride {
            id: narrow_id(id_col.get(i), RIDES_FILE, "ride_id", i)?,
            bike_id: narrow_id(bike_col.get(i), RIDES_FILE, "bike_id", i)?,
            started_at: epoch(start_col.get(i), RIDES_FILE, i)?,
            ended_at: epoch(end_col.get(i), RIDES_FILE, i)?,
            distance_km: finite(distance_col.get(i).unwrap_or(0.0), RIDES_FILE, "distance_km", i)?,
            route: RouteMeta {
                start_station: start_station_col
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .map(str::to_string),
                end_station: end_station_col
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .map(str::to_string),
                elevation_gain_m: elevation_col
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .filter(|m| m.is_finite()),
            },
        });
    }
    Ok(rides)
}

/// Load telemetry: `bike_id, recorded_at, channel, value`
///
/// Rows with an unknown channel or a missing or non-finite value are skipped
/// with a warning.
pub fn load_telemetry(path: &Path) -> Result<Vec<TelemetrySample>> {
    let df = read_csv(path)?;
    let bike_col = i64_col(&df, "bike_id")?;
    let recorded_col = i64_col(&df, "recorded_at")?;
    let channel_col = str_col(&df, "channel")?;
    let value_col = f64_col(&df, "value")?;

    let mut samples = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for i in 0..df.height() {
        let channel = match channel_col.get(i).map(str::parse::<SensorChannel>) {
            Some(Ok(channel)) => channel,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let Some(value) = value_col.get(i).filter(|v| v.is_finite()) else {
            skipped += 1;
            continue;
        };

        samples.push(TelemetrySample {
            bike_id: narrow_id(bike_col.get(i), TELEMETRY_FILE, "bike_id", i)?,
            recorded_at: epoch(recorded_col.get(i), TELEMETRY_FILE, i)?,
            channel,
            value,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} telemetry rows with unknown channel or unusable value", skipped);
    }
    Ok(samples)
}

/// Load maintenance: `record_id, bike_id, component, performed_at, action, failure, cause`
///
/// `failure` is 1/0 (or true/false); empty means the visit carries no label.
pub fn load_maintenance(path: &Path) -> Result<Vec<MaintenanceRecord>> {
    let df = read_csv(path)?;
    let id_col = i64_col(&df, "record_id")?;
    let bike_col = i64_col(&df, "bike_id")?;
    let component_col = str_col(&df, "component")?;
    let performed_col = i64_col(&df, "performed_at")?;
    let action_col = str_col(&df, "action")?;
    let failure_col = if df.column("failure").is_ok() {
        Some(i64_col(&df, "failure")?)
    } else {
        None
    };
    let cause_col = opt_str_col(&df, "cause")?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let component: Component = required(component_col.get(i), MAINTENANCE_FILE, "component", i)?
            .parse()
            .map_err(|e| MaintenanceError::Csv(format!("{}: row {}: {}", MAINTENANCE_FILE, i, e)))?;
        let action: MaintenanceAction = required(action_col.get(i), MAINTENANCE_FILE, "action", i)?
            .parse()
            .map_err(|e| MaintenanceError::Csv(format!("{}: row {}: {}", MAINTENANCE_FILE, i, e)))?;

        records.push(MaintenanceRecord {
            id: narrow_id(id_col.get(i), MAINTENANCE_FILE, "record_id", i)?,
            bike_id: narrow_id(bike_col.get(i), MAINTENANCE_FILE, "bike_id", i)?,
            component,
            performed_at: epoch(performed_col.get(i), MAINTENANCE_FILE, i)?,
            action,
            failure: failure_col.as_ref().and_then(|c| c.get(i)).map(|v| v != 0),
            cause: cause_col
                .as_ref()
                .and_then(|c| c.get(i))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        });
    }
    Ok(records)
}

/// Load a full fleet export directory into an in-memory store
pub fn load_fleet_dir<P: AsRef<Path>>(dir: P) -> Result<InMemoryStore> {
    let dir = dir.as_ref();
    let store = InMemoryStore::new();

    for bike in load_bikes(&dir.join(BIKES_FILE))? {
        store.add_bike(bike);
    }
    for ride in load_rides(&dir.join(RIDES_FILE))? {
        store.add_ride(ride);
    }

    let telemetry_path = dir.join(TELEMETRY_FILE);
    if telemetry_path.exists() {
        for sample in load_telemetry(&telemetry_path)? {
            store.add_telemetry(sample);
        }
    } else {
        warn!("No {} in {:?}; continuing without telemetry", TELEMETRY_FILE, dir);
    }

    let maintenance_path = dir.join(MAINTENANCE_FILE);
    if maintenance_path.exists() {
        for record in load_maintenance(&maintenance_path)? {
            store.add_maintenance(record);
        }
    } else {
        warn!("No {} in {:?}; continuing without maintenance", MAINTENANCE_FILE, dir);
    }

    let (rides, telemetry, maintenance) = store.record_counts();
    info!(
        "Loaded {} bikes, {} rides, {} telemetry samples, {} maintenance records from {:?}",
        store.bike_count(),
        rides,
        telemetry,
        maintenance,
        dir
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawEntityStore;
    use std::fs;

    fn write_fixture(dir: &Path) {
        fs::write(
            dir.join(BIKES_FILE),
            "bike_id,registered_at,current_mileage_km,total_rides\n1,1700000000,120.5,10\n2,1700000000,0,0\n",
        )
        .unwrap();
        fs::write(
            dir.join(RIDES_FILE),
            "ride_id,bike_id,started_at,ended_at,distance_km,start_station,end_station\n\
             10,1,1700086400,1700088200,5,central,harbor\n\
             11,1,1700172800,1700174600,7.5,harbor,\n",
        )
        .unwrap();
        fs::write(
            dir.join(TELEMETRY_FILE),
            "bike_id,recorded_at,channel,value\n\
             1,1700086400,vibration,0.3\n\
             1,1700086400,brake_pad_wear,0.1\n\
             1,1700086400,warp_drive,9\n",
        )
        .unwrap();
        fs::write(
            dir.join(MAINTENANCE_FILE),
            "record_id,bike_id,component,performed_at,action,failure,cause\n\
             100,1,brakes,1700200000,repair,1,worn pads\n\
             101,1,chain,1700200000,inspection,,\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_load_fleet_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let store = load_fleet_dir(dir.path()).unwrap();
        assert_eq!(store.bike_count(), 2);

        let rides = store.list_rides(1, None).await.unwrap();
        assert_eq!(rides.len(), 2);
        assert!((rides[0].distance_km - 5.0).abs() < 1e-9);
        assert_eq!(rides[0].route.start_station.as_deref(), Some("central"));

        let vibration = store
            .list_telemetry(1, SensorChannel::Vibration, None)
            .await
            .unwrap();
        assert_eq!(vibration.len(), 1);
        // unknown channel row is dropped
        assert_eq!(store.record_counts().1, 2);

        let brakes = store.list_maintenance(1, Component::Brakes, None).await.unwrap();
        assert_eq!(brakes[0].failure, Some(true));
        assert_eq!(brakes[0].cause.as_deref(), Some("worn pads"));

        let chain = store.list_maintenance(1, Component::Chain, None).await.unwrap();
        assert_eq!(chain[0].failure, None);
    }

    #[test]
    fn test_negative_bike_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BIKES_FILE);
        fs::write(&path, "bike_id,registered_at\n-1,1700000000\n").unwrap();

        match load_bikes(&path) {
            Err(MaintenanceError::Csv(msg)) => {
                assert!(msg.contains("bike_id"));
                assert!(msg.contains("row 0"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_ride_bike_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RIDES_FILE);
        fs::write(
            &path,
            "ride_id,bike_id,started_at,ended_at,distance_km\n\
             1,1,1700000000,1700000600,2.0\n\
             2,4294967296,1700000000,1700000600,2.0\n",
        )
        .unwrap();

        match load_rides(&path) {
            Err(MaintenanceError::Csv(msg)) => assert!(msg.contains("row 1")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unusable_telemetry_values_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TELEMETRY_FILE);
        fs::write(
            &path,
            "bike_id,recorded_at,channel,value\n\
             1,1700000000,vibration,0.5\n\
             1,1700000100,vibration,NaN\n\
             1,1700000200,vibration,inf\n\
             1,1700000300,vibration,\n",
        )
        .unwrap();

        let samples = load_telemetry(&path).unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite(2.5, RIDES_FILE, "distance_km", 3).unwrap(), 2.5);
        match finite(f64::INFINITY, RIDES_FILE, "distance_km", 3) {
            Err(MaintenanceError::Csv(msg)) => {
                assert!(msg.contains("distance_km"));
                assert!(msg.contains("row 3"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(finite(f64::NAN, BIKES_FILE, "current_mileage_km", 0).is_err());
    }

    #[test]
    fn test_missing_rides_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(BIKES_FILE),
            "bike_id,registered_at\n1,1700000000\n",
        )
        .unwrap();
        assert!(load_fleet_dir(dir.path()).is_err());
    }
}
