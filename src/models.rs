//! Domain entities shared by the feature, training and prediction layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fleet-wide bike identifier
pub type BikeId = u32;

/// Maintainable bike part tracked as an independent prediction target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Brakes,
    Chain,
    Tires,
    Battery,
    Gears,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Brakes,
        Component::Chain,
        Component::Tires,
        Component::Battery,
        Component::Gears,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Brakes => "brakes",
            Component::Chain => "chain",
            Component::Tires => "tires",
            Component::Battery => "battery",
            Component::Gears => "gears",
        }
    }

    /// Per-component salt mixed into the training seed so components shuffle independently
    pub fn seed_salt(&self) -> u64 {
        match self {
            Component::Brakes => 0x9E37_79B9_7F4A_7C15,
            Component::Chain => 0xBF58_476D_1CE4_E5B9,
            Component::Tires => 0x94D0_49BB_1331_11EB,
            Component::Battery => 0xD6E8_FEB8_6659_FD93,
            Component::Gears => 0xA076_1D64_78BD_642F,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown component '{}'", s))
    }
}

/// Telemetry sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    Vibration,
    BrakePadWear,
    BatteryVoltage,
    TirePressure,
    ChainTension,
    MotorTemperature,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 6] = [
        SensorChannel::Vibration,
        SensorChannel::BrakePadWear,
        SensorChannel::BatteryVoltage,
        SensorChannel::TirePressure,
        SensorChannel::ChainTension,
        SensorChannel::MotorTemperature,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorChannel::Vibration => "vibration",
            SensorChannel::BrakePadWear => "brake_pad_wear",
            SensorChannel::BatteryVoltage => "battery_voltage",
            SensorChannel::TirePressure => "tire_pressure",
            SensorChannel::ChainTension => "chain_tension",
            SensorChannel::MotorTemperature => "motor_temperature",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorChannel::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown sensor channel '{}'", s))
    }
}

/// What a mechanic did during a maintenance visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceAction {
    Inspection,
    Adjustment,
    Repair,
    Replacement,
}

impl FromStr for MaintenanceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inspection" => Ok(MaintenanceAction::Inspection),
            "adjustment" => Ok(MaintenanceAction::Adjustment),
            "repair" => Ok(MaintenanceAction::Repair),
            "replacement" => Ok(MaintenanceAction::Replacement),
            other => Err(format!("unknown maintenance action '{}'", other)),
        }
    }
}

/// Bike in the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bike {
    pub id: BikeId,
    pub registered_at: DateTime<Utc>,
    // Informational counters; features are derived from rides, never from these
    pub current_mileage_km: f64,
    pub total_rides: u32,
}

/// Optional route metadata attached to a ride
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_station: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_station: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_gain_m: Option<f64>,
}

/// Completed ride
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: u64,
    pub bike_id: BikeId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub distance_km: f64,
    #[serde(default)]
    pub route: RouteMeta,
}

impl Ride {
    pub fn duration_minutes(&self) -> f64 {
        (self.ended_at - self.started_at).num_seconds().max(0) as f64 / 60.0
    }
}

/// Single sensor reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub bike_id: BikeId,
    pub recorded_at: DateTime<Utc>,
    pub channel: SensorChannel,
    pub value: f64,
}

/// Maintenance visit on one component; `failure` set makes it a training label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub id: u64,
    pub bike_id: BikeId,
    pub component: Component,
    pub performed_at: DateTime<Utc>,
    pub action: MaintenanceAction,
    #[serde(default)]
    pub failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl MaintenanceRecord {
    pub fn is_labeled(&self) -> bool {
        self.failure.is_some()
    }
}
