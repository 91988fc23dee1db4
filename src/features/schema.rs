//! Feature schema
//!
//! The ordered list of feature names for one component, plus a version string
//! derived from those names. A model records the version it was trained under;
//! scoring a vector produced under any other version is refused.

use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::error::{MaintenanceError, Result};
use crate::models::Component;

use super::vector::FeatureVector;

/// Bumped whenever feature semantics change without changing names
pub const SCHEMA_REVISION: u32 = 1;

/// Value stored for an aggregate whose window holds no data
pub const MISSING_SENTINEL: f64 = -1.0;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable 64-bit FNV-1a; std hashers are not guaranteed stable across releases
fn fnv1a64(bytes: impl IntoIterator<Item = u8>) -> u64 {
    bytes.into_iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

fn schema_version(component: Component, names: &[String]) -> String {
    let bytes = component
        .as_str()
        .bytes()
        .chain(names.iter().flat_map(|name| {
            std::iter::once(b'\n').chain(name.bytes())
        }));
    format!("r{}-{:016x}", SCHEMA_REVISION, fnv1a64(bytes))
}

/// Ride aggregates computed per window
pub const RIDE_WINDOW_FEATURES: [&str; 7] = [
    "rides_count",
    "ride_distance_sum",
    "ride_distance_mean",
    "ride_distance_max",
    "ride_duration_mean",
    "ride_distance_slope",
    "rides_present",
];

/// Telemetry aggregates computed per window and channel
pub const CHANNEL_WINDOW_FEATURES: [&str; 6] = ["count", "sum", "mean", "max", "slope", "present"];

/// Features that do not depend on a window
pub const LIFETIME_FEATURES: [&str; 3] = ["bike_age_days", "lifetime_distance", "lifetime_rides"];

pub const MAINTENANCE_FEATURES: [&str; 4] = [
    "days_since_maintenance",
    "distance_since_maintenance",
    "maintenance_present",
    "prior_failures",
];

/// Window lengths in canonical (ascending) order
pub fn canonical_windows(config: &FeatureConfig) -> Vec<u32> {
    let mut windows = config.windows_days.clone();
    windows.sort_unstable();
    windows.dedup();
    windows
}

/// Ordered feature names for a component
///
/// Order: lifetime (3) + maintenance (4) + per window [ride (7) + per channel (6)].
pub fn feature_names(config: &FeatureConfig, component: Component) -> Vec<String> {
    let channels = config.channels_for(component);
    let mut names: Vec<String> = LIFETIME_FEATURES
        .iter()
        .chain(MAINTENANCE_FEATURES.iter())
        .map(|s| s.to_string())
        .collect();

    for window in canonical_windows(config) {
        for base in RIDE_WINDOW_FEATURES {
            names.push(format!("{}_{}d", base, window));
        }
        for channel in channels {
            for agg in CHANNEL_WINDOW_FEATURES {
                names.push(format!("{}_{}_{}d", channel.as_str(), agg, window));
            }
        }
    }

    names
}

/// Versioned, ordered feature layout for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub component: Component,
    pub version: String,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn build(config: &FeatureConfig, component: Component) -> Self {
        Self::from_names(component, feature_names(config, component))
    }

    pub fn from_names(component: Component, names: Vec<String>) -> Self {
        let version = schema_version(component, &names);
        Self {
            component,
            version,
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// True when the recorded version matches the names (detects edited artifacts)
    pub fn is_consistent(&self) -> bool {
        self.version == schema_version(self.component, &self.names)
    }

    /// Refuse any vector not produced under exactly this schema
    pub fn validate(&self, vector: &FeatureVector) -> Result<()> {
        let found = vector.schema_version();
        if vector.component != self.component || found != self.version {
            return Err(MaintenanceError::FeatureSchemaMismatch {
                component: self.component,
                expected: self.version.clone(),
                found: format!("{} ({})", found, vector.component),
            });
        }
        if vector.values.len() != self.names.len() {
            return Err(MaintenanceError::FeatureSchemaMismatch {
                component: self.component,
                expected: format!("{} features", self.names.len()),
                found: format!("{} features", vector.values.len()),
            });
        }
        Ok(())
    }
}
