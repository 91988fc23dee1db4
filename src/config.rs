//! Pipeline configuration
//!
//! Every section has working defaults. `Settings::from_env` layers environment
//! overrides on top; the CLI layers its flags on top of that.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{validate_fraction, MaintenanceError, Result};
use crate::models::{Component, SensorChannel};

/// Sensor channels aggregated for each component
pub type ChannelMap = BTreeMap<Component, Vec<SensorChannel>>;

const DEFAULT_WINDOWS_DAYS: [u32; 3] = [7, 30, 90];
/// Longest accepted feature window, one hundred years
pub const MAX_WINDOW_DAYS: u32 = 36_500;
/// Longest accepted label gap, one day
pub const MAX_LABEL_GAP_SECS: i64 = 86_400;
const DEFAULT_DATA_DIR: &str = "data/fleet";

/// Reference sensor mapping used when no channel map file is supplied
pub fn default_channel_map() -> ChannelMap {
    use SensorChannel::*;

    let mut map = ChannelMap::new();
    map.insert(Component::Brakes, vec![BrakePadWear, Vibration]);
    map.insert(Component::Chain, vec![ChainTension, Vibration]);
    map.insert(Component::Tires, vec![TirePressure, Vibration]);
    map.insert(Component::Battery, vec![BatteryVoltage, MotorTemperature]);
    map.insert(Component::Gears, vec![ChainTension, Vibration]);
    map
}

/// Load a channel map from a JSON object of `component -> [channel, ...]`
pub fn load_channel_map<P: AsRef<Path>>(path: P) -> Result<ChannelMap> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let map: ChannelMap = serde_json::from_str(&content)?;
    Ok(map)
}

/// Feature construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Window lengths in days, each ending at the vector's as-of time
    pub windows_days: Vec<u32>,
    pub channel_map: ChannelMap,
    /// Distance between a label's timestamp and the as-of of the vector joined to it
    pub label_gap_secs: i64,
    /// Upper bound on bikes processed at once during bulk updates
    pub max_concurrency: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            windows_days: DEFAULT_WINDOWS_DAYS.to_vec(),
            channel_map: default_channel_map(),
            label_gap_secs: 1,
            max_concurrency: 8,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.windows_days.is_empty() {
            return Err(MaintenanceError::InvalidConfig(
                "at least one feature window is required".to_string(),
            ));
        }
        if self.windows_days.contains(&0) {
            return Err(MaintenanceError::InvalidConfig(
                "feature windows must be at least one day".to_string(),
            ));
        }
        if self.max_window_days() > MAX_WINDOW_DAYS {
            return Err(MaintenanceError::InvalidConfig(format!(
                "feature windows must be at most {} days, got {}",
                MAX_WINDOW_DAYS,
                self.max_window_days()
            )));
        }
        let mut sorted = self.windows_days.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.windows_days.len() {
            return Err(MaintenanceError::InvalidConfig(
                "feature windows must be unique".to_string(),
            ));
        }
        if self.label_gap_secs <= 0 || self.label_gap_secs > MAX_LABEL_GAP_SECS {
            return Err(MaintenanceError::InvalidConfig(format!(
                "label gap must be in 1..={} seconds, got {}",
                MAX_LABEL_GAP_SECS, self.label_gap_secs
            )));
        }
        if self.max_concurrency == 0 {
            return Err(MaintenanceError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn channels_for(&self, component: Component) -> &[SensorChannel] {
        self.channel_map
            .get(&component)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn max_window_days(&self) -> u32 {
        self.windows_days.iter().copied().max().unwrap_or(0)
    }
}

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub min_child_weight: f64,
    /// Fraction of training rows sampled per tree
    pub subsample: f64,
    /// L2 regularisation on leaf values
    pub lambda: f64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 2,
            min_child_weight: 1e-3,
            subsample: 0.8,
            lambda: 1.0,
        }
    }
}

/// Training run settings
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Components with fewer labeled rows are skipped
    pub min_rows: usize,
    pub eval_fraction: f64,
    pub seed: u64,
    pub decision_threshold: f64,
    pub gbm: GbmParams,
    /// Abort a single component's fit after this long
    pub component_timeout: Option<Duration>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: 20,
            eval_fraction: 0.25,
            seed: 42,
            decision_threshold: 0.5,
            gbm: GbmParams::default(),
            component_timeout: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        validate_fraction("eval_fraction", self.eval_fraction)?;
        validate_fraction("decision_threshold", self.decision_threshold)?;
        if self.gbm.subsample <= 0.0 || self.gbm.subsample > 1.0 {
            return Err(MaintenanceError::InvalidConfig(format!(
                "subsample must be in (0, 1], got {}",
                self.gbm.subsample
            )));
        }
        if self.gbm.n_trees == 0 || self.gbm.learning_rate <= 0.0 {
            return Err(MaintenanceError::InvalidConfig(
                "n_trees and learning_rate must be positive".to_string(),
            ));
        }
        if self.min_rows < 2 {
            return Err(MaintenanceError::InvalidConfig(
                "min_rows must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Risk banding for scored predictions
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub medium_risk_threshold: f64,
    pub high_risk_threshold: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            medium_risk_threshold: 0.3,
            high_risk_threshold: 0.7,
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub model_dir: Option<PathBuf>,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub prediction: PredictionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            model_dir: None,
            features: FeatureConfig::default(),
            training: TrainingConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

impl Settings {
    /// Read overrides from `BIKEFLEET_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(dir) = lookup("BIKEFLEET_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("BIKEFLEET_MODEL_DIR") {
            settings.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("BIKEFLEET_WINDOWS") {
            settings.features.windows_days = parse_windows(&raw)?;
        }
        if let Some(raw) = lookup("BIKEFLEET_MAX_CONCURRENCY") {
            settings.features.max_concurrency = parse_var("BIKEFLEET_MAX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("BIKEFLEET_SEED") {
            settings.training.seed = parse_var("BIKEFLEET_SEED", &raw)?;
        }
        if let Some(raw) = lookup("BIKEFLEET_MIN_ROWS") {
            settings.training.min_rows = parse_var("BIKEFLEET_MIN_ROWS", &raw)?;
        }
        if let Some(raw) = lookup("BIKEFLEET_TRAIN_TIMEOUT_SECS") {
            let secs: u64 = parse_var("BIKEFLEET_TRAIN_TIMEOUT_SECS", &raw)?;
            settings.training.component_timeout = Some(Duration::from_secs(secs));
        }

        settings.features.validate()?;
        settings.training.validate()?;
        Ok(settings)
    }
}

/// Parse a comma separated window list such as "7,30,90"
pub fn parse_windows(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_var("feature window", s.trim()))
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| MaintenanceError::InvalidConfig(format!("{}: cannot parse '{}'", name, raw)))
}
