//! Bikefleet CLI - Feature engineering, training and risk scoring for a bike fleet

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use bikefleet::config::{load_channel_map, parse_windows, Settings};
use bikefleet::data::{load_fleet_dir, RawEntityStore};
use bikefleet::features::FeatureEngineer;
use bikefleet::predictor::{PredictionService, RiskLevel};
use bikefleet::registry::{ModelArtifactStore, ModelRegistry, ModelState};
use bikefleet::training::{ReportStatus, TrainingPipeline};
use bikefleet::{BikeId, Component};

#[derive(Parser)]
#[command(name = "bikefleet")]
#[command(author, version, about = "Bike fleet predictive maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding bikes.csv, rides.csv, telemetry.csv and maintenance.csv
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of persisted component models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// JSON file mapping components to sensor channels
    #[arg(long)]
    channel_map: Option<PathBuf>,

    /// Feature windows in days, comma separated (e.g. 7,30,90)
    #[arg(long)]
    windows: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the feature vector of one bike
    Features {
        /// Bike id
        #[arg(short, long)]
        bike: BikeId,

        /// Component (brakes, chain, tires, battery, gears)
        #[arg(short, long, default_value = "brakes")]
        component: Component,

        /// As-of time (RFC 3339, default: now)
        #[arg(long)]
        as_of: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute current feature vectors for every bike
    Update,

    /// Build the labeled training dataset and show its diagnostics
    Dataset {
        /// Write the rows as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train one model per component and publish those that evaluate
    Train {
        /// Random seed for splits and subsampling
        #[arg(long)]
        seed: Option<u64>,

        /// Minimum labeled rows per component
        #[arg(long)]
        min_rows: Option<usize>,

        /// Abort a component's training after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Score failure risk with the persisted models
    Predict {
        /// Bike ids (default: every bike)
        #[arg(short, long)]
        bike: Vec<BikeId>,

        /// Components (default: every component)
        #[arg(short, long)]
        component: Vec<Component>,

        /// As-of time (RFC 3339, default: now)
        #[arg(long)]
        as_of: Option<String>,

        /// Only show rows at or above this risk level (low, medium, high)
        #[arg(long, default_value = "low")]
        min_level: String,
    },

    /// Show the state of every component model
    Status,
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn parse_as_of(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .with_context(|| format!("Invalid --as-of '{}', expected RFC 3339", s))
    })
    .transpose()
}

fn parse_level(raw: &str) -> Result<RiskLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        other => bail!("Unknown risk level '{}'", other),
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(msg.to_string());
    pb
}

/// Environment settings with command-line flags layered on top
fn settings_from(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::from_env().context("Invalid BIKEFLEET_* environment")?;

    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.model_dir {
        settings.model_dir = Some(dir.clone());
    }
    if let Some(path) = &cli.channel_map {
        settings.features.channel_map = load_channel_map(path)
            .with_context(|| format!("Failed to load channel map from {:?}", path))?;
    }
    if let Some(raw) = &cli.windows {
        settings.features.windows_days = parse_windows(raw).context("Invalid --windows")?;
    }
    settings.features.validate().context("Invalid feature configuration")?;

    Ok(settings)
}

fn open_engineer(settings: &Settings) -> Result<FeatureEngineer> {
    let pb = spinner("Loading fleet data...");
    let store = load_fleet_dir(&settings.data_dir)
        .with_context(|| format!("Failed to load fleet data from {:?}", settings.data_dir))?;
    pb.finish_and_clear();

    FeatureEngineer::new(Arc::new(store), settings.features.clone())
        .context("Failed to build feature engineer")
}

fn open_registry(model_dir: Option<&Path>) -> Result<Arc<ModelRegistry>> {
    let dir = model_dir.context("No model directory: pass --model-dir or set BIKEFLEET_MODEL_DIR")?;
    let registry = Arc::new(ModelRegistry::new());
    registry.load_published(&ModelArtifactStore::new(dir));
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    println!("{}", format!("Bikefleet CLI v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
    println!();

    let settings = settings_from(&cli)?;

    match &cli.command {
        Commands::Features {
            bike,
            component,
            as_of,
            json,
        } => show_features(&settings, *bike, *component, as_of.as_deref(), *json).await?,
        Commands::Update => run_update(&settings).await?,
        Commands::Dataset { output } => run_dataset(&settings, output.as_deref()).await?,
        Commands::Train {
            seed,
            min_rows,
            timeout_secs,
        } => {
            let mut settings = settings.clone();
            if let Some(seed) = seed {
                settings.training.seed = *seed;
            }
            if let Some(min_rows) = min_rows {
                settings.training.min_rows = *min_rows;
            }
            if let Some(secs) = timeout_secs {
                settings.training.component_timeout = Some(Duration::from_secs(*secs));
            }
            run_train(&settings).await?
        }
        Commands::Predict {
            bike,
            component,
            as_of,
            min_level,
        } => run_predict(&settings, bike, component, as_of.as_deref(), min_level).await?,
        Commands::Status => show_status(&settings)?,
    }

    Ok(())
}

async fn show_features(
    settings: &Settings,
    bike: BikeId,
    component: Component,
    as_of: Option<&str>,
    json: bool,
) -> Result<()> {
    let as_of = parse_as_of(as_of)?.unwrap_or_else(Utc::now);
    let engineer = open_engineer(settings)?;
    let vector = engineer
        .compute_features(bike, component, as_of)
        .await
        .with_context(|| format!("Failed to compute {} features for bike {}", component, bike))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&vector)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("Bike {} / {} as of {}", bike, component, vector.as_of)
            .yellow()
            .bold()
    );
    println!("Schema: {}", vector.schema_version().dimmed());
    if vector.is_defaulted() {
        println!("{}", "No history yet: every window is defaulted".yellow());
    }
    println!("{}", "-".repeat(50));
    for (name, value) in vector.iter() {
        println!("{:<36} {:>12.4}", name, value);
    }
    println!();
    Ok(())
}

async fn run_update(settings: &Settings) -> Result<()> {
    let engineer = open_engineer(settings)?;
    let bikes = engineer
        .store()
        .list_bikes()
        .await
        .context("Failed to list bikes")?;

    let pb = spinner(&format!("Updating features for {} bikes...", bikes.len()));
    let report = engineer
        .bulk_update_features(&bikes)
        .await
        .context("Bulk feature update failed")?;
    pb.finish_and_clear();

    println!("{}", "Feature update".yellow().bold());
    println!("{}", "-".repeat(40));
    println!("Updated vectors:   {}", report.updated_count.to_string().green());
    println!("Unchanged vectors: {}", report.unchanged_count);
    if report.failed.is_empty() {
        println!("Failed bikes:      0");
    } else {
        println!("Failed bikes:      {}", report.failed.len().to_string().red());
        for (bike, reason) in &report.failed {
            println!("  {:>6}  {}", bike, reason.dimmed());
        }
    }
    println!();
    Ok(())
}

async fn run_dataset(settings: &Settings, output: Option<&Path>) -> Result<()> {
    let engineer = open_engineer(settings)?;

    let pb = spinner("Building training dataset...");
    let dataset = engineer
        .get_training_dataset()
        .await
        .context("Failed to build training dataset")?;
    pb.finish_and_clear();

    let diag = &dataset.diagnostics;
    println!("{}", "Training dataset".yellow().bold());
    println!("{}", "-".repeat(40));
    println!("Bikes scanned:      {}", diag.bikes_scanned);
    println!("Labeled records:    {}", diag.labeled_records);
    println!("Dropped (no data):  {}", diag.dropped_no_history);
    if !diag.failed_bikes.is_empty() {
        println!("Failed bikes:       {}", diag.failed_bikes.len().to_string().red());
        for (bike, reason) in &diag.failed_bikes {
            println!("  {:>6}  {}", bike, reason.dimmed());
        }
    }
    println!();
    println!("{:<10} {:>8} {:>10}", "Component", "Rows", "Positives");
    for (component, rows) in &diag.rows_per_component {
        let positives = diag
            .positives_per_component
            .get(component)
            .copied()
            .unwrap_or(0);
        println!("{:<10} {:>8} {:>10}", component.to_string(), rows, positives);
    }
    println!();

    if let Some(path) = output {
        let json = serde_json::to_string(&dataset).context("Failed to serialize dataset")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        println!("Wrote {} rows to {:?}", dataset.len(), path);
    }
    Ok(())
}

async fn run_train(settings: &Settings) -> Result<()> {
    let engineer = open_engineer(settings)?;
    let dataset = engineer
        .get_training_dataset()
        .await
        .context("Failed to build training dataset")?;

    let registry = Arc::new(ModelRegistry::new());
    let mut pipeline = TrainingPipeline::new(Arc::clone(&registry), settings.training.clone());
    match &settings.model_dir {
        Some(dir) => {
            let artifacts = ModelArtifactStore::new(dir);
            registry.load_published(&artifacts);
            pipeline = pipeline.with_artifacts(artifacts);
        }
        None => warn!("No model directory configured; trained models will not be saved"),
    }

    let pb = spinner(&format!("Training on {} rows...", dataset.len()));
    let reports = pipeline
        .train_models(&dataset)
        .await
        .context("Training run failed")?;
    pb.finish_and_clear();

    println!("{}", "Training results".yellow().bold());
    println!(
        "{:<10} {:>6} {:>6} {:>8} {:>9} {:>7}  {}",
        "Component", "Rows", "Pos", "ROC-AUC", "Precision", "Recall", "Status"
    );
    println!("{}", "-".repeat(72));

    for report in reports.values() {
        let (auc, precision, recall) = match &report.metrics {
            Some(m) => (
                format!("{:.3}", m.roc_auc),
                format!("{:.3}", m.precision),
                format!("{:.3}", m.recall),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let status = match &report.status {
            ReportStatus::Published => report.status.to_string().green(),
            s if s.is_skip() => s.to_string().yellow(),
            s => s.to_string().red(),
        };
        println!(
            "{:<10} {:>6} {:>6} {:>8} {:>9} {:>7}  {}",
            report.component.to_string(),
            report.rows,
            report.positives,
            auc,
            precision,
            recall,
            status
        );
    }
    if reports.is_empty() {
        println!("{}", "No labeled maintenance records to train on.".yellow());
    }
    println!();
    Ok(())
}

async fn run_predict(
    settings: &Settings,
    bikes: &[BikeId],
    components: &[Component],
    as_of: Option<&str>,
    min_level: &str,
) -> Result<()> {
    let as_of = parse_as_of(as_of)?;
    let min_level = parse_level(min_level)?;
    let registry = open_registry(settings.model_dir.as_deref())?;
    let engineer = open_engineer(settings)?;

    let bikes: Vec<BikeId> = if bikes.is_empty() {
        engineer
            .store()
            .list_bikes()
            .await
            .context("Failed to list bikes")?
            .iter()
            .map(|b| b.id)
            .collect()
    } else {
        bikes.to_vec()
    };
    let components: Vec<Component> = if components.is_empty() {
        Component::ALL
            .iter()
            .copied()
            .filter(|&c| registry.snapshot(c).is_some())
            .collect()
    } else {
        components.to_vec()
    };
    if components.is_empty() {
        bail!("No published models found; run `bikefleet train` first");
    }

    let requests: Vec<(BikeId, Component)> = bikes
        .iter()
        .flat_map(|&b| components.iter().map(move |&c| (b, c)))
        .collect();

    let service = PredictionService::new(engineer, registry, settings.prediction.clone());
    let pb = spinner(&format!("Scoring {} bike/component pairs...", requests.len()));
    let results = service.predict_batch(&requests, as_of).await;
    pb.finish_and_clear();

    println!("{}", "Failure risk".yellow().bold());
    println!("{:>6} {:<10} {:>8} {:<8}", "Bike", "Component", "Risk", "Level");
    println!("{}", "-".repeat(40));

    let mut shown = 0;
    let mut failures = 0;
    for ((bike, component), result) in requests.iter().zip(&results) {
        match result {
            Ok(p) if p.risk_level >= min_level => {
                let level = match p.risk_level {
                    RiskLevel::High => p.risk_level.as_str().red().bold(),
                    RiskLevel::Medium => p.risk_level.as_str().yellow(),
                    RiskLevel::Low => p.risk_level.as_str().green(),
                };
                let marker = if p.defaulted_features { " *" } else { "" };
                println!(
                    "{:>6} {:<10} {:>7.1}% {:<8}{}",
                    bike,
                    component.to_string(),
                    p.risk_score * 100.0,
                    level,
                    marker
                );
                shown += 1;
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                println!(
                    "{:>6} {:<10} {}",
                    bike,
                    component.to_string(),
                    e.to_string().red()
                );
            }
        }
    }

    println!();
    info!("{} predictions shown, {} failed", shown, failures);
    if results.iter().any(|r| matches!(r, Ok(p) if p.defaulted_features)) {
        println!("{}", "* scored on defaulted features (no history)".dimmed());
    }
    Ok(())
}

fn show_status(settings: &Settings) -> Result<()> {
    let registry = open_registry(settings.model_dir.as_deref())?;

    println!("{}", "Model status".yellow().bold());
    println!(
        "{:<10} {:<10} {:<22} {:>8} {:>8}",
        "Component", "State", "Schema", "ROC-AUC", "Samples"
    );
    println!("{}", "-".repeat(64));

    for status in registry.status() {
        let state = match status.state {
            ModelState::Published => status.state.to_string().green(),
            ModelState::Failed => status.state.to_string().red(),
            _ => status.state.to_string().dimmed(),
        };
        match &status.published {
            Some(summary) => {
                println!(
                    "{:<10} {:<10} {:<22} {:>8.3} {:>8}",
                    status.component.to_string(),
                    state,
                    summary.schema_version,
                    summary.roc_auc,
                    summary.sample_count
                );
                let top: Vec<String> = summary
                    .top_features
                    .iter()
                    .map(|(name, share)| format!("{} {:.0}%", name, share * 100.0))
                    .collect();
                if !top.is_empty() {
                    println!("           {}", top.join(", ").dimmed());
                }
            }
            None => println!("{:<10} {:<10}", status.component.to_string(), state),
        }
        if let Some(err) = &status.last_error {
            println!("           {}", err.red());
        }
    }
    println!();
    Ok(())
}
