//! CLI entry point for the GBFS availability pipeline.
//!
//! Each subcommand is one invocation of an external trigger: `collect` runs a
//! single polling cycle, `train` refits the model from the database, and
//! `predict` scores stations with the last saved model.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use gbfs_availability::{
    collector::{closed_gate, collect},
    config::Config,
    fetch::BasicClient,
    hours::SystemClock,
    infra::{gbfs::GbfsClient, memory::MemoryStore, postgres::PgStore},
    ml::{
        artifact::ModelArtifact,
        predictor::{PredictMode, ReportQuery, SingleStationQuery, build_report, predict_single},
        trainer::{TrainingParams, train},
    },
    output::{log_collection, print_prediction, print_report},
    records::Origin,
    services::{feed_api::FeedSource, snapshot_store::SnapshotStore},
};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gbfs_availability")]
#[command(about = "Collect GBFS station snapshots and predict bike availability", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed once and store a snapshot of every station
    Collect {
        /// Which trigger is running this cycle
        #[arg(short, long, value_enum, env = "COLLECT_ORIGIN", default_value_t = Origin::Manual)]
        origin: Origin,

        /// Write to an in-memory store instead of the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Retrain the classifier on all stored snapshots
    Train {
        /// Where to write the model artifact (defaults to MODEL_PATH)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Predict the probability of finding at least one bike
    Predict(PredictArgs),
    /// Run database migrations
    Migrate,
    /// Delete snapshots older than the given number of days
    Prune {
        #[arg(short, long)]
        days: u32,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("mode").required(true).args(["station", "report"])))]
struct PredictArgs {
    /// Station id to score
    #[arg(short, long, requires_all = ["hour", "dow"])]
    station: Option<String>,

    /// Hour of day, 0-23, in the feed's local time
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=23))]
    hour: Option<u32>,

    /// Day of week, 0 = Monday ... 6 = Sunday
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=6))]
    dow: Option<u32>,

    /// Score every station in the live feed for the current hour
    #[arg(short, long, default_value_t = false)]
    report: bool,

    /// With --report, show only the first N stations
    #[arg(long, requires = "report")]
    top: Option<usize>,

    /// Model artifact to load (defaults to MODEL_PATH)
    #[arg(short, long)]
    model: Option<PathBuf>,
}

impl TryFrom<&PredictArgs> for PredictMode {
    type Error = anyhow::Error;

    fn try_from(args: &PredictArgs) -> Result<Self> {
        if args.report {
            return Ok(PredictMode::Report(ReportQuery { top: args.top }));
        }
        match (&args.station, args.hour, args.dow) {
            (Some(station), Some(hour), Some(dow)) => {
                Ok(PredictMode::Single(SingleStationQuery::new(station.clone(), hour, dow)?))
            }
            _ => Err(anyhow::anyhow!(
                "pass --station <id> --hour <0-23> --dow <0-6>, or --report"
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gbfs_availability.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gbfs_availability.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let config = Config::load()?;

    match cli.command {
        Commands::Collect { origin, dry_run } => {
            // Gate before any feed client or pool exists.
            if let Some(skipped) = closed_gate(&SystemClock, &config.hours, origin) {
                log_collection(&skipped)?;
                return Ok(());
            }
            let feed = feed_client(&config)?;
            let result = if dry_run {
                let store = MemoryStore::new();
                collect(&feed, &store, &SystemClock, &config.hours, origin).await?
            } else {
                let store = connect(&config).await?;
                let result = collect(&feed, &store, &SystemClock, &config.hours, origin).await;
                store.close().await;
                result?
            };
            log_collection(&result)?;
        }
        Commands::Train { output } => {
            let output = output.unwrap_or_else(|| config.model_path.clone());
            run_train(&config, &output).await?;
        }
        Commands::Predict(args) => {
            let mode = PredictMode::try_from(&args)?;
            let model_path = args.model.unwrap_or_else(|| config.model_path.clone());
            run_predict(&config, &model_path, mode).await?;
        }
        Commands::Migrate => {
            let store = connect(&config).await?;
            store.run_migrations().await?;
            store.close().await;
        }
        Commands::Prune { days } => {
            let store = connect(&config).await?;
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let removed = store.prune_before(cutoff).await?;
            info!(removed, cutoff = %cutoff.to_rfc3339(), "Old snapshots pruned");
            store.close().await;
        }
    }

    Ok(())
}

fn feed_client(config: &Config) -> Result<GbfsClient<BasicClient>> {
    let http = BasicClient::new(config.http_timeout).context("Failed to build HTTP client")?;
    Ok(GbfsClient::new(http, config.gbfs_base_url.clone()))
}

async fn connect(config: &Config) -> Result<PgStore> {
    PgStore::connect(
        config.require_database_url()?,
        config.db_acquire_timeout,
        config.db_query_timeout,
    )
    .await
}

/// Loads history, fits, and saves. The artifact is only written after a
/// successful fit, so a failed run leaves the previous model in place.
#[tracing::instrument(skip_all, fields(output = %output.display()))]
async fn run_train(config: &Config, output: &Path) -> Result<()> {
    let store = connect(config).await?;
    let rows = store.training_rows().await;
    store.close().await;
    let rows = rows?;
    info!(rows = rows.len(), "Training rows loaded");

    let artifact = train(&rows, &config.hours, &TrainingParams::default())?;
    artifact.save(output)?;

    let report = &artifact.report;
    info!(
        samples = report.rows_eligible,
        stations = report.stations,
        positive_rate = report.positive_rate,
        auc = ?report.auc,
        trained_at = %artifact.trained_at.to_rfc3339(),
        "Model trained"
    );
    Ok(())
}

#[tracing::instrument(skip_all, fields(model = %model_path.display()))]
async fn run_predict(config: &Config, model_path: &Path, mode: PredictMode) -> Result<()> {
    let artifact = ModelArtifact::load(model_path)?;
    info!(
        trained_at = %artifact.trained_at.to_rfc3339(),
        stations = artifact.encoder.stations().len(),
        "Model loaded"
    );

    match mode {
        PredictMode::Single(query) => {
            let capacity = lookup_capacity(config, &query.station_id).await;
            if !artifact.encoder.is_known(&query.station_id) {
                warn!(station_id = %query.station_id, "Station unknown to the model, using the unknown-station encoding");
            }
            let prediction = predict_single(&artifact, &query, capacity);
            print_prediction(&prediction);
        }
        PredictMode::Report(query) => {
            let feed = feed_client(config)?;
            let status = feed
                .station_status()
                .await
                .context("Feed unreachable, cannot build the live report")?;
            let capacities: HashMap<String, i32> = match feed.station_information().await {
                Ok(info) => info
                    .data
                    .stations
                    .iter()
                    .filter_map(|s| s.capacity.map(|c| (s.station_id.clone(), c)))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "station_information unavailable, falling back to stored capacities");
                    stored_capacities(config).await
                }
            };
            let report = build_report(&artifact, &status, &capacities, Utc::now());
            print_report(&report, query.top);
        }
    }

    Ok(())
}

/// Connects only when a database is configured. Prediction never requires one.
async fn optional_store(config: &Config) -> Option<PgStore> {
    let url = config.database_url.as_deref()?;
    match PgStore::connect(url, config.db_acquire_timeout, config.db_query_timeout).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "Database unavailable, using the default capacity");
            None
        }
    }
}

/// Capacity from the database when one is configured. Any failure degrades to
/// the model's default capacity.
async fn lookup_capacity(config: &Config, station_id: &str) -> Option<i32> {
    let store = optional_store(config).await?;
    let capacity = store.station_capacity(station_id).await;
    store.close().await;
    capacity.unwrap_or_else(|e| {
        warn!(error = %e, "Capacity lookup failed, using the default capacity");
        None
    })
}

async fn stored_capacities(config: &Config) -> HashMap<String, i32> {
    let Some(store) = optional_store(config).await else {
        return HashMap::new();
    };
    let capacities = store.station_capacities().await;
    store.close().await;
    capacities.unwrap_or_else(|e| {
        warn!(error = %e, "Capacity lookup failed, using the default capacity");
        HashMap::new()
    })
}
