//! CLI entry point for the transit monitor.
//!
//! Provides subcommands for running the ingestion and monitoring pipelines
//! side by side, fetching the feed once, and running a single detection
//! pass against the stored positions.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_monitor::{
    alerts::AlertAggregator,
    config::{FeedConfig, MonitorConfig, Thresholds},
    feed::{GtfsRtFeed, PositionFeed},
    fetch::{BasicClient, HttpClient, auth::ApiKey, auth::UrlParam},
    ingest::IngestionPipeline,
    monitor::MonitoringPipeline,
    output::{StatsRecord, append_record, log_dashboard, print_json},
    report::DashboardSnapshot,
    store::{DuckDbStore, PositionStore},
};

#[derive(Parser)]
#[command(name = "transit_monitor")]
#[command(
    about = "Ingest GTFS-RT vehicle positions and detect service disruptions",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Whole-request HTTP timeout for feed fetches
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 20, global = true)]
    http_timeout_secs: u64,

    /// DuckDB database file holding the position history
    #[arg(long, env = "TRANSIT_DB_PATH", default_value = "transit.duckdb", global = true)]
    db_path: String,

    /// Seconds between feed fetches
    #[arg(long, env = "FETCH_INTERVAL_SECS", default_value_t = 30, global = true)]
    fetch_interval_secs: u64,

    /// Seconds between detection passes
    #[arg(long, env = "MONITOR_INTERVAL_SECS", default_value_t = 60, global = true)]
    monitor_interval_secs: u64,

    /// Records per store transaction
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100, global = true)]
    batch_size: usize,

    /// Minutes a vehicle may sit stopped before it is reported delayed
    #[arg(long, default_value_t = 5, global = true)]
    stopped_threshold_minutes: i64,

    /// Same-route vehicles closer than this many kilometres are bunched
    #[arg(long, default_value_t = 1.0, global = true)]
    bunching_distance_km: f64,

    /// Routes with fewer active vehicles are reported as under-served
    #[arg(long, default_value_t = 2, global = true)]
    min_vehicles_per_route: usize,

    /// Minutes without a report before a vehicle counts as offline
    #[arg(long, default_value_t = 15, global = true)]
    offline_threshold_minutes: i64,

    /// Number of recent alerts kept for the dashboard
    #[arg(long, default_value_t = 100, global = true)]
    alert_capacity: usize,

    /// Do not log each alert as it is raised
    #[arg(long, default_value_t = false, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ingestion and monitoring until Ctrl+C
    Run {
        /// Seconds between dashboard reports
        #[arg(long, default_value_t = 10)]
        report_interval_secs: u64,

        /// CSV file to append ingestion statistics to on every report
        #[arg(long)]
        stats_csv: Option<String>,

        /// Log each dashboard as pretty JSON as well
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch the feed once and log what it contains
    Fetch {
        /// Number of positions to log
        #[arg(short, long, default_value_t = 5)]
        sample: usize,
    },
    /// Run one detection pass against the stored positions
    Check,
}

impl Settings {
    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            fetch_interval: Duration::from_secs(self.fetch_interval_secs),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            batch_size: self.batch_size,
            thresholds: Thresholds {
                stopped_minutes: self.stopped_threshold_minutes,
                bunching_distance_km: self.bunching_distance_km,
                minimum_vehicles_per_route: self.min_vehicles_per_route,
                offline_minutes: self.offline_threshold_minutes,
            },
            alert_capacity: self.alert_capacity,
            quiet_mode: self.quiet,
            ..MonitorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_monitor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_monitor.log"));

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

    let cli = Cli::parse();
    let config = cli.settings.monitor_config();
    config.validate()?;

    match cli.command {
        Commands::Run {
            report_interval_secs,
            stats_csv,
            json,
        } => {
            let feed = build_feed(&cli.settings)?;
            let store = open_store(&cli.settings.db_path).await?;
            run(
                &config,
                feed,
                store,
                Duration::from_secs(report_interval_secs.max(1)),
                stats_csv.as_deref(),
                json,
            )
            .await?;
        }
        Commands::Fetch { sample } => {
            let feed = build_feed(&cli.settings)?;
            let positions = feed.fetch_positions().await?;

            info!(total = positions.len(), "Feed fetched");
            for p in positions.iter().take(sample) {
                info!(
                    vehicle = %p.vehicle_id,
                    route = %p.route_id,
                    lat = p.latitude,
                    lon = p.longitude,
                    status = %p.status,
                    observed_at = %p.observed_at,
                    "Position"
                );
            }
        }
        Commands::Check => {
            let store = open_store(&cli.settings.db_path).await?;
            let alerts = Arc::new(AlertAggregator::new(config.alert_capacity));
            alerts.set_quiet_mode(config.quiet_mode);

            let monitor = MonitoringPipeline::new(store, &config.thresholds, Arc::clone(&alerts));
            let raised = monitor.run_once(Utc::now()).await;

            for (alert_type, count) in alerts.alert_counts() {
                info!(alert_type = %alert_type, count, "Alert count");
            }
            info!(total = raised, "Detection pass finished");
        }
    }

    Ok(())
}

/// Starts both pipelines, reports on a fixed cadence and shuts everything
/// down on Ctrl+C.
#[tracing::instrument(skip_all)]
async fn run(
    config: &MonitorConfig,
    feed: Arc<dyn PositionFeed>,
    store: Arc<dyn PositionStore>,
    report_interval: Duration,
    stats_csv: Option<&str>,
    json: bool,
) -> Result<()> {
    let alerts = Arc::new(AlertAggregator::new(config.alert_capacity));
    alerts.set_quiet_mode(config.quiet_mode);

    let ingestion = IngestionPipeline::new(feed, Arc::clone(&store))
        .with_batch_size(config.batch_size)?
        .with_drain_timeout(config.ingest_drain_timeout);
    let monitoring =
        MonitoringPipeline::new(Arc::clone(&store), &config.thresholds, Arc::clone(&alerts))
            .with_initial_delay(config.monitor_initial_delay)
            .with_drain_timeout(config.monitor_drain_timeout);

    ingestion.start(config.fetch_interval);
    monitoring.start(config.monitor_interval);
    info!("Running. Press Ctrl+C to stop.");

    let mut reports = tokio::time::interval(report_interval);
    reports.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    reports.tick().await; // the first tick is immediate; nothing to report yet

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl+C; shutting down");
                }
                break;
            }
            _ = reports.tick() => {
                report(&ingestion, &alerts, store.as_ref(), stats_csv, json).await;
            }
        }
    }

    info!("Shutting down");
    // Stop both even if the first one fails to drain.
    let ingest_result = ingestion.stop().await;
    let monitor_result = monitoring.stop().await;

    report(&ingestion, &alerts, store.as_ref(), stats_csv, json).await;

    ingest_result?;
    monitor_result?;
    Ok(())
}

async fn report(
    ingestion: &IngestionPipeline,
    alerts: &AlertAggregator,
    store: &dyn PositionStore,
    stats_csv: Option<&str>,
    json: bool,
) {
    let snapshot = match DashboardSnapshot::collect(ingestion, alerts, store, Utc::now()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Could not build dashboard");
            return;
        }
    };

    log_dashboard(&snapshot);
    if json {
        if let Err(e) = print_json(&snapshot) {
            warn!(error = %e, "Could not serialize dashboard");
        }
    }
    if let Some(path) = stats_csv {
        if let Err(e) = append_record(path, &StatsRecord::from_snapshot(&snapshot)) {
            error!(path, error = %e, "Failed to append statistics");
        }
    }
}

/// Builds the feed reader from `GTFS_*` environment settings.
fn build_feed(settings: &Settings) -> Result<Arc<dyn PositionFeed>> {
    let feed_config = FeedConfig::from_env(Duration::from_secs(settings.http_timeout_secs))?;
    info!(url = %feed_config.redacted_url(), "Feed configured");

    let basic: Box<dyn HttpClient> = Box::new(BasicClient::with_timeout(feed_config.http_timeout)?);
    let client: Box<dyn HttpClient> = match (&feed_config.api_key, &feed_config.api_key_header) {
        (Some(key), Some(header)) => Box::new(ApiKey::new(basic, header, key)?),
        (Some(key), None) => Box::new(UrlParam::api_key(basic, key.as_str())),
        (None, _) => basic,
    };

    Ok(Arc::new(GtfsRtFeed::new(client, feed_config.feed_url())))
}

async fn open_store(path: &str) -> Result<Arc<dyn PositionStore>> {
    let store = DuckDbStore::open(path)?;
    store.init().await?;
    info!(path, "Position store opened");
    Ok(Arc::new(store))
}
