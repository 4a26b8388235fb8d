//! Output formatting and persistence for dashboards and statistics.
//!
//! Supports logging a dashboard, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::report::DashboardSnapshot;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// One row of the ingestion statistics CSV.
#[derive(Debug, Clone, Serialize)]
pub struct StatsRecord {
    pub timestamp: DateTime<Utc>,
    pub total_fetched: u64,
    pub total_stored: u64,
    pub last_fetch_count: u64,
    pub last_fetch_time_ms: u64,
    pub running_time: String,
    pub ingestion_rate: f64,
    pub stored_records: u64,
    pub active_vehicles: usize,
    pub total_alerts: u64,
}

impl StatsRecord {
    pub fn from_snapshot(snapshot: &DashboardSnapshot) -> Self {
        Self {
            timestamp: snapshot.generated_at,
            total_fetched: snapshot.ingest.total_fetched,
            total_stored: snapshot.ingest.total_stored,
            last_fetch_count: snapshot.ingest.last_fetch_count,
            last_fetch_time_ms: snapshot.ingest.last_fetch_time_ms,
            running_time: format_duration(snapshot.ingest.running_time_ms),
            ingestion_rate: snapshot.ingestion_rate,
            stored_records: snapshot.stored_records,
            active_vehicles: snapshot.active_vehicles(),
            total_alerts: snapshot.total_alerts(),
        }
    }
}

/// Formats milliseconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Logs a dashboard as a block of `info` lines.
pub fn log_dashboard(snapshot: &DashboardSnapshot) {
    let ingest = &snapshot.ingest;
    info!(
        running = ingest.is_running,
        uptime = %format_duration(ingest.running_time_ms),
        total_fetched = ingest.total_fetched,
        total_stored = ingest.total_stored,
        last_fetch_count = ingest.last_fetch_count,
        last_fetch_time_ms = ingest.last_fetch_time_ms,
        rate = %format!("{:.2}/s", snapshot.ingestion_rate),
        stored_records = snapshot.stored_records,
        "Ingestion"
    );

    for (alert_type, count) in &snapshot.alert_counts {
        info!(alert_type = %alert_type, count, "Alert count");
    }

    info!(
        active_vehicles = snapshot.active_vehicles(),
        routes = snapshot.active_by_route.len(),
        "Active fleet"
    );
    for route in &snapshot.active_by_route {
        info!(route = %route.route_id, vehicles = route.active_vehicles, "Route activity");
    }
    for (status, count) in &snapshot.status_distribution {
        info!(status = %status, count, "Status distribution");
    }

    for alert in &snapshot.recent_alerts {
        info!(
            alert_type = %alert.alert_type,
            severity = alert.severity,
            at = %alert.created_at.format("%H:%M:%S"),
            "{}",
            alert.message
        );
    }
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &str, record: &T) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
