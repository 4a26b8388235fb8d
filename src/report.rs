//! Point-in-time dashboard assembled from the pipelines and the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::AlertAggregator;
use crate::config::ACTIVE_WINDOW_MINUTES;
use crate::error::StoreError;
use crate::ingest::IngestionPipeline;
use crate::model::{Alert, AlertType, IngestStats, PositionRecord, VehicleStatus};
use crate::store::{LatestQuery, PositionStore};

/// How many of the newest alerts a dashboard shows.
pub const RECENT_ALERT_LIMIT: usize = 15;

/// How many of the busiest routes a dashboard shows.
pub const TOP_ROUTE_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteActivity {
    pub route_id: String,
    pub active_vehicles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub ingest: IngestStats,
    /// Records fetched per second of ingestion running time.
    pub ingestion_rate: f64,
    pub stored_records: u64,
    pub alert_counts: BTreeMap<AlertType, u64>,
    /// Newest first.
    pub recent_alerts: Vec<Alert>,
    /// Busiest routes first.
    pub active_by_route: Vec<RouteActivity>,
    /// Latest status of every active vehicle, with every status present.
    pub status_distribution: BTreeMap<VehicleStatus, usize>,
}

impl DashboardSnapshot {
    /// Reads everything a dashboard needs. Store queries are the only part
    /// that can fail.
    pub async fn collect(
        ingest: &IngestionPipeline,
        alerts: &AlertAggregator,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let active = store
            .latest_positions(&LatestQuery::all().active_within(now, ACTIVE_WINDOW_MINUTES))
            .await?;
        let stored_records = store.record_count().await?;

        Ok(Self::from_parts(
            now,
            ingest.statistics(),
            alerts,
            stored_records,
            &active,
        ))
    }

    /// `active` is the Latest-Position View limited to the active window.
    pub fn from_parts(
        now: DateTime<Utc>,
        ingest: IngestStats,
        alerts: &AlertAggregator,
        stored_records: u64,
        active: &[PositionRecord],
    ) -> Self {
        let mut per_route: BTreeMap<&str, usize> = BTreeMap::new();
        let mut status_distribution: BTreeMap<VehicleStatus, usize> =
            VehicleStatus::ALL.iter().map(|&s| (s, 0)).collect();

        for p in active {
            *per_route.entry(p.route_id.as_str()).or_default() += 1;
            *status_distribution.entry(p.status).or_default() += 1;
        }

        let mut active_by_route: Vec<RouteActivity> = per_route
            .into_iter()
            .map(|(route, count)| RouteActivity {
                route_id: route.to_string(),
                active_vehicles: count,
            })
            .collect();
        // Stable, so ties stay in route order.
        active_by_route.sort_by(|a, b| b.active_vehicles.cmp(&a.active_vehicles));
        active_by_route.truncate(TOP_ROUTE_LIMIT);

        Self {
            generated_at: now,
            ingestion_rate: ingest.ingestion_rate(),
            ingest,
            stored_records,
            alert_counts: alerts.alert_counts(),
            recent_alerts: alerts.recent_alerts_limited(RECENT_ALERT_LIMIT),
            active_by_route,
            status_distribution,
        }
    }

    pub fn active_vehicles(&self) -> usize {
        self.status_distribution.values().sum()
    }

    pub fn total_alerts(&self) -> u64 {
        self.alert_counts.values().sum()
    }
}
