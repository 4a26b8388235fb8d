use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Detector;
use crate::config::ACTIVE_WINDOW_MINUTES;
use crate::error::StoreError;
use crate::model::{Alert, AlertType, PositionRecord};
use crate::store::{LatestQuery, PositionStore};

/// Vehicles silent for at least `offline_minutes` on a route that still has
/// at least one active vehicle. Vehicles on routes that went dark entirely
/// are not reported.
pub struct OfflineDetector {
    offline_minutes: i64,
}

impl OfflineDetector {
    pub fn new(offline_minutes: i64) -> Self {
        Self { offline_minutes }
    }

    /// `positions` is the unfiltered view. Alerts come out longest silence
    /// first.
    pub fn evaluate(&self, positions: &[PositionRecord], now: DateTime<Utc>) -> Vec<Alert> {
        let active = LatestQuery::all().active_within(now, ACTIVE_WINDOW_MINUTES);
        let active_routes: BTreeSet<&str> = positions
            .iter()
            .filter(|p| active.matches(p))
            .map(|p| p.route_id.as_str())
            .collect();

        let mut silent: Vec<(&PositionRecord, i64)> = positions
            .iter()
            .filter(|p| active_routes.contains(p.route_id.as_str()))
            .map(|p| (p, p.minutes_since(now)))
            .filter(|&(_, minutes)| minutes >= self.offline_minutes)
            .collect();
        silent.sort_by(|a, b| b.1.cmp(&a.1));

        silent
            .into_iter()
            .map(|(p, minutes)| Alert {
                alert_type: AlertType::OfflineVehicle,
                message: format!(
                    "Vehicle {} on route {} has not reported for {} minutes",
                    p.vehicle_id, p.route_id, minutes
                ),
                route_id: Some(p.route_id.clone()),
                vehicle_id: Some(p.vehicle_id.clone()),
                latitude: p.latitude,
                longitude: p.longitude,
                severity: minutes,
                created_at: now,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for OfflineDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::OfflineVehicle
    }

    async fn detect(
        &self,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let latest = store.latest_positions(&LatestQuery::all()).await?;
        Ok(self.evaluate(&latest, now))
    }
}
