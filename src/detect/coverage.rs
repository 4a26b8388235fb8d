use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Detector;
use crate::config::ACTIVE_WINDOW_MINUTES;
use crate::error::StoreError;
use crate::model::{Alert, AlertType, PositionRecord};
use crate::store::{LatestQuery, PositionStore};

/// Routes with fewer than `minimum_vehicles` active vehicles.
///
/// A route is only seen through its active vehicles, so a route with none
/// produces no alert.
pub struct CoverageDetector {
    minimum_vehicles: usize,
}

impl CoverageDetector {
    pub fn new(minimum_vehicles: usize) -> Self {
        Self { minimum_vehicles }
    }

    /// Alerts come out lowest count first, then by route id.
    pub fn evaluate(&self, positions: &[PositionRecord], now: DateTime<Utc>) -> Vec<Alert> {
        let active = LatestQuery::all().active_within(now, ACTIVE_WINDOW_MINUTES);

        let mut by_route: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for p in positions.iter().filter(|p| active.matches(p)) {
            by_route
                .entry(p.route_id.as_str())
                .or_default()
                .insert(p.vehicle_id.as_str());
        }

        let mut thin: Vec<(&str, usize)> = by_route
            .into_iter()
            .map(|(route, vehicles)| (route, vehicles.len()))
            .filter(|&(_, count)| count < self.minimum_vehicles)
            .collect();
        thin.sort_by_key(|&(_, count)| count);

        thin.into_iter()
            .map(|(route, count)| Alert {
                alert_type: AlertType::LowRouteCoverage,
                message: format!(
                    "Route {} has only {} vehicle(s) in service (minimum {} required)",
                    route, count, self.minimum_vehicles
                ),
                route_id: Some(route.to_string()),
                vehicle_id: None,
                latitude: 0.0,
                longitude: 0.0,
                severity: (self.minimum_vehicles - count) as i64,
                created_at: now,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for CoverageDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::LowRouteCoverage
    }

    async fn detect(
        &self,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let active = store
            .latest_positions(&LatestQuery::all().active_within(now, ACTIVE_WINDOW_MINUTES))
            .await?;
        Ok(self.evaluate(&active, now))
    }
}
