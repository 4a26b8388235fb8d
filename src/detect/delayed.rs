use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Detector;
use crate::error::StoreError;
use crate::model::{Alert, AlertType, PositionRecord, VehicleStatus};
use crate::store::{LatestQuery, PositionStore};

/// Vehicles whose latest report is `STOPPED_AT` and at least
/// `stopped_minutes` old.
pub struct DelayedDetector {
    stopped_minutes: i64,
}

impl DelayedDetector {
    pub fn new(stopped_minutes: i64) -> Self {
        Self { stopped_minutes }
    }

    /// `positions` is the view filtered to `STOPPED_AT`, ordered by vehicle.
    pub fn evaluate(&self, positions: &[PositionRecord], now: DateTime<Utc>) -> Vec<Alert> {
        positions
            .iter()
            .filter(|p| p.status == VehicleStatus::StoppedAt)
            .filter_map(|p| {
                let minutes = p.minutes_since(now);
                (minutes >= self.stopped_minutes).then(|| Alert {
                    alert_type: AlertType::DelayedVehicle,
                    message: format!(
                        "Vehicle {} on route {} has been stopped for {} minutes",
                        p.vehicle_id, p.route_id, minutes
                    ),
                    route_id: Some(p.route_id.clone()),
                    vehicle_id: Some(p.vehicle_id.clone()),
                    latitude: p.latitude,
                    longitude: p.longitude,
                    severity: minutes,
                    created_at: now,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Detector for DelayedDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::DelayedVehicle
    }

    async fn detect(
        &self,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let stopped = store
            .latest_positions(&LatestQuery::all().with_status(VehicleStatus::StoppedAt))
            .await?;
        Ok(self.evaluate(&stopped, now))
    }
}
