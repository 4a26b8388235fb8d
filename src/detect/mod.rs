//! Anomaly detectors over the Latest-Position View.
//!
//! Each detector reads the view once through the [`PositionStore`] and
//! evaluates its condition in memory, so every store backend yields the same
//! alerts. Minutes are whole minutes, truncated.

mod bunching;
mod coverage;
mod delayed;
mod offline;

pub use bunching::BunchingDetector;
pub use coverage::CoverageDetector;
pub use delayed::DelayedDetector;
pub use offline::OfflineDetector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{KM_PER_DEGREE, Thresholds};
use crate::error::StoreError;
use crate::model::{Alert, AlertType, PositionRecord};
use crate::store::PositionStore;

#[async_trait]
pub trait Detector: Send + Sync {
    fn alert_type(&self) -> AlertType;

    /// Evaluates the condition at `now` and returns one alert per finding.
    async fn detect(
        &self,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError>;
}

/// The four detectors, in the order a monitoring pass runs them.
pub fn default_detectors(thresholds: &Thresholds) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(DelayedDetector::new(thresholds.stopped_minutes)),
        Box::new(BunchingDetector::new(thresholds.bunching_distance_km)),
        Box::new(CoverageDetector::new(thresholds.minimum_vehicles_per_route)),
        Box::new(OfflineDetector::new(thresholds.offline_minutes)),
    ]
}

/// Flat-plane distance in kilometres. No latitude scaling.
pub fn planar_distance_km(a: &PositionRecord, b: &PositionRecord) -> f64 {
    let dlat = a.latitude - b.latitude;
    let dlon = a.longitude - b.longitude;
    (dlat * dlat + dlon * dlon).sqrt() * KM_PER_DEGREE
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Duration, Utc};

    use crate::model::{PositionRecord, VehicleStatus};

    pub fn position(
        vehicle: &str,
        route: &str,
        status: VehicleStatus,
        observed_at: DateTime<Utc>,
    ) -> PositionRecord {
        PositionRecord {
            vehicle_id: vehicle.to_string(),
            route_id: route.to_string(),
            latitude: 37.7749,
            longitude: -122.4194,
            observed_at,
            status,
        }
    }

    pub fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        now - Duration::minutes(minutes)
    }
}
