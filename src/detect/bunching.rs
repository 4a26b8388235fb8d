use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Detector, planar_distance_km};
use crate::error::StoreError;
use crate::model::{Alert, AlertType, PositionRecord, VehicleStatus};
use crate::store::{LatestQuery, PositionStore};

/// Pairs of `IN_TRANSIT_TO` vehicles on the same route that are closer than
/// `distance_km`.
pub struct BunchingDetector {
    distance_km: f64,
}

impl BunchingDetector {
    pub fn new(distance_km: f64) -> Self {
        Self { distance_km }
    }

    /// Each unordered pair is considered once, with the smaller vehicle id
    /// first. Alerts come out closest pair first.
    pub fn evaluate(&self, positions: &[PositionRecord], now: DateTime<Utc>) -> Vec<Alert> {
        let mut by_route: BTreeMap<&str, Vec<&PositionRecord>> = BTreeMap::new();
        for p in positions
            .iter()
            .filter(|p| p.status == VehicleStatus::InTransitTo)
        {
            by_route.entry(p.route_id.as_str()).or_default().push(p);
        }

        let mut pairs = Vec::new();
        for (route, mut vehicles) in by_route {
            vehicles.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
            for (i, a) in vehicles.iter().enumerate() {
                for b in &vehicles[i + 1..] {
                    if a.vehicle_id == b.vehicle_id {
                        continue;
                    }
                    let distance = planar_distance_km(a, b);
                    if distance < self.distance_km {
                        pairs.push((distance, route, *a, *b));
                    }
                }
            }
        }
        pairs.sort_by(|x, y| x.0.total_cmp(&y.0));

        pairs
            .into_iter()
            .map(|(distance, route, a, b)| Alert {
                alert_type: AlertType::VehicleBunching,
                message: format!(
                    "Vehicles {} and {} on route {} are only {:.2} km apart",
                    a.vehicle_id, b.vehicle_id, route, distance
                ),
                route_id: Some(route.to_string()),
                vehicle_id: Some(format!("{},{}", a.vehicle_id, b.vehicle_id)),
                latitude: (a.latitude + b.latitude) / 2.0,
                longitude: (a.longitude + b.longitude) / 2.0,
                severity: (distance * 100.0).trunc() as i64,
                created_at: now,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for BunchingDetector {
    fn alert_type(&self) -> AlertType {
        AlertType::VehicleBunching
    }

    async fn detect(
        &self,
        store: &dyn PositionStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let moving = store
            .latest_positions(&LatestQuery::all().with_status(VehicleStatus::InTransitTo))
            .await?;
        Ok(self.evaluate(&moving, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::position;

    fn moving(
        vehicle: &str,
        route: &str,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> PositionRecord {
        let mut p = position(vehicle, route, VehicleStatus::InTransitTo, now);
        p.latitude = lat;
        p.longitude = lon;
        p
    }

    #[test]
    fn test_close_pair_yields_one_alert() {
        let now = Utc::now();
        let alerts = BunchingDetector::new(1.0).evaluate(
            &[
                moving("V2", "R1", 37.7749, -122.4194, now),
                moving("V3", "R1", 37.7799, -122.4144, now),
            ],
            now,
        );

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.alert_type, AlertType::VehicleBunching);
        assert_eq!(alert.vehicle_id.as_deref(), Some("V2,V3"));
        assert_eq!(
            alert.message,
            "Vehicles V2 and V3 on route R1 are only 0.78 km apart"
        );
        // 0.785 km in units of 10 m.
        assert_eq!(alert.severity, 78);
        assert!((alert.latitude - 37.7774).abs() < 1e-9);
    }

    #[test]
    fn test_different_routes_never_bunch() {
        let now = Utc::now();
        let alerts = BunchingDetector::new(1.0).evaluate(
            &[
                moving("V1", "R1", 37.0, -122.0, now),
                moving("V2", "R2", 37.0, -122.0, now),
            ],
            now,
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_distance_threshold_is_exclusive() {
        let now = Utc::now();
        let a = moving("V1", "R1", 37.0, -122.0, now);
        let b = moving("V2", "R1", 37.01, -122.0, now);
        let exactly = planar_distance_km(&a, &b);

        assert!(BunchingDetector::new(exactly).evaluate(&[a.clone(), b.clone()], now).is_empty());
        assert_eq!(BunchingDetector::new(exactly + 0.01).evaluate(&[a, b], now).len(), 1);
    }

    #[test]
    fn test_stopped_vehicles_ignored() {
        let now = Utc::now();
        let mut stopped = moving("V2", "R1", 37.0, -122.0, now);
        stopped.status = VehicleStatus::StoppedAt;

        let alerts = BunchingDetector::new(1.0)
            .evaluate(&[moving("V1", "R1", 37.0, -122.0, now), stopped], now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_alerts_ordered_closest_first() {
        let now = Utc::now();
        let alerts = BunchingDetector::new(1.0).evaluate(
            &[
                moving("A", "R1", 37.0, -122.0, now),
                moving("B", "R1", 37.005, -122.0, now),
                moving("C", "R2", 38.0, -122.0, now),
                moving("D", "R2", 38.001, -122.0, now),
            ],
            now,
        );

        let pairs: Vec<_> = alerts.iter().filter_map(|a| a.vehicle_id.clone()).collect();
        assert_eq!(pairs, vec!["C,D", "A,B"]);
    }

    #[test]
    fn test_three_close_vehicles_yield_three_pairs() {
        let now = Utc::now();
        let alerts = BunchingDetector::new(1.0).evaluate(
            &[
                moving("V1", "R1", 37.0, -122.0, now),
                moving("V2", "R1", 37.001, -122.0, now),
                moving("V3", "R1", 37.002, -122.0, now),
            ],
            now,
        );
        assert_eq!(alerts.len(), 3);
    }
}
