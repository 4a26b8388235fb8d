//! Core records shared by ingestion, detection and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reported stop status of a vehicle, as broadcast by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    InTransitTo,
    StoppedAt,
    IncomingAt,
    Unknown,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 4] = [
        VehicleStatus::InTransitTo,
        VehicleStatus::StoppedAt,
        VehicleStatus::IncomingAt,
        VehicleStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::InTransitTo => "IN_TRANSIT_TO",
            VehicleStatus::StoppedAt => "STOPPED_AT",
            VehicleStatus::IncomingAt => "INCOMING_AT",
            VehicleStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = std::convert::Infallible;

    /// Unrecognised values map to [`VehicleStatus::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "IN_TRANSIT_TO" => VehicleStatus::InTransitTo,
            "STOPPED_AT" => VehicleStatus::StoppedAt,
            "INCOMING_AT" => VehicleStatus::IncomingAt,
            _ => VehicleStatus::Unknown,
        })
    }
}

/// One observed position of one vehicle.
///
/// Identity is `(vehicle_id, observed_at)`. Records are append-only: the
/// store accumulates a time series per vehicle and the newest row is the
/// vehicle's current position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub vehicle_id: String,
    pub route_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: DateTime<Utc>,
    pub status: VehicleStatus,
}

impl PositionRecord {
    /// Whole minutes elapsed between `observed_at` and `now`, truncated
    /// toward zero. Negative when the record is from the future.
    pub fn minutes_since(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_minutes()
    }
}

/// The four kinds of service disruption the detectors report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    DelayedVehicle,
    VehicleBunching,
    LowRouteCoverage,
    OfflineVehicle,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::DelayedVehicle,
        AlertType::VehicleBunching,
        AlertType::LowRouteCoverage,
        AlertType::OfflineVehicle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::DelayedVehicle => "DELAYED_VEHICLE",
            AlertType::VehicleBunching => "VEHICLE_BUNCHING",
            AlertType::LowRouteCoverage => "LOW_ROUTE_COVERAGE",
            AlertType::OfflineVehicle => "OFFLINE_VEHICLE",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected service disruption.
///
/// `severity` is an urgency rank whose direction depends on the type: for
/// [`AlertType::VehicleBunching`] it is the pair distance in units of 10 m,
/// so a *smaller* value is *more* severe. Every other type uses larger is
/// worse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub message: String,
    pub route_id: Option<String>,
    /// A single vehicle id, or a comma-joined list for pairwise alerts.
    pub vehicle_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: i64,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time view of the ingestion counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub total_fetched: u64,
    pub total_stored: u64,
    pub last_fetch_count: u64,
    pub last_fetch_time_ms: u64,
    pub running_time_ms: u64,
    pub is_running: bool,
}

impl IngestStats {
    /// Records fetched per second of running time.
    pub fn ingestion_rate(&self) -> f64 {
        let secs = self.running_time_ms / 1000;
        if secs == 0 {
            0.0
        } else {
            self.total_fetched as f64 / secs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in VehicleStatus::ALL {
            assert_eq!(status.as_str().parse::<VehicleStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unrecognised_status_is_unknown() {
        assert_eq!(
            "DEPARTED".parse::<VehicleStatus>().unwrap(),
            VehicleStatus::Unknown
        );
    }

    #[test]
    fn test_minutes_since_truncates() {
        let now = Utc::now();
        let record = PositionRecord {
            vehicle_id: "V1".to_string(),
            route_id: "R1".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            observed_at: now - Duration::seconds(5 * 60 + 59),
            status: VehicleStatus::StoppedAt,
        };

        assert_eq!(record.minutes_since(now), 5);
    }

    #[test]
    fn test_ingestion_rate_with_zero_running_time() {
        let stats = IngestStats {
            total_fetched: 10,
            ..Default::default()
        };
        assert_eq!(stats.ingestion_rate(), 0.0);
    }

    #[test]
    fn test_ingestion_rate() {
        let stats = IngestStats {
            total_fetched: 100,
            running_time_ms: 50_000,
            ..Default::default()
        };
        assert_eq!(stats.ingestion_rate(), 2.0);
    }
}
