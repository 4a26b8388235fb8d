//! Runtime settings for the pipelines, detectors and feed.
//!
//! Values are assembled once by the binary (CLI flags, environment, `.env`)
//! and handed to each component at construction.

use std::time::Duration;

use crate::error::MonitorError;

/// Routes count as active, and vehicles as present, when their latest
/// position is younger than this many whole minutes.
pub const ACTIVE_WINDOW_MINUTES: i64 = 15;

/// Degrees-to-kilometres factor of the flat-plane distance approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Detector thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Minutes a vehicle may sit `STOPPED_AT` before it is reported delayed.
    pub stopped_minutes: i64,
    /// Same-route vehicles closer than this are reported as bunched.
    pub bunching_distance_km: f64,
    /// Routes with fewer active vehicles are reported as under-served.
    pub minimum_vehicles_per_route: usize,
    /// Minutes without a report before a vehicle counts as offline.
    pub offline_minutes: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            stopped_minutes: 5,
            bunching_distance_km: 1.0,
            minimum_vehicles_per_route: 2,
            offline_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub fetch_interval: Duration,
    pub monitor_interval: Duration,
    /// Delay before the first monitoring pass, so ingestion can populate the
    /// store first.
    pub monitor_initial_delay: Duration,
    pub batch_size: usize,
    pub thresholds: Thresholds,
    pub alert_capacity: usize,
    pub quiet_mode: bool,
    pub ingest_drain_timeout: Duration,
    pub monitor_drain_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(60),
            monitor_initial_delay: Duration::from_secs(5),
            batch_size: 100,
            thresholds: Thresholds::default(),
            alert_capacity: 100,
            quiet_mode: false,
            ingest_drain_timeout: Duration::from_secs(5),
            monitor_drain_timeout: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    /// Rejects settings that would make a pipeline misbehave.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.fetch_interval.is_zero() {
            return Err(config_error("fetch interval must be greater than zero"));
        }
        if self.monitor_interval.is_zero() {
            return Err(config_error("monitor interval must be greater than zero"));
        }
        if self.batch_size < 1 {
            return Err(config_error("batch size must be at least 1"));
        }
        if self.alert_capacity < 1 {
            return Err(config_error("alert capacity must be at least 1"));
        }

        let t = &self.thresholds;
        if t.stopped_minutes < 0 || t.offline_minutes < 0 {
            return Err(config_error("minute thresholds must not be negative"));
        }
        if !(t.bunching_distance_km.is_finite() && t.bunching_distance_km > 0.0) {
            return Err(config_error("bunching distance must be a positive number"));
        }
        if t.minimum_vehicles_per_route < 1 {
            return Err(config_error("minimum vehicles per route must be at least 1"));
        }

        Ok(())
    }
}

/// Where to fetch the vehicle-positions feed from and how to authenticate.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// When set, the API key is sent in this header rather than as the
    /// `api_key` query parameter.
    pub api_key_header: Option<String>,
    pub agency: Option<String>,
    pub http_timeout: Duration,
}

impl FeedConfig {
    /// Reads `GTFS_BASE_URL`, `GTFS_API_KEY` (or `API_TOKEN`),
    /// `GTFS_API_KEY_HEADER` and `GTFS_AGENCY` from the environment.
    pub fn from_env(http_timeout: Duration) -> Result<Self, MonitorError> {
        let base_url = non_empty_var("GTFS_BASE_URL")
            .ok_or_else(|| config_error("GTFS_BASE_URL must be set"))?;

        Ok(Self {
            base_url,
            api_key: non_empty_var("GTFS_API_KEY").or_else(|| non_empty_var("API_TOKEN")),
            api_key_header: non_empty_var("GTFS_API_KEY_HEADER"),
            agency: non_empty_var("GTFS_AGENCY"),
            http_timeout,
        })
    }

    /// The request URL without credentials. The key is attached per request
    /// by the auth wrapper.
    pub fn feed_url(&self) -> String {
        match &self.agency {
            Some(agency) => {
                let sep = if self.base_url.contains('?') { '&' } else { '?' };
                format!("{}{}agency={}", self.base_url, sep, agency)
            }
            None => self.base_url.clone(),
        }
    }

    /// The feed URL as it is sent on the wire, with the key masked. Safe to
    /// log.
    pub fn redacted_url(&self) -> String {
        let url = self.feed_url();
        match (&self.api_key, &self.api_key_header) {
            (Some(_), None) => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}api_key=[API_TOKEN]")
            }
            _ => url,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn config_error(msg: &str) -> MonitorError {
    MonitorError::Configuration(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(agency: Option<&str>, key: Option<&str>) -> FeedConfig {
        FeedConfig {
            base_url: "https://example.org/vehiclepositions".to_string(),
            api_key: key.map(str::to_string),
            api_key_header: None,
            agency: agency.map(str::to_string),
            http_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = MonitorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MonitorError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = MonitorConfig {
            monitor_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_bunching_distance_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.bunching_distance_km = 0.0;
        assert!(config.validate().is_err());

        config.thresholds.bunching_distance_km = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_feed_url_appends_agency() {
        assert_eq!(
            feed(Some("SF"), None).feed_url(),
            "https://example.org/vehiclepositions?agency=SF"
        );
    }

    #[test]
    fn test_redacted_url_masks_key() {
        let url = feed(Some("SF"), Some("secret")).redacted_url();
        assert_eq!(
            url,
            "https://example.org/vehiclepositions?agency=SF&api_key=[API_TOKEN]"
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_redacted_url_without_key() {
        assert_eq!(
            feed(None, None).redacted_url(),
            "https://example.org/vehiclepositions"
        );
    }
}
