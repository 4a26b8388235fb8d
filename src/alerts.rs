//! Bounded alert history and per-type counters.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::model::{Alert, AlertType};

pub const DEFAULT_ALERT_CAPACITY: usize = 100;

/// Collects alerts from the detectors for reporting.
///
/// Written by the monitoring tick and read from any other thread. Getters
/// hand out copies, never references into the live buffer.
pub struct AlertAggregator {
    counts: [AtomicU64; 4],
    recent: Mutex<VecDeque<Alert>>,
    capacity: usize,
    quiet: AtomicBool,
}

impl AlertAggregator {
    /// `capacity` is clamped to at least one alert.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            counts: Default::default(),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            quiet: AtomicBool::new(false),
        }
    }

    /// Suppresses the per-alert log line. Counting and buffering are
    /// unaffected.
    pub fn set_quiet_mode(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    pub fn record_alert(&self, alert: Alert) {
        if !self.is_quiet() {
            warn!(
                alert_type = %alert.alert_type,
                severity = alert.severity,
                "ALERT: {}",
                alert.message
            );
        }

        let mut recent = self.lock_recent();
        self.counts[slot(alert.alert_type)].fetch_add(1, Ordering::Relaxed);
        recent.push_back(alert);
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    /// Alerts recorded per type since startup. Always has all four types.
    pub fn alert_counts(&self) -> BTreeMap<AlertType, u64> {
        AlertType::ALL
            .iter()
            .map(|&t| (t, self.counts[slot(t)].load(Ordering::Relaxed)))
            .collect()
    }

    /// The buffered alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.lock_recent().iter().cloned().collect()
    }

    /// The `limit` newest alerts, newest first.
    pub fn recent_alerts_limited(&self, limit: usize) -> Vec<Alert> {
        self.lock_recent().iter().rev().take(limit).cloned().collect()
    }

    fn lock_recent(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AlertAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_CAPACITY)
    }
}

fn slot(alert_type: AlertType) -> usize {
    match alert_type {
        AlertType::DelayedVehicle => 0,
        AlertType::VehicleBunching => 1,
        AlertType::LowRouteCoverage => 2,
        AlertType::OfflineVehicle => 3,
    }
}
