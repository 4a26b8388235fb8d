//! Scheduled anomaly detection over the stored positions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::alerts::AlertAggregator;
use crate::config::Thresholds;
use crate::detect::{Detector, default_detectors};
use crate::error::MonitorError;
use crate::schedule::{PeriodicTask, Tick};
use crate::store::PositionStore;

/// Runs every detector against the store on a fixed schedule and feeds the
/// findings to an [`AlertAggregator`].
pub struct MonitoringPipeline {
    job: Arc<MonitorJob>,
    initial_delay: Duration,
    drain_timeout: Duration,
    /// Held by `stop` until the old schedule has drained.
    task: Mutex<Option<PeriodicTask>>,
}

impl MonitoringPipeline {
    pub fn new(
        store: Arc<dyn PositionStore>,
        thresholds: &Thresholds,
        alerts: Arc<AlertAggregator>,
    ) -> Self {
        Self::with_detectors(store, default_detectors(thresholds), alerts)
    }

    /// Detectors run in the order given.
    pub fn with_detectors(
        store: Arc<dyn PositionStore>,
        detectors: Vec<Box<dyn Detector>>,
        alerts: Arc<AlertAggregator>,
    ) -> Self {
        Self {
            job: Arc::new(MonitorJob {
                store,
                detectors,
                alerts,
            }),
            initial_delay: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            task: Mutex::new(None),
        }
    }

    /// Sets the delay before the first scheduled pass.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn alerts(&self) -> &Arc<AlertAggregator> {
        &self.job.alerts
    }

    /// Starts a detection pass every `interval`, the first after the initial
    /// delay. Returns `false` and leaves the running schedule alone if one
    /// is active or a `stop` is still draining it.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut task) = self.task.try_lock() else {
            warn!("Monitoring pipeline is still stopping; try again once stop returns");
            return false;
        };
        if task.is_some() {
            warn!("Monitoring pipeline is already running; stop it before restarting");
            return false;
        }

        *task = Some(PeriodicTask::spawn(
            "monitoring",
            Arc::clone(&self.job),
            interval,
            self.initial_delay,
        ));

        info!(
            interval_secs = interval.as_secs_f64(),
            detectors = self.job.detectors.len(),
            "Monitoring pipeline started"
        );
        true
    }

    /// # Errors
    ///
    /// [`MonitorError::SchedulerShutdown`] if an in-flight pass outlived the
    /// drain timeout and was aborted.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let mut slot = self.task.lock().await;
        let Some(task) = slot.take() else {
            info!("Monitoring pipeline is not running");
            return Ok(());
        };

        let result = task.shutdown(self.drain_timeout).await;
        drop(slot);
        info!("Monitoring pipeline stopped");
        result
    }

    /// True while a schedule is active or still draining.
    pub fn is_running(&self) -> bool {
        self.task.try_lock().map_or(true, |task| task.is_some())
    }

    /// Runs one detection pass at `now` and returns how many alerts it
    /// raised.
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        self.job.run_once(now).await
    }
}

struct MonitorJob {
    store: Arc<dyn PositionStore>,
    detectors: Vec<Box<dyn Detector>>,
    alerts: Arc<AlertAggregator>,
}

impl MonitorJob {
    #[tracing::instrument(name = "monitor", skip(self))]
    async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let mut raised = 0;

        for detector in &self.detectors {
            let alert_type = detector.alert_type();
            match detector.detect(self.store.as_ref(), now).await {
                Ok(found) => {
                    raised += found.len();
                    for alert in found {
                        self.alerts.record_alert(alert);
                    }
                }
                Err(e) => error!(detector = %alert_type, "Detector failed: {e}"),
            }
        }

        info!(alerts = raised, "Monitoring pass complete");
        raised
    }
}

#[async_trait]
impl Tick for MonitorJob {
    async fn tick(&self) -> anyhow::Result<()> {
        self.run_once(Utc::now()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{Alert, AlertType, PositionRecord, VehicleStatus};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingDetector;

    #[async_trait]
    impl Detector for FailingDetector {
        fn alert_type(&self) -> AlertType {
            AlertType::DelayedVehicle
        }

        async fn detect(
            &self,
            _store: &dyn PositionStore,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Alert>, StoreError> {
            Err(StoreError::Backend("query failed".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingDetector {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Detector for Arc<CountingDetector> {
        fn alert_type(&self) -> AlertType {
            AlertType::OfflineVehicle
        }

        async fn detect(
            &self,
            _store: &dyn PositionStore,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Alert>, StoreError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Spends two seconds per pass and tracks how many passes overlap.
    #[derive(Default)]
    struct SlowDetector {
        passes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Detector for Arc<SlowDetector> {
        fn alert_type(&self) -> AlertType {
            AlertType::LowRouteCoverage
        }

        async fn detect(
            &self,
            _store: &dyn PositionStore,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Alert>, StoreError> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn position(
        vehicle: &str,
        status: VehicleStatus,
        lat: f64,
        lon: f64,
        observed_at: DateTime<Utc>,
    ) -> PositionRecord {
        PositionRecord {
            vehicle_id: vehicle.to_string(),
            route_id: "R1".to_string(),
            latitude: lat,
            longitude: lon,
            observed_at,
            status,
        }
    }

    fn quiet_aggregator() -> Arc<AlertAggregator> {
        let alerts = Arc::new(AlertAggregator::default());
        alerts.set_quiet_mode(true);
        alerts
    }

    #[tokio::test]
    async fn test_delayed_vehicle_end_to_end() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        store
            .write_batch(&[position(
                "V1",
                VehicleStatus::StoppedAt,
                37.0,
                -122.0,
                now - ChronoDuration::minutes(6),
            )])
            .await
            .unwrap();

        let alerts = quiet_aggregator();
        let pipeline = MonitoringPipeline::new(store, &Thresholds::default(), alerts.clone());
        pipeline.run_once(now).await;

        let delayed: Vec<_> = alerts
            .recent_alerts()
            .into_iter()
            .filter(|a| a.alert_type == AlertType::DelayedVehicle)
            .collect();
        assert_eq!(delayed.len(), 1);
        assert!(delayed[0].message.contains("V1"));
        assert!(delayed[0].message.contains('6'));
    }

    #[tokio::test]
    async fn test_bunching_end_to_end() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        store
            .write_batch(&[
                position("V2", VehicleStatus::InTransitTo, 37.7749, -122.4194, now),
                position("V3", VehicleStatus::InTransitTo, 37.7799, -122.4144, now),
            ])
            .await
            .unwrap();

        let alerts = quiet_aggregator();
        let pipeline = MonitoringPipeline::new(store, &Thresholds::default(), alerts.clone());
        pipeline.run_once(now).await;

        assert_eq!(alerts.alert_counts()[&AlertType::VehicleBunching], 1);
        // Two active vehicles meet the default minimum.
        assert_eq!(alerts.alert_counts()[&AlertType::LowRouteCoverage], 0);
    }

    #[tokio::test]
    async fn test_failing_detector_does_not_block_the_rest() {
        let counting = Arc::new(CountingDetector::default());
        let pipeline = MonitoringPipeline::with_detectors(
            Arc::new(MemoryStore::new()),
            vec![Box::new(FailingDetector), Box::new(counting.clone())],
            quiet_aggregator(),
        );

        assert_eq!(pipeline.run_once(Utc::now()).await, 0);
        assert_eq!(counting.passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_waits_for_initial_delay() {
        let counting = Arc::new(CountingDetector::default());
        let pipeline = MonitoringPipeline::with_detectors(
            Arc::new(MemoryStore::new()),
            vec![Box::new(counting.clone())],
            quiet_aggregator(),
        );

        assert!(pipeline.start(Duration::from_secs(60)));
        assert!(!pipeline.start(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counting.passes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counting.passes.load(Ordering::SeqCst), 1);

        pipeline.stop().await.unwrap();
        assert!(!pipeline.is_running());
        pipeline.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_rejected_while_stop_drains() {
        let slow = Arc::new(SlowDetector::default());
        let pipeline = Arc::new(
            MonitoringPipeline::with_detectors(
                Arc::new(MemoryStore::new()),
                vec![Box::new(slow.clone())],
                quiet_aggregator(),
            )
            .with_initial_delay(Duration::ZERO),
        );

        assert!(pipeline.start(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stopping = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(pipeline.is_running());
        assert!(!pipeline.start(Duration::from_secs(60)));

        stopping.await.unwrap().unwrap();
        assert!(!pipeline.is_running());
        assert_eq!(slow.passes.load(Ordering::SeqCst), 1);

        assert!(pipeline.start(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(slow.passes.load(Ordering::SeqCst), 2);
        assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);

        pipeline.stop().await.unwrap();
    }
}
