//! Scheduled fetch → batch → store ingestion.

mod batch;

pub use batch::PositionBatcher;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as TaskSlot;
use tracing::{info, warn};

use crate::error::MonitorError;
use crate::feed::PositionFeed;
use crate::model::IngestStats;
use crate::schedule::{PeriodicTask, Tick};
use crate::store::PositionStore;

/// Live counters behind [`IngestStats`]. Reset only by
/// [`IngestionPipeline::start`], so they never decrease while a schedule
/// runs.
#[derive(Default)]
struct Counters {
    total_fetched: AtomicU64,
    total_stored: AtomicU64,
    last_fetch_count: AtomicU64,
    last_fetch_time_ms: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.total_fetched.store(0, Ordering::Relaxed);
        self.total_stored.store(0, Ordering::Relaxed);
        self.last_fetch_count.store(0, Ordering::Relaxed);
        self.last_fetch_time_ms.store(0, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct RunClock {
    started: Option<Instant>,
    /// Running time of the last completed run, reported while stopped.
    last_run: Duration,
}

/// Periodically pulls the full feed snapshot and appends it to the store.
pub struct IngestionPipeline {
    feed: Arc<dyn PositionFeed>,
    store: Arc<dyn PositionStore>,
    batcher: PositionBatcher,
    drain_timeout: Duration,
    counters: Arc<Counters>,
    clock: Mutex<RunClock>,
    /// Held by `stop` until the old schedule has drained.
    task: TaskSlot<Option<PeriodicTask>>,
}

impl IngestionPipeline {
    pub fn new(feed: Arc<dyn PositionFeed>, store: Arc<dyn PositionStore>) -> Self {
        Self {
            feed,
            store,
            batcher: PositionBatcher::default(),
            drain_timeout: Duration::from_secs(5),
            counters: Arc::new(Counters::default()),
            clock: Mutex::new(RunClock::default()),
            task: TaskSlot::new(None),
        }
    }

    /// Sets how many records go into each store transaction.
    ///
    /// # Errors
    ///
    /// [`MonitorError::Configuration`] if `batch_size` is zero.
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, MonitorError> {
        self.batcher = PositionBatcher::new(batch_size)?;
        Ok(self)
    }

    /// Sets how long [`stop`](Self::stop) waits for an in-flight tick.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Starts ingesting every `interval`, the first tick immediately.
    ///
    /// Counters are reset. If a schedule is already active, or a `stop` is
    /// still draining the previous one, this logs a warning and returns
    /// `false` without touching it.
    pub fn start(&self, interval: Duration) -> bool {
        let Ok(mut task) = self.task.try_lock() else {
            warn!("Ingestion pipeline is still stopping; try again once stop returns");
            return false;
        };
        if task.is_some() {
            warn!("Ingestion pipeline is already running; stop it before restarting");
            return false;
        }

        self.counters.reset();
        *lock(&self.clock) = RunClock {
            started: Some(Instant::now()),
            last_run: Duration::ZERO,
        };

        *task = Some(PeriodicTask::spawn(
            "ingestion",
            Arc::new(self.job()),
            interval,
            Duration::ZERO,
        ));

        info!(
            interval_secs = interval.as_secs_f64(),
            batch_size = self.batcher.batch_size(),
            "Ingestion pipeline started"
        );
        true
    }

    /// Cancels the schedule, letting an in-flight tick finish within the
    /// drain timeout. A no-op when nothing is scheduled.
    ///
    /// # Errors
    ///
    /// [`MonitorError::SchedulerShutdown`] if the tick had to be aborted.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let mut slot = self.task.lock().await;
        let Some(task) = slot.take() else {
            info!("Ingestion pipeline is not running");
            return Ok(());
        };

        let result = task.shutdown(self.drain_timeout).await;

        let mut clock = lock(&self.clock);
        if let Some(started) = clock.started.take() {
            clock.last_run = started.elapsed();
        }
        drop(clock);
        drop(slot);

        info!("Ingestion pipeline stopped");
        result
    }

    /// True while a schedule is active or still draining.
    pub fn is_running(&self) -> bool {
        self.task.try_lock().map_or(true, |task| task.is_some())
    }

    /// Runs one fetch → store cycle now, outside any schedule.
    pub async fn ingest_once(&self) -> Result<(), MonitorError> {
        self.job().ingest_once().await
    }

    pub fn statistics(&self) -> IngestStats {
        let running_time = {
            let clock = lock(&self.clock);
            clock.started.map_or(clock.last_run, |s| s.elapsed())
        };

        IngestStats {
            total_fetched: self.counters.total_fetched.load(Ordering::Relaxed),
            total_stored: self.counters.total_stored.load(Ordering::Relaxed),
            last_fetch_count: self.counters.last_fetch_count.load(Ordering::Relaxed),
            last_fetch_time_ms: self.counters.last_fetch_time_ms.load(Ordering::Relaxed),
            running_time_ms: running_time.as_millis() as u64,
            is_running: self.is_running(),
        }
    }

    fn job(&self) -> IngestJob {
        IngestJob {
            feed: Arc::clone(&self.feed),
            store: Arc::clone(&self.store),
            batcher: self.batcher,
            counters: Arc::clone(&self.counters),
        }
    }
}

struct IngestJob {
    feed: Arc<dyn PositionFeed>,
    store: Arc<dyn PositionStore>,
    batcher: PositionBatcher,
    counters: Arc<Counters>,
}

impl IngestJob {
    #[tracing::instrument(name = "ingest", skip(self))]
    async fn ingest_once(&self) -> Result<(), MonitorError> {
        let started = Instant::now();

        // A failed fetch leaves every counter as it was.
        let positions = self.feed.fetch_positions().await?;
        let fetched = positions.len();

        self.counters
            .last_fetch_count
            .store(fetched as u64, Ordering::Relaxed);
        self.counters
            .total_fetched
            .fetch_add(fetched as u64, Ordering::Relaxed);

        if positions.is_empty() {
            info!("No vehicle positions in feed");
            self.record_duration(started);
            return Ok(());
        }

        let mut stored = 0usize;
        let mut total_batches = 0usize;
        let mut failed_batches = 0usize;
        let mut failed_records = 0usize;

        for (index, batch) in self.batcher.batches(&positions).enumerate() {
            total_batches += 1;
            match self.store.write_batch(batch).await {
                Ok(written) => {
                    stored += written;
                    self.counters
                        .total_stored
                        .fetch_add(written as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    failed_batches += 1;
                    failed_records += batch.len();
                    warn!(
                        batch = index,
                        records = batch.len(),
                        error = %e,
                        "Batch write failed"
                    );
                }
            }
        }

        self.record_duration(started);
        info!(fetched, stored, batches = total_batches, "Ingested vehicle positions");

        if failed_batches > 0 {
            return Err(MonitorError::PartialStorage {
                failed_batches,
                total_batches,
                failed_records,
            });
        }
        Ok(())
    }

    fn record_duration(&self, started: Instant) {
        self.counters
            .last_fetch_time_ms
            .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl Tick for IngestJob {
    async fn tick(&self) -> anyhow::Result<()> {
        Ok(self.ingest_once().await?)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
