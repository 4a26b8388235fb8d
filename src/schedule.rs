//! Fixed-rate background work with bounded shutdown.
//!
//! A [`PeriodicTask`] owns one tokio task that calls a [`Tick`] on every
//! interval. Ticks of the same task never overlap: when one overruns its
//! period the next is delayed, not run in parallel. Each tick runs in its own
//! spawned task, so an error or a panic inside it is logged and the schedule
//! carries on with the next interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MonitorError;

/// One unit of periodic work.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    async fn tick(&self) -> anyhow::Result<()>;
}

pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    current_tick: Arc<Mutex<Option<AbortHandle>>>,
}

impl PeriodicTask {
    /// Starts ticking `job` every `period`, the first tick firing after
    /// `initial_delay`. Must be called from within a tokio runtime.
    pub fn spawn<T: Tick>(
        name: &'static str,
        job: Arc<T>,
        period: Duration,
        initial_delay: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let current_tick = Arc::new(Mutex::new(None));

        let handle = tokio::spawn(run_loop(
            name,
            job,
            period,
            initial_delay,
            cancel.clone(),
            Arc::clone(&current_tick),
        ));

        Self {
            name,
            cancel,
            handle,
            current_tick,
        }
    }

    /// Prevents further ticks and waits up to `timeout` for an in-flight
    /// tick to finish. If it does not, the loop and the tick are aborted and
    /// [`MonitorError::SchedulerShutdown`] is returned.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<(), MonitorError> {
        self.cancel.cancel();

        match time::timeout(timeout, &mut self.handle).await {
            Ok(_) => Ok(()),
            Err(_) => {
                self.handle.abort();
                if let Some(tick) = lock(&self.current_tick).take() {
                    tick.abort();
                }
                warn!(
                    task = self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Periodic task did not drain in time; aborted"
                );
                Err(MonitorError::SchedulerShutdown {
                    task: self.name,
                    timeout,
                })
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_loop<T: Tick>(
    name: &'static str,
    job: Arc<T>,
    period: Duration,
    initial_delay: Duration,
    cancel: CancellationToken,
    current_tick: Arc<Mutex<Option<AbortHandle>>>,
) {
    let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        task = name,
        period_ms = period.as_millis() as u64,
        initial_delay_ms = initial_delay.as_millis() as u64,
        "Periodic task started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let job = Arc::clone(&job);
        let tick = tokio::spawn(async move { job.tick().await });
        *lock(&current_tick) = Some(tick.abort_handle());

        match tick.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, "Tick failed: {e:#}"),
            Err(e) if e.is_panic() => error!(task = name, "Tick panicked"),
            Err(_) => debug!(task = name, "Tick cancelled"),
        }
        lock(&current_tick).take();
    }

    info!(task = name, "Periodic task stopped");
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
