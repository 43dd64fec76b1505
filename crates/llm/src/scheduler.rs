//! Cooperative periodic task runner.
//!
//! Each task runs in its own loop: sleep, run, bookkeeping. Failures back
//! off exponentially up to a ceiling, with uniform jitter so a fleet of
//! proxies does not thunder against the same upstream. Shutdown cancels
//! sleeping tasks, waits for running ones up to a graceful timeout, then
//! force-cancels and always runs cleanup.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng as _;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A periodically executed task.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    /// Base interval between runs.
    fn interval(&self) -> Duration;

    fn enabled(&self) -> bool {
        true
    }

    /// Ceiling for failure backoff.
    fn max_backoff(&self) -> Duration {
        Duration::from_secs(3600)
    }

    /// Fraction of the delay used as the jitter window.
    fn jitter_factor(&self) -> f64 {
        0.1
    }

    /// Run once immediately after setup instead of sleeping first.
    fn first_run(&self) -> bool {
        false
    }

    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One execution. `Ok(false)` counts as a failure for backoff.
    async fn run(&self) -> anyhow::Result<bool>;

    async fn cleanup(&self) {}
}

/// `min(interval * 2^failures, max_backoff)` ± uniform jitter of
/// `delay * jitter_factor / 2` in each direction.
pub fn calculate_next_delay(
    interval: Duration,
    consecutive_failures: u32,
    max_backoff: Duration,
    jitter_factor: f64,
) -> Duration {
    let factor = 2f64.powi(consecutive_failures.min(32) as i32);
    let base = interval.as_secs_f64() * factor;
    let capped = base.min(max_backoff.as_secs_f64());

    if jitter_factor <= 0.0 {
        return Duration::from_secs_f64(capped);
    }

    let half_window = capped * jitter_factor / 2.0;
    let jitter = rand::rng().random_range(-half_window..=half_window);

    Duration::from_secs_f64((capped + jitter).max(0.0))
}

struct RunningTask {
    task: Arc<dyn ScheduledTask>,
    handle: tokio::task::JoinHandle<()>,
}

/// Owns the task loops.
pub struct Scheduler {
    graceful_timeout: Duration,
    cancel: CancellationToken,
    running: Mutex<Vec<RunningTask>>,
}

impl Scheduler {
    pub fn new(graceful_timeout: Duration) -> Self {
        Self {
            graceful_timeout,
            cancel: CancellationToken::new(),
            running: Mutex::new(Vec::new()),
        }
    }

    /// Register a task and spawn its loop.
    pub async fn add_task(&self, task: Arc<dyn ScheduledTask>) {
        if !task.enabled() {
            log::debug!("Task '{}' is disabled, not scheduling", task.name());
            return;
        }

        log::info!(
            "Scheduling task '{}' every {:?}",
            task.name(),
            task.interval()
        );

        let cancel = self.cancel.clone();
        let loop_task = task.clone();
        let handle = tokio::spawn(async move {
            run_task_loop(loop_task, cancel).await;
        });

        self.running.lock().await.push(RunningTask { task, handle });
    }

    pub async fn task_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Graceful shutdown: cancel sleeps, await running loops up to the
    /// timeout, abort stragglers, then run every task's cleanup.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let mut running = self.running.lock().await;

        for entry in running.iter_mut() {
            let waited = tokio::time::timeout(self.graceful_timeout, &mut entry.handle).await;

            match waited {
                Ok(_) => {}
                Err(_) => {
                    log::warn!(
                        "Task '{}' did not stop within {:?}, cancelling",
                        entry.task.name(),
                        self.graceful_timeout
                    );
                    entry.handle.abort();
                }
            }
        }

        for entry in running.drain(..) {
            entry.task.cleanup().await;
        }
    }
}

async fn run_task_loop(task: Arc<dyn ScheduledTask>, cancel: CancellationToken) {
    if let Err(e) = task.setup().await {
        log::error!("Task '{}' setup failed: {e}", task.name());
        return;
    }

    let mut consecutive_failures: u32 = 0;
    let mut first = task.first_run();

    loop {
        if !first {
            let delay = calculate_next_delay(
                task.interval(),
                consecutive_failures,
                task.max_backoff(),
                task.jitter_factor(),
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        first = false;

        if cancel.is_cancelled() || !task.enabled() {
            break;
        }

        match task.run().await {
            Ok(true) => {
                consecutive_failures = 0;
            }
            Ok(false) => {
                consecutive_failures += 1;
                log::warn!(
                    "Task '{}' reported failure ({consecutive_failures} consecutive)",
                    task.name()
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                log::error!(
                    "Task '{}' failed ({consecutive_failures} consecutive): {e}",
                    task.name()
                );
            }
        }
    }
}
