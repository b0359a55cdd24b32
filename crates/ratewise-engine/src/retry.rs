//! Background retry of failed structured writes.
//!
//! The worker claims due tasks from the durable [`RetryQueue`], replays the
//! stored write against the rate store and either completes the task,
//! reschedules it with exponential backoff, or dead-letters it once the
//! attempt budget is spent. Writes are idempotent per document, so a task
//! replayed after a crash cannot duplicate routes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use ratewise_core::config::IngestionConfig;
use ratewise_core::error::RatewiseError;
use ratewise_storage::{RateStore, RetryQueue, RetryTask};

/// Exponential backoff with a cap and an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay before the next attempt after `attempts` failures.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Wall-clock time of the next attempt after `attempts` failures.
    pub fn next_attempt_at(&self, attempts: u32) -> chrono::DateTime<Utc> {
        let millis = i64::try_from(self.delay(attempts).as_millis()).unwrap_or(i64::MAX);
        Utc::now() + chrono::Duration::milliseconds(millis)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// Outcome counts of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPassReport {
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead: usize,
}

impl RetryPassReport {
    pub fn processed(&self) -> usize {
        self.succeeded + self.rescheduled + self.dead
    }
}

pub struct RetryWorker {
    queue: Arc<RetryQueue>,
    store: Arc<dyn RateStore>,
    backoff: BackoffPolicy,
    poll_interval: Duration,
    batch_size: usize,
    shutdown: Arc<Notify>,
}

impl RetryWorker {
    pub fn new(queue: Arc<RetryQueue>, store: Arc<dyn RateStore>, config: &IngestionConfig) -> Self {
        Self {
            queue,
            store,
            backoff: BackoffPolicy::from_config(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size.max(1),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops [`run`](Self::run) when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Poll until shut down. A failed pass is logged and retried on the next tick.
    pub async fn run(self) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_attempts = self.backoff.max_attempts,
            "Retry worker started"
        );
        loop {
            match self.process_due().await {
                Ok(report) if report.processed() > 0 => {
                    info!(
                        succeeded = report.succeeded,
                        rescheduled = report.rescheduled,
                        dead = report.dead,
                        "Retry pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Retry pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.notified() => {
                    info!("Retry worker stopped");
                    break;
                }
            }
        }
    }

    /// Run every task that is due now, up to one batch.
    pub async fn process_due(&self) -> Result<RetryPassReport, RatewiseError> {
        let queue = Arc::clone(&self.queue);
        let batch_size = self.batch_size;
        let tasks = run_blocking(move || queue.due(Utc::now(), batch_size)).await?;

        let mut report = RetryPassReport::default();
        for task in tasks {
            self.attempt(task, &mut report).await?;
        }
        Ok(report)
    }

    async fn attempt(&self, task: RetryTask, report: &mut RetryPassReport) -> Result<(), RatewiseError> {
        let task_id = task.task_id;
        let document_id = task.document_id;
        let write = task.write;

        match self.store.write_sheet(write.document, write.routes).await {
            Ok(outcome) => {
                let queue = Arc::clone(&self.queue);
                run_blocking(move || queue.complete(task_id)).await?;
                info!(%document_id, %task_id, attempts = task.attempts + 1, ?outcome, "Retried structured write succeeded");
                report.succeeded += 1;
            }
            Err(e) => {
                let attempts = task.attempts + 1;
                let message = e.to_string();
                let queue = Arc::clone(&self.queue);
                if self.backoff.is_exhausted(attempts) {
                    run_blocking(move || queue.mark_dead(task_id, &message)).await?;
                    error!(
                        %document_id,
                        %task_id,
                        attempts,
                        error = %e,
                        "Structured write dead-lettered, needs manual reconciliation"
                    );
                    report.dead += 1;
                } else {
                    let next_attempt_at = self.backoff.next_attempt_at(attempts);
                    run_blocking(move || queue.record_failure(task_id, &message, next_attempt_at)).await?;
                    warn!(%document_id, %task_id, attempts, %next_attempt_at, error = %e, "Structured write retry failed");
                    report.rescheduled += 1;
                }
            }
        }
        Ok(())
    }
}

/// Run blocking queue work off the async executor.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, RatewiseError>
where
    F: FnOnce() -> Result<T, RatewiseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RatewiseError::Storage(format!("Blocking task failed: {}", e)))?
}
