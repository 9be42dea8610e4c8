use chrono::Utc;
use common::{DlqErrorCode, FailureNotification, JobStatus};
use mq::{Job, JobQueue, MqError};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dlq::{DlqService, NewDeadLetter, sweep_once};
use crate::metrics::DlqMetrics;

/// Upper bound on failed jobs promoted by a catch-up sweep after lagging.
const CATCH_UP_BATCH: u64 = 1000;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Durable store error: {0}")]
    Store(#[from] DbErr),

    #[error("Queue error: {0}")]
    Queue(#[from] MqError),
}

/// What a single promotion attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// A new dead letter row was written.
    Promoted { item_id: i32 },
    /// The row already existed (duplicate notification or an earlier
    /// promotion interrupted before the job was archived).
    AlreadyPromoted { item_id: i32 },
    /// The job still has attempts left or is not in `failed`.
    NotExhausted,
    /// The job no longer exists or was already removed.
    Gone,
}

/// Turns exhausted jobs into dead letter items, exactly once per job.
#[derive(Clone)]
pub struct FailureWatcher {
    db: DatabaseConnection,
    queue: JobQueue,
    metrics: DlqMetrics,
}

impl FailureWatcher {
    pub fn new(db: DatabaseConnection, queue: JobQueue, metrics: DlqMetrics) -> Self {
        Self { db, queue, metrics }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Promote the job named by `notification` if it is exhausted.
    ///
    /// The dead letter row is written and counted before the job is archived,
    /// so a crash or store error in between leaves a `failed` job that the
    /// next sweep archives without counting it again.
    #[instrument(skip(self, notification), fields(job_id = %notification.job_id, queue = %notification.queue_name))]
    pub async fn promote(
        &self,
        notification: &FailureNotification,
    ) -> Result<PromotionOutcome, WatcherError> {
        let Some(job) = self.queue.get_job(&notification.job_id).await? else {
            debug!("Job no longer exists, nothing to promote");
            return Ok(PromotionOutcome::Gone);
        };

        if job.is_status(JobStatus::Removed) {
            debug!("Job already removed, nothing to promote");
            return Ok(PromotionOutcome::Gone);
        }

        if !job.is_status(JobStatus::Failed) || !job.is_exhausted() {
            debug!(
                status = %job.status,
                attempts_made = job.attempts_made,
                max_attempts = job.max_attempts,
                "Job not exhausted, leaving it to the queue"
            );
            return Ok(PromotionOutcome::NotExhausted);
        }

        let outcome = DlqService::new(&self.db)
            .insert_if_absent(dead_letter_from(&job))
            .await?;
        let item_id = outcome.row.id;

        if !outcome.inserted {
            info!(item_id, "Job already in dead letter queue");
            if !self.queue.remove(&job.job_id).await? {
                warn!(item_id, "Job changed state before it could be archived");
            }
            return Ok(PromotionOutcome::AlreadyPromoted { item_id });
        }

        // Counted as soon as the row exists; a later duplicate hit never counts.
        self.metrics.record_promotion(&job.queue_name);
        if let Err(e) = self.refresh_gauges().await {
            warn!(error = %e, "Failed to refresh DLQ gauges after promotion");
        }

        warn!(
            item_id,
            attempts = job.attempts_made,
            error = job.last_error.as_deref().unwrap_or(""),
            "Job moved to dead letter queue"
        );

        match self.queue.remove(&job.job_id).await {
            Ok(true) => {}
            Ok(false) => warn!(item_id, "Job changed state before it could be archived"),
            Err(e) => error!(
                item_id,
                error = %e,
                "Failed to archive promoted job, leaving it failed for the next sweep"
            ),
        }

        Ok(PromotionOutcome::Promoted { item_id })
    }

    /// Re-count the durable store into the size gauges.
    pub async fn refresh_gauges(&self) -> Result<(), DbErr> {
        let dlq = DlqService::new(&self.db);
        let total = dlq.count(None).await?;
        let pending = dlq.count_pending(None).await?;
        self.metrics.set_size(total);
        self.metrics.set_pending_size(pending);
        Ok(())
    }

    /// Subscribe to failure notifications and process them until `shutdown`.
    ///
    /// Subscribes before returning, so no notification emitted after this call
    /// is missed.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let events = self.queue.subscribe();
        tokio::spawn(self.run(events, shutdown))
    }

    async fn run(self, mut events: Receiver<FailureNotification>, shutdown: CancellationToken) {
        info!("Starting failure watcher");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => received,
            };

            match received {
                Ok(notification) => {
                    if !notification.is_exhausted() {
                        continue;
                    }
                    // Distinct jobs are promoted independently; the unique
                    // index keeps duplicates for one job safe.
                    let watcher = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = watcher.promote(&notification).await {
                            error!(
                                job_id = %notification.job_id,
                                queue = %notification.queue_name,
                                error = %e,
                                "Failed to promote job, leaving it failed for the next sweep"
                            );
                        }
                    });
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Failure watcher lagged, sweeping failed jobs");
                    let watcher = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sweep_once(&watcher, CATCH_UP_BATCH).await {
                            error!(error = %e, "Catch-up sweep failed");
                        }
                    });
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!("Failure watcher stopped");
    }
}

fn dead_letter_from(job: &Job) -> NewDeadLetter {
    let now = Utc::now();
    let metadata = serde_json::json!({
        "error_code": DlqErrorCode::MaxRetriesExceeded.as_str(),
        "max_attempts": job.max_attempts,
        "backoff": job.backoff,
        "retry_history": job.retry_history,
        "enqueued_at": job.created_at,
        "promoted_at": now,
    });

    NewDeadLetter {
        queue_name: job.queue_name.clone(),
        job_id: job.job_id.clone(),
        payload: job.payload.clone(),
        attempts: job.attempts_made,
        last_error: job.last_error.clone().unwrap_or_default(),
        metadata,
        failed_at: job.finished_at.unwrap_or(now),
    }
}
