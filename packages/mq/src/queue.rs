use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{
    EnqueueOptions, FailureNotification, JobStatus, OptionsError, QueueAppConfig, RetryAttempt,
};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tokio::sync::futures::Notified;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entity::job;
use crate::error::MqError;
use crate::store::{JobStore, NewJob};

/// Buffered failure notifications per subscriber before it starts lagging.
const NOTIFICATION_BUFFER: usize = 1024;

/// Retry delays are clamped here so `run_at` always stays a sortable timestamp.
const MAX_SCHEDULE_DAYS: i64 = 365 * 100;

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDecision {
    /// Back to `waiting`; the next attempt runs after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget spent; the job is now `failed`.
    Exhausted,
    /// The job was not active (late, duplicate or lost report). Nothing changed.
    Stale,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub removed: u64,
}

struct QueueInner {
    db: DatabaseConnection,
    defaults: QueueAppConfig,
    events: broadcast::Sender<FailureNotification>,
    ready: Notify,
}

/// Persistent job queue over a SQL table.
///
/// Cheap to clone; all clones share one notification bus and wake-up signal.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(db: DatabaseConnection, defaults: QueueAppConfig) -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            inner: Arc::new(QueueInner {
                db,
                defaults,
                events,
                ready: Notify::new(),
            }),
        }
    }

    pub fn defaults(&self) -> &QueueAppConfig {
        &self.inner.defaults
    }

    /// Add a job and wake idle workers.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, MqError> {
        let job_id = self
            .enqueue_in(&self.inner.db, queue_name, payload, options)
            .await?;
        self.notify_enqueued();
        Ok(job_id)
    }

    /// Add a job through `conn`, which may be an open transaction.
    ///
    /// Workers are not woken; call [`JobQueue::notify_enqueued`] once the
    /// transaction has committed.
    pub async fn enqueue_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        queue_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, MqError> {
        if queue_name.trim().is_empty() {
            return Err(OptionsError::EmptyQueueName.into());
        }
        let options = options.resolve(&self.inner.defaults)?;
        let max_attempts = options.max_attempts;
        let job_id = Uuid::now_v7().to_string();

        JobStore::new(conn)
            .insert(NewJob {
                job_id: job_id.clone(),
                queue_name: queue_name.to_string(),
                payload,
                options,
            })
            .await?;

        info!(job_id = %job_id, queue = %queue_name, max_attempts, "Job enqueued");
        Ok(job_id)
    }

    pub fn notify_enqueued(&self) {
        self.inner.ready.notify_waiters();
    }

    /// Resolves on the next [`notify_enqueued`](Self::notify_enqueued).
    ///
    /// Once [`Notified::enable`] has been called, or the future polled once,
    /// it also sees enqueues that land before it is awaited. Create and enable
    /// it before looking for work so an idle worker cannot miss a wakeup.
    pub fn enqueued(&self) -> Notified<'_> {
        self.inner.ready.notified()
    }

    /// Claim the next ready job for `worker_id`, marking it `active`.
    pub async fn claim_next(
        &self,
        queue_name: &str,
        worker_id: &str,
    ) -> Result<Option<job::Model>, MqError> {
        let store = JobStore::new(&self.inner.db);

        loop {
            let now = Utc::now();
            let Some(candidate) = store.next_ready(queue_name, now).await? else {
                return Ok(None);
            };

            if candidate.is_exhausted() {
                if store.park_exhausted(&candidate, now).await? {
                    warn!(
                        job_id = %candidate.job_id,
                        attempts = candidate.attempts_made,
                        "Waiting job had no attempts left, marked failed"
                    );
                    self.publish_failure(candidate.failure_notification());
                }
                continue;
            }

            if store.claim(&candidate, worker_id, now).await? {
                let claimed = store.find(&candidate.job_id).await?;
                if let Some(ref job) = claimed {
                    debug!(
                        job_id = %job.job_id,
                        queue = %queue_name,
                        attempt = job.attempts_made,
                        worker_id,
                        "Job claimed"
                    );
                }
                return Ok(claimed);
            }

            debug!(job_id = %candidate.job_id, "Lost claim race, trying next job");
        }
    }

    /// Mark attempt `attempt` of an active job as completed.
    ///
    /// Returns false when the job is no longer active or has been claimed
    /// again since, so a late result never closes a newer attempt.
    pub async fn complete(&self, job_id: &str, attempt: u32) -> Result<bool, MqError> {
        let completed = JobStore::new(&self.inner.db)
            .mark_completed(job_id, attempt_column(attempt), Utc::now())
            .await?;

        if completed {
            info!(job_id = %job_id, attempt, "Job completed");
        } else {
            warn!(
                job_id = %job_id,
                attempt,
                "Completion reported for an attempt that is not active"
            );
        }
        Ok(completed)
    }

    /// Record a failure of attempt `attempt` and schedule the retry or mark
    /// the job failed.
    ///
    /// Every recorded failure is broadcast to subscribers, exhausted or not.
    /// A report for any attempt other than the current active one is `Stale`.
    pub async fn fail(
        &self,
        job_id: &str,
        attempt: u32,
        error: &str,
    ) -> Result<FailDecision, MqError> {
        let store = JobStore::new(&self.inner.db);
        let job = store
            .find(job_id)
            .await?
            .ok_or_else(|| MqError::NotFound(job_id.to_string()))?;

        if !job.is_status(JobStatus::Active) {
            debug!(job_id = %job_id, status = %job.status, "Ignoring failure for inactive job");
            return Ok(FailDecision::Stale);
        }
        if job.attempts_made != attempt_column(attempt) {
            debug!(
                job_id = %job_id,
                attempt,
                current = job.attempts_made,
                "Ignoring failure for a superseded attempt"
            );
            return Ok(FailDecision::Stale);
        }

        let mut history = job.retry_attempts();
        history.push(RetryAttempt::new(attempt, error));
        let history = serde_json::to_value(&history)?;
        let now = Utc::now();

        let (applied, decision) = if job.is_exhausted() {
            let applied = store.mark_failed(&job, error, history, now).await?;
            (applied, FailDecision::Exhausted)
        } else {
            let delay = job.backoff_policy().delay(attempt);
            let run_at = schedule_after(now, delay);
            let applied = store.reschedule(&job, run_at, error, history, now).await?;
            (applied, FailDecision::Retry { attempt, delay })
        };

        if !applied {
            debug!(job_id = %job_id, "Job changed state before failure was recorded");
            return Ok(FailDecision::Stale);
        }

        match decision {
            FailDecision::Retry { attempt, delay } => warn!(
                job_id = %job_id,
                queue = %job.queue_name,
                attempt,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Job attempt failed, retry scheduled"
            ),
            _ => warn!(
                job_id = %job_id,
                queue = %job.queue_name,
                attempts = attempt,
                error = %error,
                "Job failed permanently"
            ),
        }

        let notification = FailureNotification {
            job_id: job.job_id.clone(),
            queue_name: job.queue_name.clone(),
            attempts_made: attempt,
            max_attempts: job.max_attempts.max(0) as u32,
            last_error: error.to_string(),
        };
        self.publish_failure(notification);

        Ok(decision)
    }

    /// Re-broadcast a failure notification. Also used to redeliver on sweeps.
    pub fn publish_failure(&self, notification: FailureNotification) {
        if self.inner.events.send(notification).is_err() {
            debug!("No failure subscribers; notification dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FailureNotification> {
        self.inner.events.subscribe()
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<job::Model>, MqError> {
        Ok(JobStore::new(&self.inner.db).find(job_id).await?)
    }

    /// Archive a job so it is neither retried nor reported again.
    ///
    /// Active jobs are left alone; returns whether the job was archived.
    pub async fn remove(&self, job_id: &str) -> Result<bool, MqError> {
        let removed = JobStore::new(&self.inner.db)
            .archive(job_id, Utc::now())
            .await?;
        if removed {
            debug!(job_id = %job_id, "Job removed from queue");
        }
        Ok(removed)
    }

    /// Notifications for jobs sitting in `failed`, oldest first.
    pub async fn exhausted_failures(
        &self,
        limit: u64,
    ) -> Result<Vec<FailureNotification>, MqError> {
        let jobs = JobStore::new(&self.inner.db).list_failed(limit).await?;
        Ok(jobs.iter().map(job::Model::failure_notification).collect())
    }

    /// Active jobs whose claim is older than `stall_timeout`.
    pub async fn stalled_jobs(
        &self,
        queue_name: &str,
        stall_timeout: Duration,
    ) -> Result<Vec<job::Model>, MqError> {
        let threshold = Utc::now() - to_chrono(stall_timeout);
        Ok(JobStore::new(&self.inner.db)
            .list_stalled(queue_name, threshold)
            .await?)
    }

    /// Fail every stalled job in `queue_name` so it follows the normal
    /// retry path. Returns how many were recovered.
    pub async fn recover_stalled(
        &self,
        queue_name: &str,
        stall_timeout: Duration,
    ) -> Result<usize, MqError> {
        let stalled = self.stalled_jobs(queue_name, stall_timeout).await?;
        let mut recovered = 0;

        for job in stalled {
            let reason = format!(
                "Job stalled: no result within {}s of being claimed by {}",
                stall_timeout.as_secs(),
                job.claimed_by.as_deref().unwrap_or("unknown worker")
            );
            let attempt = job.attempts_made.max(0) as u32;
            if self.fail(&job.job_id, attempt, &reason).await? != FailDecision::Stale {
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(queue = %queue_name, recovered, "Recovered stalled jobs");
        }
        Ok(recovered)
    }

    pub async fn counts(&self, queue_name: Option<&str>) -> Result<JobCounts, MqError> {
        let store = JobStore::new(&self.inner.db);
        Ok(JobCounts {
            waiting: store.count(queue_name, JobStatus::Waiting).await?,
            active: store.count(queue_name, JobStatus::Active).await?,
            completed: store.count(queue_name, JobStatus::Completed).await?,
            failed: store.count(queue_name, JobStatus::Failed).await?,
            removed: store.count(queue_name, JobStatus::Removed).await?,
        })
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::days(MAX_SCHEDULE_DAYS))
        .min(chrono::Duration::days(MAX_SCHEDULE_DAYS))
}

fn attempt_column(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

fn schedule_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + to_chrono(delay)
}
