use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mq::{FailDecision, Job, JobQueue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};

/// Executes one job attempt. An `Err` (or a panic) counts as a failed attempt.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        (self)(job).await
    }
}

/// Pulls ready jobs from one queue and runs them with bounded concurrency.
pub struct WorkerPool {
    queue: JobQueue,
    queue_name: String,
    config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new<H: JobHandler>(
        queue: JobQueue,
        queue_name: impl Into<String>,
        config: WorkerConfig,
        handler: H,
    ) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.concurrency));
        Ok(Self {
            queue,
            queue_name: queue_name.into(),
            config,
            handler: Arc::new(handler),
            permits,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Run until `shutdown` fires, then wait for in-flight jobs to finish.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.id,
            queue = %self.queue_name,
            concurrency = self.config.concurrency,
            "Worker pool started"
        );

        let stalled_shutdown = shutdown.child_token();
        let stalled_task = tokio::spawn(recover_stalled_loop(
            self.queue.clone(),
            self.queue_name.clone(),
            self.config.clone(),
            stalled_shutdown.clone(),
        ));

        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    permit.map_err(|_| WorkerError::InvalidConfig("worker semaphore closed".into()))?
                }
            };

            // Registered before the claim so an enqueue racing an empty
            // claim still wakes this loop.
            let enqueued = self.queue.enqueued();
            tokio::pin!(enqueued);
            enqueued.as_mut().enable();

            let job = match self.queue.claim_next(&self.queue_name, &self.config.id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::timeout(self.config.poll_interval(), enqueued) => {}
                    }
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %self.queue_name, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                    continue;
                }
            };

            in_flight.spawn(execute(
                self.queue.clone(),
                Arc::clone(&self.handler),
                self.config.job_timeout(),
                job,
                permit,
            ));
        }

        info!(
            worker_id = %self.config.id,
            in_flight = in_flight.len(),
            "Worker pool stopping, draining in-flight jobs"
        );
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }

        stalled_shutdown.cancel();
        if let Err(e) = stalled_task.await {
            warn!(error = %e, "Stalled job recovery task ended abnormally");
        }

        info!(worker_id = %self.config.id, "Worker pool stopped");
        Ok(())
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Job execution task failed");
    }
}

/// Run one attempt and report the outcome. The permit is held until the
/// outcome is recorded.
async fn execute(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    timeout: Option<Duration>,
    job: Job,
    _permit: OwnedSemaphorePermit,
) {
    let job_id = job.job_id.clone();
    let attempt = job.attempts_made.max(0) as u32;
    debug!(job_id = %job_id, attempt, "Executing job");

    match run_handler(handler, job, timeout).await {
        Ok(()) => {
            if let Err(e) = queue.complete(&job_id, attempt).await {
                error!(job_id = %job_id, error = %e, "Failed to mark job completed");
            }
        }
        Err(reason) => match queue.fail(&job_id, attempt, &reason).await {
            Ok(FailDecision::Stale) => {
                warn!(job_id = %job_id, attempt, "Failure dropped, attempt no longer active");
            }
            Ok(_) => {}
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to record job failure");
            }
        },
    }
}

/// The handler runs on its own task so a panic surfaces as a failed attempt.
async fn run_handler(
    handler: Arc<dyn JobHandler>,
    job: Job,
    timeout: Option<Duration>,
) -> std::result::Result<(), String> {
    let task = tokio::spawn(async move { handler.handle(job).await });
    let abort = task.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(format!("handler timed out after {}s", limit.as_secs()));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(e) if e.is_panic() => Err("handler panicked".to_string()),
        Err(_) => Err("handler cancelled".to_string()),
    }
}

async fn recover_stalled_loop(
    queue: JobQueue,
    queue_name: String,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.stalled_check_interval());
    // first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = queue
            .recover_stalled(&queue_name, config.stalled_timeout())
            .await
        {
            error!(queue = %queue_name, error = %e, "Stalled job recovery failed");
        }
    }
}
