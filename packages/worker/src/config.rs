use std::time::Duration;

use common::QueueAppConfig;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::WorkerError;

/// Worker pool configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Identifier recorded on claimed jobs. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Max jobs executing at once. Default: 10.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Idle re-check interval when no enqueue wakes the pool. Default: 500.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-attempt execution limit. Unset means no limit.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Active jobs claimed longer ago than this are treated as crashed. Default: 300.
    #[serde(default = "default_stalled_timeout_secs")]
    pub stalled_timeout_secs: u64,
    /// Default: 30.
    #[serde(default = "default_stalled_check_interval_secs")]
    pub stalled_check_interval_secs: u64,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_concurrency() -> usize {
    10
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_stalled_timeout_secs() -> u64 {
    300
}
fn default_stalled_check_interval_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            job_timeout_secs: None,
            stalled_timeout_secs: default_stalled_timeout_secs(),
            stalled_check_interval_secs: default_stalled_check_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.concurrency == 0 {
            return Err(WorkerError::InvalidConfig(
                "worker.concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.stalled_check_interval_secs == 0 {
            return Err(WorkerError::InvalidConfig(
                "worker poll and stall check intervals must be non-zero".into(),
            ));
        }
        if let Some(timeout) = self.job_timeout_secs
            && self.stalled_timeout_secs <= timeout
        {
            return Err(WorkerError::InvalidConfig(format!(
                "worker.stalled_timeout_secs ({}) must exceed worker.job_timeout_secs ({})",
                self.stalled_timeout_secs, timeout
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn stalled_timeout(&self) -> Duration {
        Duration::from_secs(self.stalled_timeout_secs)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_check_interval_secs)
    }
}

/// Configuration for processes that embed a worker pool.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueAppConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, WorkerError> {
        let config_path =
            std::env::var("JOBQ_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("JOBQ").separator("__"))
            .set_override_option("queue.max_attempts", std::env::var("MAX_ATTEMPTS").ok())?
            .set_override_option(
                "queue.backoff_base_ms",
                std::env::var("BACKOFF_BASE_MS").ok(),
            )?
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.worker.validate()?;
        Ok(config)
    }
}
