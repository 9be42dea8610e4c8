use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::QueueAppConfig;
use crate::retry::{BackoffPolicy, BackoffType};

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Ready (or scheduled) to be claimed.
    Waiting,
    /// Claimed by a worker and executing.
    Active,
    Completed,
    /// Attempt budget exhausted; eligible for DLQ promotion.
    Failed,
    /// Archived; no longer retried or reported.
    Removed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Waiting,
        Self::Active,
        Self::Completed,
        Self::Failed,
        Self::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid job status '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("queue name must not be empty")]
    EmptyQueueName,
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Per-job options supplied by a producer. Unset fields fall back to
/// [`QueueAppConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
    pub backoff_type: Option<BackoffType>,
    pub backoff_base_ms: Option<u64>,
}

impl EnqueueOptions {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn backoff(mut self, backoff_type: BackoffType, base_ms: u64) -> Self {
        self.backoff_type = Some(backoff_type);
        self.backoff_base_ms = Some(base_ms);
        self
    }

    pub fn resolve(&self, defaults: &QueueAppConfig) -> Result<ResolvedOptions, OptionsError> {
        let max_attempts = self.max_attempts.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(OptionsError::ZeroAttempts);
        }

        let mut backoff = defaults.backoff_policy();
        if let Some(backoff_type) = self.backoff_type {
            backoff.backoff_type = backoff_type;
        }
        if let Some(base) = self.backoff_base_ms {
            backoff.base_delay_ms = base;
        }

        Ok(ResolvedOptions {
            max_attempts,
            backoff,
        })
    }
}

/// Options after defaults are applied; what gets stored on the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

/// Emitted by the queue after every failed execution attempt.
///
/// Delivery is at-least-once; consumers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotification {
    pub job_id: String,
    pub queue_name: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_error: String,
}

impl FailureNotification {
    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}
