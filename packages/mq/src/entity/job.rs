use common::{BackoffPolicy, FailureNotification, JobStatus, RetryAttempt};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A unit of asynchronous work tracked by the queue.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    /// Monotonic row id; breaks ties between jobs ready at the same instant.
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Opaque identifier handed back to producers.
    #[sea_orm(unique)]
    pub job_id: String,

    #[sea_orm(indexed)]
    pub queue_name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    /// One of `waiting`, `active`, `completed`, `failed`, `removed`.
    #[sea_orm(indexed)]
    pub status: String,

    pub attempts_made: i32,

    pub max_attempts: i32,

    /// Serialized [`BackoffPolicy`].
    #[sea_orm(column_type = "JsonBinary")]
    pub backoff: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub last_error: Option<String>,

    /// Failed attempts as JSON array: [{attempt, error, timestamp}]
    #[sea_orm(column_type = "JsonBinary")]
    pub retry_history: serde_json::Value,

    /// Earliest time the job may be claimed.
    #[sea_orm(indexed)]
    pub run_at: DateTimeUtc,

    pub claimed_at: Option<DateTimeUtc>,

    pub claimed_by: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,

    pub finished_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_status(&self, status: JobStatus) -> bool {
        self.status == status.as_str()
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        serde_json::from_value(self.backoff.clone()).unwrap_or_default()
    }

    pub fn retry_attempts(&self) -> Vec<RetryAttempt> {
        serde_json::from_value(self.retry_history.clone()).unwrap_or_default()
    }

    pub fn failure_notification(&self) -> FailureNotification {
        FailureNotification {
            job_id: self.job_id.clone(),
            queue_name: self.queue_name.clone(),
            attempts_made: self.attempts_made.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            last_error: self.last_error.clone().unwrap_or_default(),
        }
    }
}
