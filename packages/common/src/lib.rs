pub mod config;
pub mod dlq;
pub mod job;
pub mod retry;

pub use config::{DlqConfig, QueueAppConfig};
pub use dlq::DlqErrorCode;
pub use job::{EnqueueOptions, FailureNotification, JobStatus, OptionsError, ResolvedOptions};
pub use retry::{BackoffPolicy, BackoffType, RetryAttempt};
