use serde::Deserialize;

use crate::retry::{BackoffPolicy, BackoffType};

/// Queue defaults applied when a producer leaves an option unset.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueAppConfig {
    /// Attempt budget per job. Default: 5. Overridden by `MAX_ATTEMPTS`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Default: exponential.
    #[serde(default)]
    pub backoff_type: BackoffType,
    /// Base retry delay. Default: 1000. Overridden by `BACKOFF_BASE_MS`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Optional cap on a single retry delay.
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    /// Add 0-25% jitter to retry delays. Default: false.
    #[serde(default)]
    pub backoff_jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}

impl QueueAppConfig {
    /// Backoff policy assembled from the configured defaults.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            backoff_type: self.backoff_type,
            base_delay_ms: self.backoff_base_ms,
            max_delay_ms: self.backoff_max_ms,
            jitter: self.backoff_jitter,
        }
    }
}

impl Default for QueueAppConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_type: BackoffType::default(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: None,
            backoff_jitter: false,
        }
    }
}

/// Dead letter queue promotion settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DlqConfig {
    /// Interval between promotion sweeps over failed jobs. Default: 30.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Max failed jobs promoted per sweep. Default: 100.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u64,
}

fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_sweep_batch_size() -> u64 {
    100
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}
