use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single failed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Error message from the failed attempt.
    pub error: String,
    /// When this attempt failed.
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u32, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    #[default]
    Exponential,
}

impl BackoffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

impl std::fmt::Display for BackoffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackoffType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            _ => Err(format!(
                "Invalid backoff type '{}'. Must be 'fixed' or 'exponential'",
                s
            )),
        }
    }
}

/// Maps a retry number to the delay before that retry runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub backoff_type: BackoffType,
    pub base_delay_ms: u64,
    /// Upper bound on any single delay. Unbounded when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Add 0-25% random jitter on top of the computed delay.
    #[serde(default)]
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            backoff_type: BackoffType::Exponential,
            base_delay_ms,
            max_delay_ms: None,
            jitter: false,
        }
    }

    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            backoff_type: BackoffType::Fixed,
            base_delay_ms,
            max_delay_ms: None,
            jitter: false,
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the `retry`-th retry (1-based).
    ///
    /// Exponential: `base * 2^(retry-1)`. Fixed: `base`. Retry 0 means the
    /// first execution and never waits.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay_ms = match self.backoff_type {
            BackoffType::Fixed => self.base_delay_ms,
            BackoffType::Exponential => {
                let exp_factor = 2u64.saturating_pow(retry - 1);
                self.base_delay_ms.saturating_mul(exp_factor)
            }
        };

        let jitter = if self.jitter && delay_ms > 0 {
            rand::rng().random_range(0..=delay_ms / 4)
        } else {
            0
        };

        let total = delay_ms.saturating_add(jitter);
        let total = match self.max_delay_ms {
            Some(max) => total.min(max),
            None => total,
        };
        Duration::from_millis(total)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1000)
    }
}
