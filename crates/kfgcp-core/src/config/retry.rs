//! Retry and backoff settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff used while waiting for provider operations.
///
/// There is no attempt cap: provider operations can legitimately run for many
/// minutes. Waiting is bounded only by `deadline_secs` or by the caller
/// dropping the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay before the second poll.
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Growth factor applied to the delay after each poll.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Jitter as a fraction of the current delay (0.5 = +/-50%).
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Optional overall deadline per waited operation.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl PollerConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
            randomization_factor: default_randomization_factor(),
            deadline_secs: None,
        }
    }
}

/// Retry budget for stale-etag rejections when writing the access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRetryConfig {
    /// Attempts per write phase, including the first.
    #[serde(default = "default_policy_attempts")]
    pub max_attempts: u32,
}

impl Default for PolicyRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_policy_attempts(),
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_max_interval_ms() -> u64 {
    60_000
}

fn default_randomization_factor() -> f64 {
    0.5
}

fn default_policy_attempts() -> u32 {
    5
}
