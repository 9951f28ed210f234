//! Poller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry and deadline budget for a status poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between the end of one poll and the start of the next (milliseconds).
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Failed polls in a row tolerated before the poller gives up.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Overall budget for the job, measured from `start()` (seconds).
    #[serde(default = "default_max_total_duration")]
    pub max_total_duration_secs: u64,
}

fn default_interval() -> u64 {
    2000 // 2 seconds
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_max_total_duration() -> u64 {
    3600 // 1 hour
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_total_duration_secs: default_max_total_duration(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_total_duration(&self) -> Duration {
        Duration::from_secs(self.max_total_duration_secs)
    }
}
