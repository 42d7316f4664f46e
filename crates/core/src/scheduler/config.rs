//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the follow-up scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Longest sleep between due-action checks (milliseconds).
    /// Newly scheduled actions wake the driver earlier.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum actions claimed per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum actions being handled at the same time.
    #[serde(default = "default_max_concurrent_fires")]
    pub max_concurrent_fires: usize,
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent_fires() -> usize {
    8
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            max_concurrent_fires: default_max_concurrent_fires(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let config: SchedulerConfig = toml::from_str("poll_interval_ms = 250").unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_concurrent_fires, 8);
    }
}
