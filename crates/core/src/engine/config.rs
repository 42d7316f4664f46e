//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lead::Stage;

/// Retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts per visit to a stage, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    30_000 // 30 seconds
}

fn default_max_delay() -> u64 {
    3_600_000 // 1 hour
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retrying after the given failed attempt (1-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(64) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Configuration for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on a single adapter call (milliseconds).
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage overrides of `retry`.
    #[serde(default)]
    pub stage_retry: HashMap<Stage, RetryConfig>,

    /// Delay before qualifying a deferred lead again (seconds).
    #[serde(default = "default_requalify_delay")]
    pub requalify_delay_secs: u64,

    /// Leads driven at the same time during startup recovery.
    #[serde(default = "default_recovery_concurrency")]
    pub recovery_concurrency: usize,

    /// How long company intel is reused for other leads at the same company
    /// (seconds). 0 disables the cache.
    #[serde(default = "default_company_intel_ttl")]
    pub company_intel_ttl_secs: u64,
}

fn default_adapter_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_requalify_delay() -> u64 {
    86_400 // 1 day
}

fn default_recovery_concurrency() -> usize {
    8
}

fn default_company_intel_ttl() -> u64 {
    604_800 // 7 days
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: default_adapter_timeout(),
            retry: RetryConfig::default(),
            stage_retry: HashMap::new(),
            requalify_delay_secs: default_requalify_delay(),
            recovery_concurrency: default_recovery_concurrency(),
            company_intel_ttl_secs: default_company_intel_ttl(),
        }
    }
}

impl EngineConfig {
    /// Retry policy that applies to `stage`.
    pub fn retry_for(&self, stage: Stage) -> &RetryConfig {
        self.stage_retry.get(&stage).unwrap_or(&self.retry)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn requalify_delay(&self) -> Duration {
        Duration::from_secs(self.requalify_delay_secs)
    }

    pub fn company_intel_ttl(&self) -> Duration {
        Duration::from_secs(self.company_intel_ttl_secs)
    }

    /// Sets the adapter timeout.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the default retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.adapter_timeout(), Duration::from_secs(120));
        assert_eq!(config.requalify_delay(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(4000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(8000));
        assert_eq!(retry.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(retry.delay_for(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_stage_override() {
        let toml = r#"
            adapter_timeout_ms = 5000

            [retry]
            max_attempts = 4

            [stage_retry.email_generated]
            max_attempts = 1
        "#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retry_for(Stage::New).max_attempts, 4);
        assert_eq!(config.retry_for(Stage::EmailGenerated).max_attempts, 1);
        assert_eq!(config.retry_for(Stage::EmailGenerated).initial_delay_ms, 30_000);
    }
}
