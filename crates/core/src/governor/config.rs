//! Governor configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Behavior when no budget slot is free.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GovernorMode {
    /// Wait for a slot, up to `max_wait_ms`.
    #[default]
    Blocking,
    /// Wait only while the wait queue has room; fail fast otherwise.
    NonBlocking,
}

/// Limits for one external service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceBudget {
    /// Maximum concurrent in-flight calls (0 = unlimited).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Token bucket rate (0 = unlimited).
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_requests_per_minute() -> u32 {
    60
}

impl Default for ServiceBudget {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl ServiceBudget {
    /// A budget with no limits at all.
    pub fn unlimited() -> Self {
        Self {
            max_concurrent: 0,
            requests_per_minute: 0,
        }
    }
}

/// Configuration for the rate/budget governor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernorConfig {
    #[serde(default)]
    pub mode: GovernorMode,

    /// Longest time an acquire may wait (milliseconds).
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,

    /// Waiters allowed per service in non-blocking mode.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Budget for services without their own entry.
    #[serde(default)]
    pub default_budget: ServiceBudget,

    /// Per-service budgets keyed by service name.
    #[serde(default)]
    pub services: HashMap<String, ServiceBudget>,
}

fn default_max_wait() -> u64 {
    30_000 // 30 seconds
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            mode: GovernorMode::default(),
            max_wait_ms: default_max_wait(),
            queue_capacity: default_queue_capacity(),
            default_budget: ServiceBudget::default(),
            services: HashMap::new(),
        }
    }
}

impl GovernorConfig {
    /// Budget that applies to `service`.
    pub fn budget_for(&self, service: &str) -> &ServiceBudget {
        self.services.get(service).unwrap_or(&self.default_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GovernorConfig::default();
        assert_eq!(config.mode, GovernorMode::Blocking);
        assert_eq!(config.max_wait_ms, 30_000);
        assert_eq!(config.default_budget.max_concurrent, 4);
        assert_eq!(config.budget_for("anything").requests_per_minute, 60);
    }

    #[test]
    fn test_deserialize_services() {
        let toml = r#"
            mode = "non_blocking"
            queue_capacity = 8

            [services.openai]
            max_concurrent = 2
            requests_per_minute = 30

            [services.smtp]
            requests_per_minute = 0
        "#;
        let config: GovernorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.mode, GovernorMode::NonBlocking);
        assert_eq!(config.budget_for("openai").max_concurrent, 2);
        assert_eq!(config.budget_for("smtp").requests_per_minute, 0);
        assert_eq!(config.budget_for("smtp").max_concurrent, 4);
    }
}
