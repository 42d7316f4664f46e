//! Campaign coordinator configuration.

use serde::{Deserialize, Serialize};

use super::CampaignConfig;

/// Configuration for the campaign coordinator (`[campaign]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Campaign settings used when a request does not carry its own.
    #[serde(default)]
    pub defaults: CampaignConfig,

    /// Leads driven concurrently across all campaigns.
    #[serde(default = "default_max_concurrent_leads")]
    pub max_concurrent_leads: usize,

    /// How long a computed progress snapshot may be served again (milliseconds).
    /// 0 disables the cache.
    #[serde(default = "default_status_cache_ttl")]
    pub status_cache_ttl_ms: u64,

    /// Poll interval of `wait_for_completion` (milliseconds).
    #[serde(default = "default_completion_poll")]
    pub completion_poll_ms: u64,
}

fn default_max_concurrent_leads() -> usize {
    16
}

fn default_status_cache_ttl() -> u64 {
    1000
}

fn default_completion_poll() -> u64 {
    250
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            defaults: CampaignConfig::default(),
            max_concurrent_leads: default_max_concurrent_leads(),
            status_cache_ttl_ms: default_status_cache_ttl(),
            completion_poll_ms: default_completion_poll(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::ReplyPolicy;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_concurrent_leads, 16);
        assert_eq!(config.status_cache_ttl_ms, 1000);
        assert_eq!(config.defaults.reply_policy, ReplyPolicy::StopSequence);
    }

    #[test]
    fn test_deserialize_with_defaults_table() {
        let toml = r#"
            max_concurrent_leads = 4

            [defaults]
            goal = "Book a product demo"
            reply_policy = "skip_next"
            followup_cadence_secs = [3600]
            sequence = { num_followups = 1 }
        "#;
        let config: CoordinatorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent_leads, 4);
        assert_eq!(config.status_cache_ttl_ms, 1000);
        assert_eq!(config.defaults.goal, "Book a product demo");
        assert_eq!(config.defaults.reply_policy, ReplyPolicy::SkipNext);
        assert_eq!(config.defaults.followup_cadence_secs, vec![3600]);
        assert!(config.defaults.validate().is_ok());
    }
}
