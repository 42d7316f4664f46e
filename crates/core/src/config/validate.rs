use super::{types::Config, ConfigError};
use crate::engine::RetryConfig;
use crate::governor::GovernorMode;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Retry policies allow at least one attempt and never shrink the backoff
/// - Non-blocking governor has room to queue
/// - Scheduler and coordinator sizes are non-zero
/// - Default campaign settings (goal, cadence)
/// - Agent service URL is an http(s) URL
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Engine validation
    if config.engine.adapter_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "engine.adapter_timeout_ms cannot be 0".to_string(),
        ));
    }
    validate_retry("engine.retry", &config.engine.retry)?;
    for (stage, retry) in &config.engine.stage_retry {
        validate_retry(&format!("engine.stage_retry.{}", stage), retry)?;
    }

    // Governor validation
    if config.governor.mode == GovernorMode::NonBlocking && config.governor.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "governor.queue_capacity must be greater than 0 in non_blocking mode".to_string(),
        ));
    }

    // Scheduler validation
    if config.scheduler.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if config.scheduler.batch_size == 0 || config.scheduler.max_concurrent_fires == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.batch_size and scheduler.max_concurrent_fires must be greater than 0"
                .to_string(),
        ));
    }

    // Campaign validation
    if config.campaign.max_concurrent_leads == 0 {
        return Err(ConfigError::ValidationError(
            "campaign.max_concurrent_leads cannot be 0".to_string(),
        ));
    }
    config
        .campaign
        .defaults
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("campaign.defaults: {}", e)))?;

    // Agents validation
    let url = config.agents.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "agents.base_url must be an http(s) URL, got '{}'",
            config.agents.base_url
        )));
    }

    Ok(())
}

fn validate_retry(section: &str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.max_attempts must be at least 1",
            section
        )));
    }
    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.backoff_multiplier must be at least 1.0",
            section
        )));
    }
    Ok(())
}
