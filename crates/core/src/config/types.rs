use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::adapter::Capability;
use crate::campaign::CoordinatorConfig;
use crate::engine::EngineConfig;
use crate::governor::GovernorConfig;
use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub campaign: CoordinatorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("leadflow.db")
}

/// Remote agent service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentsConfig {
    /// Base URL of the agent service (e.g., "http://localhost:8000")
    #[serde(default = "default_agents_url")]
    pub base_url: String,
    /// Bearer token sent with every agent request
    #[serde(default)]
    pub api_key: Option<String>,
    /// HTTP request timeout in milliseconds
    #[serde(default = "default_agents_timeout")]
    pub timeout_ms: u64,
    /// Governor service name per capability.
    /// Capabilities not listed use their own name as the service.
    #[serde(default)]
    pub services: HashMap<Capability, String>,
}

impl AgentsConfig {
    /// Governor service a capability is billed against.
    pub fn service_for(&self, capability: Capability) -> String {
        self.services
            .get(&capability)
            .cloned()
            .unwrap_or_else(|| capability.as_str().to_string())
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            base_url: default_agents_url(),
            api_key: None,
            timeout_ms: default_agents_timeout(),
            services: HashMap::new(),
        }
    }
}

fn default_agents_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_agents_timeout() -> u64 {
    90_000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub governor: GovernorConfig,
    pub scheduler: SchedulerConfig,
    pub campaign: CoordinatorConfig,
    pub agents: SanitizedAgentsConfig,
}

/// Sanitized agents config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAgentsConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub timeout_ms: u64,
    pub services: HashMap<Capability, String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            governor: config.governor.clone(),
            scheduler: config.scheduler.clone(),
            campaign: config.campaign.clone(),
            agents: SanitizedAgentsConfig {
                base_url: config.agents.base_url.clone(),
                api_key_configured: config
                    .agents
                    .api_key
                    .as_ref()
                    .is_some_and(|key| !key.is_empty()),
                timeout_ms: config.agents.timeout_ms,
                services: config.agents.services.clone(),
            },
        }
    }
}
