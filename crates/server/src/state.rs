use std::sync::Arc;

use leadflow_core::{
    CampaignCoordinator, Config, FollowupScheduler, Governor, LeadStore, OrchestrationEngine,
    SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    coordinator: Arc<CampaignCoordinator>,
}

impl AppState {
    pub fn new(config: Config, coordinator: Arc<CampaignCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn coordinator(&self) -> &CampaignCoordinator {
        self.coordinator.as_ref()
    }

    pub fn engine(&self) -> &OrchestrationEngine {
        self.coordinator.engine().as_ref()
    }

    pub fn engine_arc(&self) -> Arc<OrchestrationEngine> {
        Arc::clone(self.coordinator.engine())
    }

    pub fn scheduler(&self) -> &FollowupScheduler {
        self.engine().scheduler()
    }

    pub fn governor(&self) -> &Governor {
        self.engine().governor()
    }

    pub fn leads(&self) -> &dyn LeadStore {
        self.engine().leads().as_ref()
    }
}
