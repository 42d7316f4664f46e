//! Testing utilities and mock implementations.
//!
//! This module provides a scriptable mock agent adapter and helpers to wire
//! an engine on in-memory stores, allowing end-to-end tests without any
//! agent service.
//!
//! # Example
//!
//! ```rust,ignore
//! use leadflow_core::testing::{fixtures, MockAdapter};
//!
//! let adapter = Arc::new(MockAdapter::new());
//! let harness = fixtures::harness(adapter.clone(), EngineConfig::default());
//!
//! let lead = harness.create_lead(fixtures::profile("Ada Lovelace"));
//! harness.engine.drive(&lead.id, Stage::New).await?;
//! ```

mod mock_adapter;

pub use mock_adapter::{MockAdapter, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::adapter::{AdapterRegistry, AgentAdapter};
    use crate::campaign::{CampaignStore, SqliteCampaignStore};
    use crate::engine::{EngineConfig, OrchestrationEngine, RetryConfig};
    use crate::governor::Governor;
    use crate::intel::{IntelCache, SqliteIntelCache};
    use crate::lead::{CreateLeadRequest, Lead, LeadProfile, LeadStore, SqliteLeadStore};
    use crate::scheduler::{ActionStore, FollowupScheduler, SchedulerConfig, SqliteActionStore};

    /// Create a lead profile with reasonable defaults.
    pub fn profile(name: &str) -> LeadProfile {
        let slug = name.to_lowercase().replace(' ', ".");
        let mut profile = LeadProfile::new(name)
            .with_email(format!("{}@example.com", slug))
            .with_company("Example Corp", Some("https://example.com".to_string()))
            .with_linkedin(format!("https://linkedin.com/in/{}", slug.replace('.', "-")));
        profile.title = Some("VP Sales".to_string());
        profile.industry = Some("Software".to_string());
        profile
    }

    /// Retry policy with no backoff, for tests that fire retries immediately.
    pub fn immediate_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Everything an engine needs, on in-memory stores.
    pub struct Harness {
        pub leads: Arc<dyn LeadStore>,
        pub campaigns: Arc<dyn CampaignStore>,
        pub actions: Arc<dyn ActionStore>,
        pub scheduler: Arc<FollowupScheduler>,
        pub governor: Arc<Governor>,
        pub intel_cache: Arc<dyn IntelCache>,
        pub engine: Arc<OrchestrationEngine>,
    }

    impl Harness {
        /// Create a standalone lead.
        pub fn create_lead(&self, profile: LeadProfile) -> Lead {
            self.leads
                .create(CreateLeadRequest::new(profile))
                .expect("create lead")
        }
    }

    /// Wire an engine with one adapter serving every capability.
    pub fn harness(adapter: Arc<dyn AgentAdapter>, config: EngineConfig) -> Harness {
        harness_with(
            AdapterRegistry::builder().with_all(adapter).build(),
            config,
            Governor::unlimited(),
        )
    }

    /// Wire an engine with an explicit registry and governor.
    pub fn harness_with(
        adapters: AdapterRegistry,
        config: EngineConfig,
        governor: Governor,
    ) -> Harness {
        let leads: Arc<dyn LeadStore> =
            Arc::new(SqliteLeadStore::in_memory().expect("in-memory lead store"));
        let campaigns: Arc<dyn CampaignStore> =
            Arc::new(SqliteCampaignStore::in_memory().expect("in-memory campaign store"));
        let actions: Arc<dyn ActionStore> =
            Arc::new(SqliteActionStore::in_memory().expect("in-memory action store"));
        let scheduler = Arc::new(FollowupScheduler::new(
            SchedulerConfig::default(),
            Arc::clone(&actions),
        ));
        let governor = Arc::new(governor);
        let intel_cache: Arc<dyn IntelCache> =
            Arc::new(SqliteIntelCache::in_memory().expect("in-memory intel cache"));
        let engine = Arc::new(
            OrchestrationEngine::new(
                config,
                Arc::clone(&leads),
                Arc::clone(&campaigns),
                Arc::clone(&scheduler),
                Arc::clone(&governor),
                adapters,
            )
            .with_intel_cache(Arc::clone(&intel_cache)),
        );

        Harness {
            leads,
            campaigns,
            actions,
            scheduler,
            governor,
            intel_cache,
            engine,
        }
    }
}
