pub mod adapter;
pub mod campaign;
pub mod config;
pub mod engine;
pub mod governor;
pub mod intel;
pub mod lead;
pub mod metrics;
pub mod scheduler;
pub mod testing;

pub use adapter::{
    AdapterError, AdapterOutput, AdapterRegistry, AdapterRegistryBuilder, AdapterRequest,
    AgentAdapter, Capability, HttpAgentAdapter, IdempotencyKey, IDEMPOTENCY_HEADER,
};
pub use campaign::{
    Campaign, CampaignConfig, CampaignCoordinator, CampaignError, CampaignHandle,
    CampaignProgress, CampaignStore, CoordinatorConfig, IcpCriteria, NewCampaign, ReplyPolicy,
    SendWindow, SequenceTemplate, SqliteCampaignStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AgentsConfig, Config, ConfigError,
    DatabaseConfig, SanitizedConfig, ServerConfig,
};
pub use engine::{EngineConfig, EngineError, OrchestrationEngine, Outcome, RecoveryReport, RetryConfig};
pub use governor::{
    BudgetStatus, DenialReason, Governor, GovernorConfig, GovernorError, GovernorMode, Permit,
    ServiceBudget,
};
pub use intel::{CachedIntel, IntelCache, IntelError, SqliteIntelCache};
pub use lead::{
    CreateLeadRequest, EmailDraft, EnrichedField, ErrorDetail, ErrorKind, HistoryEntry, Lead,
    LeadError, LeadFilter, LeadProfile, LeadStore, Qualification, QualificationVerdict,
    SqliteLeadStore, Stage, StageAttempt,
};
pub use scheduler::{
    ActionKind, ActionStatus, ActionStore, FollowupScheduler, ScheduledAction, SchedulerConfig,
    SchedulerError, SqliteActionStore,
};
