//! Campaigns: named batches of leads processed under one configuration.

mod config;
mod coordinator;
mod sqlite_store;
mod store;
mod types;
mod window;

pub use config::CoordinatorConfig;
pub use coordinator::{CampaignCoordinator, CampaignHandle};
pub use sqlite_store::SqliteCampaignStore;
pub use store::CampaignStore;
pub use types::{
    Campaign, CampaignConfig, CampaignError, CampaignProgress, IcpCriteria, NewCampaign,
    ReplyPolicy, SequenceTemplate,
};
pub use window::{infer_timezone, SendWindow};
