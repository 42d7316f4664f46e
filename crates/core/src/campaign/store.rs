//! Campaign storage trait.

use super::{Campaign, CampaignConfig, CampaignError};

/// Durable record of campaigns and their member leads.
///
/// Stage counts are never stored here; they are derived from the leads.
pub trait CampaignStore: Send + Sync {
    /// Create an empty campaign.
    fn create(&self, name: &str, config: &CampaignConfig) -> Result<Campaign, CampaignError>;

    /// Append leads to a campaign, keeping submission order.
    fn add_leads(&self, campaign_id: &str, lead_ids: &[String]) -> Result<(), CampaignError>;

    /// Get a campaign by ID.
    fn get(&self, id: &str) -> Result<Option<Campaign>, CampaignError>;

    /// List campaigns, newest first.
    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>, CampaignError>;

    /// Delete a campaign and its membership. Returns false if it did not exist.
    fn delete(&self, id: &str) -> Result<bool, CampaignError>;
}
