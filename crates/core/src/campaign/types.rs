//! Campaign types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lead::{Lead, LeadError, LeadProfile, Stage};

use super::window::SendWindow;

/// Errors from campaign storage and coordination.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Campaign not found: {0}")]
    NotFound(String),

    #[error("Invalid campaign configuration: {0}")]
    InvalidConfig(String),

    #[error("Timed out waiting for campaign {0}")]
    Timeout(String),

    #[error("Lead store error: {0}")]
    Lead(#[from] LeadError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for CampaignError {
    fn from(e: rusqlite::Error) -> Self {
        CampaignError::Database(e.to_string())
    }
}

/// What a reply does to the rest of a lead's follow-up sequence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Cancel every pending action and sync the outcome to the CRM.
    #[default]
    StopSequence,
    /// Cancel only the next follow-up and continue with the one after.
    SkipNext,
}

impl fmt::Display for ReplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyPolicy::StopSequence => write!(f, "stop_sequence"),
            ReplyPolicy::SkipNext => write!(f, "skip_next"),
        }
    }
}

/// Ideal customer profile used by qualification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IcpCriteria {
    #[serde(default)]
    pub target_titles: Vec<String>,
    #[serde(default)]
    pub target_industries: Vec<String>,
    #[serde(default)]
    pub target_locations: Vec<String>,
    /// Minimum qualification score to accept a lead.
    #[serde(default = "default_min_score")]
    pub min_score: u8,
}

fn default_min_score() -> u8 {
    60
}

/// Shape of the generated outreach sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequenceTemplate {
    /// Email tone (professional, casual, formal).
    #[serde(default = "default_tone")]
    pub tone: String,
    /// Follow-ups after the introduction email.
    #[serde(default = "default_num_followups")]
    pub num_followups: u32,
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_num_followups() -> u32 {
    2
}

impl Default for SequenceTemplate {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            num_followups: default_num_followups(),
        }
    }
}

/// Configuration shared by every lead of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignConfig {
    /// Objective of the outreach, passed to email generation.
    #[serde(default = "default_goal")]
    pub goal: String,
    #[serde(default)]
    pub icp: IcpCriteria,
    #[serde(default)]
    pub sequence: SequenceTemplate,
    /// Delay before each follow-up, in seconds, relative to the previous email.
    ///
    /// The number of entries bounds how many follow-ups are sent.
    #[serde(default = "default_followup_cadence")]
    pub followup_cadence_secs: Vec<u64>,
    #[serde(default)]
    pub reply_policy: ReplyPolicy,
    /// Fetch company intel before email generation when a company URL is known.
    #[serde(default = "default_company_intel")]
    pub company_intel: bool,
    /// Local hours in which emails go out. Unset means send immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_window: Option<SendWindow>,
}

fn default_goal() -> String {
    "Book an introductory call".to_string()
}

fn default_followup_cadence() -> Vec<u64> {
    // 3 days, then 6 days after the first follow-up
    vec![3 * 86_400, 6 * 86_400]
}

fn default_company_intel() -> bool {
    true
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            goal: default_goal(),
            icp: IcpCriteria::default(),
            sequence: SequenceTemplate::default(),
            followup_cadence_secs: default_followup_cadence(),
            reply_policy: ReplyPolicy::default(),
            company_intel: default_company_intel(),
            send_window: None,
        }
    }
}

impl CampaignConfig {
    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), CampaignError> {
        if self.goal.trim().is_empty() {
            return Err(CampaignError::InvalidConfig(
                "goal must not be empty".to_string(),
            ));
        }
        if self.icp.min_score > 100 {
            return Err(CampaignError::InvalidConfig(
                "icp.min_score must be within 0..=100".to_string(),
            ));
        }
        if self.followup_cadence_secs.iter().any(|&d| d == 0) {
            return Err(CampaignError::InvalidConfig(
                "followup_cadence_secs entries must be greater than 0".to_string(),
            ));
        }
        if let Some(ref window) = self.send_window {
            window.validate()?;
        }
        if self.followup_cadence_secs.len() != self.sequence.num_followups as usize {
            return Err(CampaignError::InvalidConfig(format!(
                "sequence.num_followups is {} but followup_cadence_secs has {} entries",
                self.sequence.num_followups,
                self.followup_cadence_secs.len()
            )));
        }
        Ok(())
    }

    /// Delay before the given follow-up slot (0 is the first follow-up).
    pub fn followup_delay(&self, slot: usize) -> Option<std::time::Duration> {
        self.followup_cadence_secs
            .get(slot)
            .map(|&secs| std::time::Duration::from_secs(secs))
    }

    /// Delay before a lead's follow-up slot.
    ///
    /// The generated draft's own delay takes precedence over the cadence when
    /// set. The cadence still decides whether the slot exists at all.
    pub fn followup_delay_for(&self, lead: &Lead, slot: usize) -> Option<std::time::Duration> {
        let cadence = self.followup_delay(slot)?;
        match lead.followup_draft(slot) {
            Some(draft) if draft.delay_secs > 0 => {
                Some(std::time::Duration::from_secs(draft.delay_secs))
            }
            _ => Some(cadence),
        }
    }

    /// First instant at or after `at` when an email to `profile` may go out.
    pub fn send_time(&self, at: DateTime<Utc>, profile: &LeadProfile) -> DateTime<Utc> {
        match self.send_window {
            Some(ref window) => window.next_slot(at, profile.location.as_deref()),
            None => at,
        }
    }
}

/// A named batch of leads processed under one configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// Member leads in submission order.
    pub lead_ids: Vec<String>,
    pub config: CampaignConfig,
    pub created_at: DateTime<Utc>,
}

/// Request to start a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    /// Overrides the configured default campaign settings when present.
    #[serde(default)]
    pub config: Option<CampaignConfig>,
    pub leads: Vec<LeadProfile>,
}

/// Aggregate progress of a campaign, recomputed from its leads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub total: u64,
    /// Leads per stage; stages without leads are omitted.
    pub counts: BTreeMap<Stage, u64>,
    /// Leads in a terminal stage.
    pub terminal: u64,
    pub complete: bool,
    pub computed_at: DateTime<Utc>,
}

impl CampaignProgress {
    /// Build progress from per-stage counts.
    pub fn from_counts(campaign_id: impl Into<String>, counts: BTreeMap<Stage, u64>) -> Self {
        let total: u64 = counts.values().sum();
        let terminal: u64 = counts
            .iter()
            .filter(|(stage, _)| stage.is_terminal())
            .map(|(_, n)| *n)
            .sum();
        Self {
            campaign_id: campaign_id.into(),
            total,
            counts,
            terminal,
            complete: total == terminal,
            computed_at: Utc::now(),
        }
    }

    /// Leads that ended in `failed`.
    pub fn failed(&self) -> u64 {
        self.counts.get(&Stage::Failed).copied().unwrap_or(0)
    }
}
