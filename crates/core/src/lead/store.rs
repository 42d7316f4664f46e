//! Lead storage trait and types.

use std::collections::BTreeMap;

use thiserror::Error;

use super::{Lead, LeadProfile, Stage, StageAttempt, Transition};

/// Error type for lead store operations.
#[derive(Debug, Error)]
pub enum LeadError {
    #[error("Lead not found: {0}")]
    NotFound(String),

    #[error("Illegal transition for lead {lead_id}: {from} -> {to}")]
    IllegalTransition {
        lead_id: String,
        from: Stage,
        to: Stage,
    },

    #[error("Invalid attempt for lead {lead_id}: {reason}")]
    InvalidAttempt { lead_id: String, reason: String },

    #[error("Attempt {attempt_number} for lead {lead_id} at {stage} was already completed")]
    AttemptConflict {
        lead_id: String,
        stage: Stage,
        attempt_number: u32,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for LeadError {
    fn from(e: rusqlite::Error) -> Self {
        LeadError::Database(e.to_string())
    }
}

/// Request to create a new lead.
#[derive(Debug, Clone)]
pub struct CreateLeadRequest {
    /// Owning campaign, if any.
    pub campaign_id: Option<String>,
    pub profile: LeadProfile,
}

impl CreateLeadRequest {
    pub fn new(profile: LeadProfile) -> Self {
        Self {
            campaign_id: None,
            profile,
        }
    }

    pub fn in_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }
}

/// Filter for querying leads.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub campaign_id: Option<String>,
    pub stage: Option<Stage>,
    /// Only leads whose stage is not terminal.
    pub non_terminal: bool,
    pub limit: i64,
    pub offset: i64,
}

impl LeadFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            campaign_id: None,
            stage: None,
            non_terminal: false,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn non_terminal(mut self) -> Self {
        self.non_terminal = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable record of leads, their history and stage attempts.
///
/// Every mutation of a lead's stage goes through `compare_and_transition`,
/// which is atomic with respect to concurrent callers.
pub trait LeadStore: Send + Sync {
    /// Create a lead in stage `New`.
    fn create(&self, request: CreateLeadRequest) -> Result<Lead, LeadError>;

    /// Get a lead by ID.
    fn get(&self, id: &str) -> Result<Option<Lead>, LeadError>;

    /// List leads matching the filter, oldest first.
    fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadError>;

    /// Number of leads per stage, optionally scoped to one campaign.
    fn count_by_stage(&self, campaign_id: Option<&str>) -> Result<BTreeMap<Stage, u64>, LeadError>;

    /// Attempts recorded for a lead, optionally for one stage, ordered by stage then number.
    fn attempts(&self, lead_id: &str, stage: Option<Stage>)
        -> Result<Vec<StageAttempt>, LeadError>;

    /// Highest attempt number recorded for (lead, stage), 0 if none.
    fn last_attempt_number(&self, lead_id: &str, stage: Stage) -> Result<u32, LeadError>;

    /// Move the lead from `expected` to `transition.to` if it is still at `expected`.
    ///
    /// The attempt, patch and history entry are written in the same transaction.
    /// Returns `Ok(false)` when the lead has moved on (stale caller).
    fn compare_and_transition(
        &self,
        lead_id: &str,
        expected: Stage,
        transition: Transition,
    ) -> Result<bool, LeadError>;

    /// Upsert an attempt without changing the stage, guarded by `expected`.
    ///
    /// Returns `Ok(false)` when the lead is no longer at `expected`.
    fn record_attempt(
        &self,
        lead_id: &str,
        expected: Stage,
        attempt: &StageAttempt,
    ) -> Result<bool, LeadError>;

    /// Reserve the next attempt for (lead, stage) as `Pending`.
    ///
    /// Returns `None` if the lead is not at `stage` or another attempt is
    /// already pending; the caller lost the race.
    fn reserve_attempt(&self, lead_id: &str, stage: Stage)
        -> Result<Option<StageAttempt>, LeadError>;

    /// All pending attempts whose lead is still at the attempt's stage.
    fn pending_attempts(&self) -> Result<Vec<StageAttempt>, LeadError>;

    /// Delete a lead with its history and attempts. Returns false if it did not exist.
    fn delete(&self, id: &str) -> Result<bool, LeadError>;
}
