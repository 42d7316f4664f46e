//! Types for the orchestration engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::campaign::CampaignError;
use crate::governor::GovernorError;
use crate::lead::{ErrorDetail, LeadError, Stage};
use crate::scheduler::SchedulerError;

/// Errors surfaced by the engine to its callers.
///
/// Adapter failures during `advance` are not errors: they become retries or
/// a `failed` lead and are reported through [`Outcome`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Lead not found.
    #[error("lead not found: {0}")]
    NotFound(String),

    /// Another advance already moved the lead.
    #[error("stale state for lead {lead_id}: expected {expected}, found {actual}")]
    StaleState {
        lead_id: String,
        expected: Stage,
        actual: Stage,
    },

    /// Operation not allowed in the lead's current stage.
    #[error("cannot {operation} lead {lead_id} in stage {stage}")]
    InvalidState {
        lead_id: String,
        stage: Stage,
        operation: String,
    },

    #[error("lead store error: {0}")]
    Store(#[from] LeadError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("campaign error: {0}")]
    Campaign(#[from] CampaignError),

    #[error("governor error: {0}")]
    Governor(#[from] GovernorError),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

impl EngineError {
    /// Returns true if the caller lost a race and should discard its work.
    pub fn is_stale(&self) -> bool {
        matches!(self, EngineError::StaleState { .. })
    }
}

/// Result of a single `advance` (or of the last step of `drive`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The lead moved to a new stage.
    Advanced { from: Stage, to: Stage },
    /// A transient failure was recorded and a retry scheduled.
    RetryScheduled {
        stage: Stage,
        attempt_number: u32,
        action_id: String,
        retry_at: DateTime<Utc>,
    },
    /// Qualification was deferred; a re-qualification is scheduled.
    Deferred {
        stage: Stage,
        action_id: String,
        retry_at: DateTime<Utc>,
    },
    /// The stage waits for the campaign's send window; an action is scheduled.
    Scheduled {
        stage: Stage,
        action_id: String,
        execute_at: DateTime<Utc>,
    },
    /// The lead moved to `failed`.
    Failed { stage: Stage, error: ErrorDetail },
    /// The lead was already in a terminal stage; nothing ran.
    Terminal { stage: Stage },
}

impl Outcome {
    /// Stage the lead is in after this outcome.
    pub fn stage(&self) -> Stage {
        match self {
            Outcome::Advanced { to, .. } => *to,
            Outcome::RetryScheduled { stage, .. }
            | Outcome::Deferred { stage, .. }
            | Outcome::Scheduled { stage, .. } => *stage,
            Outcome::Failed { .. } => Stage::Failed,
            Outcome::Terminal { stage } => *stage,
        }
    }
}

/// Counts reported by startup recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecoveryReport {
    /// Interrupted attempts re-run with their original idempotency key.
    pub resumed_attempts: usize,
    /// Follow-up actions re-created for leads waiting without one.
    pub rescheduled_followups: usize,
    /// Leads whose follow-up was cancelled and whose sequence was closed.
    #[serde(default)]
    pub closed_sequences: usize,
    /// Leads driven again because nothing was pending for them.
    pub redriven_leads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::ErrorKind;

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::Failed {
            stage: Stage::New,
            error: ErrorDetail::new(ErrorKind::Transient, "timeout"),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["error"]["kind"], "transient");
        assert_eq!(outcome.stage(), Stage::Failed);
    }
}
