//! Scheduled action types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lead::Stage;

/// Errors from the scheduler and its action store.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Action not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Database(e.to_string())
    }
}

/// What a scheduled action does when it fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Send the introduction email once the send window opens.
    SendEmail,
    /// Send the next follow-up email.
    SendFollowup,
    /// Run qualification again after a deferred verdict.
    Requalify,
    /// Retry a stage after a transient failure.
    RetryStage,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::SendEmail,
        ActionKind::SendFollowup,
        ActionKind::Requalify,
        ActionKind::RetryStage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendEmail => "send_email",
            ActionKind::SendFollowup => "send_followup",
            ActionKind::Requalify => "requalify",
            ActionKind::RetryStage => "retry_stage",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown action kind: {}", s))
    }
}

/// Lifecycle of a scheduled action. `Fired` and `Cancelled` are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Fired,
    Cancelled,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Fired => "fired",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "fired" => Ok(ActionStatus::Fired),
            "cancelled" => Ok(ActionStatus::Cancelled),
            other => Err(format!("unknown action status: {}", other)),
        }
    }
}

/// A persisted future re-invocation of the engine.
///
/// The `id` doubles as the cancellation token handed out to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledAction {
    pub id: String,
    pub lead_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub kind: ActionKind,
    /// Stage the lead must be at when the action fires.
    pub stage: Stage,
    pub execute_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Request to schedule an action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub lead_id: String,
    pub campaign_id: Option<String>,
    pub kind: ActionKind,
    pub stage: Stage,
    pub execute_at: DateTime<Utc>,
}

impl NewAction {
    pub fn new(
        lead_id: impl Into<String>,
        kind: ActionKind,
        stage: Stage,
        execute_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lead_id: lead_id.into(),
            campaign_id: None,
            kind,
            stage,
            execute_at,
        }
    }

    pub fn in_campaign(mut self, campaign_id: Option<String>) -> Self {
        self.campaign_id = campaign_id;
        self
    }
}
