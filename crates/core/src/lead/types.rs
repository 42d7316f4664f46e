//! Core lead data types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Stage
// ============================================================================

/// Position of a lead in the outreach pipeline.
///
/// Stage machine flow:
/// ```text
/// New -> Enriched -> Qualified -> EmailGenerated -> EmailSent -> AwaitingFollowup
///           |                                           |             |      ^
///           v                                           |             v      |
///        Rejected                                       |        FollowupSent
///                                                       v             |
///                                    Replied <----------+-------------+
///                                       |
///                                       v
///                                   CrmSynced
///
/// EmailSent and FollowupSent sync to the CRM once the cadence is exhausted;
/// AwaitingFollowup does so when its follow-up was cancelled.
/// Any non-terminal stage can transition to Failed.
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Lead created, nothing has run yet.
    New,
    /// Profile enriched from external sources.
    Enriched,
    /// Qualification accepted the lead.
    Qualified,
    /// Qualification rejected the lead (terminal).
    Rejected,
    /// Outreach sequence drafted.
    EmailGenerated,
    /// Introduction email delivered.
    EmailSent,
    /// Waiting for the next scheduled follow-up.
    AwaitingFollowup,
    /// A follow-up email was delivered.
    FollowupSent,
    /// The lead answered.
    Replied,
    /// Outcome written to the CRM (terminal).
    CrmSynced,
    /// Permanent failure or retries exhausted (terminal).
    Failed,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 11] = [
        Stage::New,
        Stage::Enriched,
        Stage::Qualified,
        Stage::Rejected,
        Stage::EmailGenerated,
        Stage::EmailSent,
        Stage::AwaitingFollowup,
        Stage::FollowupSent,
        Stage::Replied,
        Stage::CrmSynced,
        Stage::Failed,
    ];

    /// Returns the stage as a string (for storage and filtering).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Enriched => "enriched",
            Stage::Qualified => "qualified",
            Stage::Rejected => "rejected",
            Stage::EmailGenerated => "email_generated",
            Stage::EmailSent => "email_sent",
            Stage::AwaitingFollowup => "awaiting_followup",
            Stage::FollowupSent => "followup_sent",
            Stage::Replied => "replied",
            Stage::CrmSynced => "crm_synced",
            Stage::Failed => "failed",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Rejected | Stage::CrmSynced | Stage::Failed)
    }

    /// Stages reachable in one step from this one.
    pub fn successors(&self) -> &'static [Stage] {
        match self {
            Stage::New => &[Stage::Enriched, Stage::Failed],
            Stage::Enriched => &[Stage::Qualified, Stage::Rejected, Stage::Failed],
            Stage::Qualified => &[Stage::EmailGenerated, Stage::Failed],
            Stage::EmailGenerated => &[Stage::EmailSent, Stage::Failed],
            Stage::EmailSent => &[
                Stage::AwaitingFollowup,
                Stage::Replied,
                Stage::CrmSynced,
                Stage::Failed,
            ],
            Stage::AwaitingFollowup => &[
                Stage::FollowupSent,
                Stage::Replied,
                Stage::CrmSynced,
                Stage::Failed,
            ],
            Stage::FollowupSent => &[
                Stage::AwaitingFollowup,
                Stage::Replied,
                Stage::CrmSynced,
                Stage::Failed,
            ],
            Stage::Replied => &[Stage::AwaitingFollowup, Stage::CrmSynced, Stage::Failed],
            Stage::Rejected | Stage::CrmSynced | Stage::Failed => &[],
        }
    }

    /// Returns true if `target` is a legal next stage.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        self.successors().contains(&target)
    }

    /// Returns true if the engine should keep going right after entering this stage.
    ///
    /// `AwaitingFollowup` is only left through a scheduled action.
    pub fn chains_immediately(&self) -> bool {
        !self.is_terminal() && *self != Stage::AwaitingFollowup
    }

    /// Returns true if a reply signal is meaningful in this stage.
    pub fn accepts_reply(&self) -> bool {
        matches!(
            self,
            Stage::EmailSent | Stage::AwaitingFollowup | Stage::FollowupSent
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

// ============================================================================
// Lead Data
// ============================================================================

/// Source profile a lead was created from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LeadProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

impl LeadProfile {
    /// Create a profile with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the company name and website.
    pub fn with_company(mut self, company: impl Into<String>, url: Option<String>) -> Self {
        self.company = Some(company.into());
        self.company_url = url;
        self
    }

    /// Set the LinkedIn profile URL.
    pub fn with_linkedin(mut self, url: impl Into<String>) -> Self {
        self.linkedin_url = Some(url.into());
        self
    }
}

/// A single enriched value together with where it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedField {
    pub value: serde_json::Value,
    /// Provenance, e.g. "linkedin", "company_intel".
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl EnrichedField {
    pub fn new(value: impl Into<serde_json::Value>, source: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: source.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Enrichment data keyed by field name.
pub type EnrichmentData = BTreeMap<String, EnrichedField>;

/// Outcome of the qualification stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualificationVerdict {
    Accepted,
    Rejected,
    /// Not enough data yet; qualify again later.
    Deferred,
}

/// Qualification score with rationale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Qualification {
    /// Score in 0..=100.
    pub score: u8,
    pub rationale: String,
    pub verdict: QualificationVerdict,
    pub qualified_at: DateTime<Utc>,
}

/// One email of a generated outreach sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailDraft {
    /// 1 is the introduction, 2.. are follow-ups.
    pub step: u32,
    pub subject: String,
    pub body: String,
    /// Suggested delay after the previous email, in seconds.
    #[serde(default)]
    pub delay_secs: u64,
}

// ============================================================================
// History and Attempts
// ============================================================================

/// One committed stage transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// Position in the lead's history, starting at 0.
    pub seq: u32,
    /// `None` only for the creation entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Stage>,
    pub to: Stage,
    pub at: DateTime<Utc>,
    /// Short human-readable outcome.
    pub outcome: String,
    /// Attempt that produced this transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
}

/// Classification of a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or rate limiting: retry with backoff.
    Transient,
    /// Invalid input or policy rejection: never retried.
    Permanent,
    /// Governor could not grant a budget slot in time: retried like a transient error.
    BudgetExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::BudgetExceeded => "budget_exceeded",
        }
    }

    /// Returns true if a failure of this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded error of a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Status of a stage attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Reserved, adapter call in flight (or interrupted).
    Pending,
    Success,
    /// Failed, a retry may follow.
    Failed,
    /// Failed and no retries remain.
    Exhausted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Exhausted => "exhausted",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            "exhausted" => Ok(AttemptStatus::Exhausted),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

/// One execution of a stage for a lead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageAttempt {
    pub lead_id: String,
    pub stage: Stage,
    /// 1-based, strictly increasing per (lead, stage).
    pub attempt_number: u32,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageAttempt {
    /// Start a new attempt.
    pub fn pending(lead_id: impl Into<String>, stage: Stage, attempt_number: u32) -> Self {
        Self {
            lead_id: lead_id.into(),
            stage,
            attempt_number,
            status: AttemptStatus::Pending,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn succeed(self) -> Self {
        self.complete(AttemptStatus::Success, None)
    }

    pub fn fail(self, error: ErrorDetail) -> Self {
        self.complete(AttemptStatus::Failed, Some(error))
    }

    pub fn exhaust(self, error: ErrorDetail) -> Self {
        self.complete(AttemptStatus::Exhausted, Some(error))
    }

    fn complete(mut self, status: AttemptStatus, error: Option<ErrorDetail>) -> Self {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Returns true while the attempt has not completed.
    pub fn is_pending(&self) -> bool {
        self.status == AttemptStatus::Pending
    }
}

// ============================================================================
// Lead
// ============================================================================

/// A prospective contact moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    /// Unique identifier (UUID).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub profile: LeadProfile,
    #[serde(default)]
    pub enrichment: EnrichmentData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualification: Option<Qualification>,
    /// Generated outreach sequence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drafts: Vec<EmailDraft>,
    /// Always equal to the last history entry's `to`.
    pub stage: Stage,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// When the current stage was entered.
    pub fn stage_entered_at(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map(|entry| entry.at)
            .unwrap_or(self.created_at)
    }

    /// Number of follow-up slots consumed so far (sent or skipped).
    ///
    /// Every slot starts with an entry into `AwaitingFollowup`.
    pub fn followup_slots_used(&self) -> usize {
        self.history
            .iter()
            .filter(|entry| entry.to == Stage::AwaitingFollowup)
            .count()
    }

    /// Draft for the given follow-up slot (slot 0 is the first follow-up).
    pub fn followup_draft(&self, slot: usize) -> Option<&EmailDraft> {
        let step = slot as u32 + 2;
        self.drafts.iter().find(|draft| draft.step == step)
    }
}

/// Data written together with a stage transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    /// Merged into existing enrichment (same key overwrites).
    pub enrichment: EnrichmentData,
    pub qualification: Option<Qualification>,
    /// Replaces the stored drafts when set.
    pub drafts: Option<Vec<EmailDraft>>,
}

impl LeadPatch {
    pub fn is_empty(&self) -> bool {
        self.enrichment.is_empty() && self.qualification.is_none() && self.drafts.is_none()
    }

    /// Apply the patch to a lead in place.
    pub fn apply(self, lead: &mut Lead) {
        lead.enrichment.extend(self.enrichment);
        if let Some(qualification) = self.qualification {
            lead.qualification = Some(qualification);
        }
        if let Some(drafts) = self.drafts {
            lead.drafts = drafts;
        }
    }
}

/// A requested stage transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: Stage,
    /// Completed attempt recorded with the transition.
    pub attempt: Option<StageAttempt>,
    pub patch: LeadPatch,
    pub outcome: String,
}

impl Transition {
    pub fn new(to: Stage, outcome: impl Into<String>) -> Self {
        Self {
            to,
            attempt: None,
            patch: LeadPatch::default(),
            outcome: outcome.into(),
        }
    }

    pub fn with_attempt(mut self, attempt: StageAttempt) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_patch(mut self, patch: LeadPatch) -> Self {
        self.patch = patch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages_have_no_successors() {
        for stage in Stage::ALL {
            assert_eq!(stage.is_terminal(), stage.successors().is_empty(), "{}", stage);
        }
    }

    #[test]
    fn test_every_non_terminal_stage_can_fail() {
        for stage in Stage::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(stage.can_transition_to(Stage::Failed), "{}", stage);
        }
    }

    #[test]
    fn test_illegal_jumps_rejected() {
        assert!(!Stage::New.can_transition_to(Stage::EmailSent));
        assert!(!Stage::Enriched.can_transition_to(Stage::EmailGenerated));
        assert!(!Stage::CrmSynced.can_transition_to(Stage::New));
        assert!(!Stage::AwaitingFollowup.can_transition_to(Stage::EmailSent));
    }

    #[test]
    fn test_stage_string_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
        assert!("bogus".parse::<Stage>().is_err());
    }

    #[test]
    fn test_awaiting_followup_does_not_chain() {
        assert!(!Stage::AwaitingFollowup.chains_immediately());
        assert!(!Stage::Failed.chains_immediately());
        assert!(Stage::EmailSent.chains_immediately());
        assert!(Stage::Replied.chains_immediately());
    }

    #[test]
    fn test_attempt_lifecycle() {
        let attempt = StageAttempt::pending("lead-1", Stage::New, 1);
        assert!(attempt.is_pending());
        assert!(attempt.completed_at.is_none());

        let failed = attempt.fail(ErrorDetail::new(ErrorKind::Transient, "timeout"));
        assert_eq!(failed.status, AttemptStatus::Failed);
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Transient);
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_patch_merges_enrichment() {
        let now = Utc::now();
        let mut lead = Lead {
            id: "lead-1".to_string(),
            campaign_id: None,
            profile: LeadProfile::new("Ada"),
            enrichment: EnrichmentData::new(),
            qualification: None,
            drafts: vec![],
            stage: Stage::New,
            history: vec![],
            created_at: now,
            updated_at: now,
        };
        lead.enrichment
            .insert("title".to_string(), EnrichedField::new("CTO", "linkedin"));

        let mut patch = LeadPatch::default();
        patch
            .enrichment
            .insert("industry".to_string(), EnrichedField::new("SaaS", "company_intel"));
        assert!(!patch.is_empty());
        patch.apply(&mut lead);

        assert_eq!(lead.enrichment.len(), 2);
        assert_eq!(lead.enrichment["industry"].source, "company_intel");
    }

    #[test]
    fn test_followup_slots_counted_from_history() {
        let now = Utc::now();
        let entry = |seq, to| HistoryEntry {
            seq,
            from: None,
            to,
            at: now,
            outcome: String::new(),
            attempt_number: None,
        };
        let lead = Lead {
            id: "lead-1".to_string(),
            campaign_id: None,
            profile: LeadProfile::new("Ada"),
            enrichment: EnrichmentData::new(),
            qualification: None,
            drafts: vec![EmailDraft {
                step: 2,
                subject: "Following up".to_string(),
                body: "...".to_string(),
                delay_secs: 3,
            }],
            stage: Stage::FollowupSent,
            history: vec![
                entry(0, Stage::EmailSent),
                entry(1, Stage::AwaitingFollowup),
                entry(2, Stage::FollowupSent),
            ],
            created_at: now,
            updated_at: now,
        };

        assert_eq!(lead.followup_slots_used(), 1);
        assert_eq!(lead.followup_draft(0).unwrap().step, 2);
        assert!(lead.followup_draft(1).is_none());
    }
}
