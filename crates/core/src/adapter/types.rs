//! Request and response types shared by all agent adapters.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::campaign::CampaignConfig;
use crate::lead::{EmailDraft, Lead, LeadProfile, QualificationVerdict, Stage};

/// Kind of work an adapter performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Enrich,
    FindLookalikes,
    Qualify,
    GenerateEmail,
    CompanyIntel,
    SendEmail,
    SendFollowup,
    CrmSync,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Enrich,
        Capability::FindLookalikes,
        Capability::Qualify,
        Capability::GenerateEmail,
        Capability::CompanyIntel,
        Capability::SendEmail,
        Capability::SendFollowup,
        Capability::CrmSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Enrich => "enrich",
            Capability::FindLookalikes => "find_lookalikes",
            Capability::Qualify => "qualify",
            Capability::GenerateEmail => "generate_email",
            Capability::CompanyIntel => "company_intel",
            Capability::SendEmail => "send_email",
            Capability::SendFollowup => "send_followup",
            Capability::CrmSync => "crm_sync",
        }
    }

    /// Returns true if invoking this capability changes the outside world.
    ///
    /// Such invocations are reserved before the call and carry an idempotency key.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Capability::SendEmail | Capability::SendFollowup | Capability::CrmSync
        )
    }

    /// Returns true if `output` is a valid answer for this capability.
    pub fn accepts(&self, output: &AdapterOutput) -> bool {
        matches!(
            (self, output),
            (Capability::Enrich, AdapterOutput::Enriched { .. })
                | (Capability::FindLookalikes, AdapterOutput::Lookalikes { .. })
                | (Capability::Qualify, AdapterOutput::Qualified { .. })
                | (Capability::GenerateEmail, AdapterOutput::EmailSequence { .. })
                | (Capability::CompanyIntel, AdapterOutput::CompanyIntel { .. })
                | (Capability::SendEmail, AdapterOutput::Delivered { .. })
                | (Capability::SendFollowup, AdapterOutput::Delivered { .. })
                | (Capability::CrmSync, AdapterOutput::CrmSynced { .. })
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability: {}", s))
    }
}

/// Deduplication key handed to side-effecting adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub lead_id: String,
    pub stage: Stage,
    pub attempt_number: u32,
}

impl IdempotencyKey {
    pub fn new(lead_id: impl Into<String>, stage: Stage, attempt_number: u32) -> Self {
        Self {
            lead_id: lead_id.into(),
            stage,
            attempt_number,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lead_id, self.stage, self.attempt_number)
    }
}

/// Input to an adapter invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRequest {
    pub capability: Capability,
    /// Present for stage invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Profile the work is about. For stage invocations this mirrors `lead.profile`.
    pub profile: LeadProfile,
    /// Snapshot of the lead with everything accumulated so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<Lead>,
    pub campaign: CampaignConfig,
    /// Follow-up step being sent (2 is the first follow-up).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup_step: Option<u32>,
    /// Upper bound on results for list-returning capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

impl AdapterRequest {
    /// Request for a stage of a stored lead.
    pub fn for_lead(
        capability: Capability,
        key: IdempotencyKey,
        lead: Lead,
        campaign: CampaignConfig,
    ) -> Self {
        Self {
            capability,
            idempotency_key: Some(key),
            profile: lead.profile.clone(),
            lead: Some(lead),
            campaign,
            followup_step: None,
            max_results: None,
        }
    }

    /// Request that is not tied to a stored lead.
    pub fn standalone(capability: Capability, profile: LeadProfile, campaign: CampaignConfig) -> Self {
        Self {
            capability,
            idempotency_key: None,
            profile,
            lead: None,
            campaign,
            followup_step: None,
            max_results: None,
        }
    }

    pub fn with_followup_step(mut self, step: u32) -> Self {
        self.followup_step = Some(step);
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Result of an adapter invocation, tagged by capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterOutput {
    Enriched {
        fields: BTreeMap<String, serde_json::Value>,
        /// Provenance recorded with every field.
        source: String,
    },
    Lookalikes {
        leads: Vec<LeadProfile>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icp_summary: Option<String>,
    },
    Qualified {
        score: u8,
        rationale: String,
        verdict: QualificationVerdict,
    },
    EmailSequence {
        drafts: Vec<EmailDraft>,
    },
    CompanyIntel {
        fields: BTreeMap<String, serde_json::Value>,
    },
    Delivered {
        message_id: String,
    },
    CrmSynced {
        record_id: String,
    },
}

impl AdapterOutput {
    /// Short description used as the history outcome.
    pub fn summary(&self) -> String {
        match self {
            AdapterOutput::Enriched { fields, source } => {
                format!("enriched {} fields from {}", fields.len(), source)
            }
            AdapterOutput::Lookalikes { leads, .. } => format!("found {} lookalikes", leads.len()),
            AdapterOutput::Qualified { score, verdict, .. } => {
                format!("qualification {:?} (score {})", verdict, score).to_lowercase()
            }
            AdapterOutput::EmailSequence { drafts } => {
                format!("generated {} emails", drafts.len())
            }
            AdapterOutput::CompanyIntel { fields } => {
                format!("company intel with {} fields", fields.len())
            }
            AdapterOutput::Delivered { message_id } => format!("delivered {}", message_id),
            AdapterOutput::CrmSynced { record_id } => format!("crm record {}", record_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_effect_capabilities() {
        let side_effects: Vec<_> = Capability::ALL
            .iter()
            .filter(|c| c.has_side_effects())
            .collect();
        assert_eq!(
            side_effects,
            vec![
                &Capability::SendEmail,
                &Capability::SendFollowup,
                &Capability::CrmSync
            ]
        );
    }

    #[test]
    fn test_capability_accepts_matching_output() {
        let delivered = AdapterOutput::Delivered {
            message_id: "m-1".to_string(),
        };
        assert!(Capability::SendEmail.accepts(&delivered));
        assert!(Capability::SendFollowup.accepts(&delivered));
        assert!(!Capability::Enrich.accepts(&delivered));
    }

    #[test]
    fn test_idempotency_key_display() {
        let key = IdempotencyKey::new("lead-1", Stage::EmailGenerated, 2);
        assert_eq!(key.to_string(), "lead-1:email_generated:2");
    }

    #[test]
    fn test_output_wire_format() {
        let json = r#"{"type":"qualified","score":71,"rationale":"fits ICP","verdict":"accepted"}"#;
        let output: AdapterOutput = serde_json::from_str(json).unwrap();
        assert_eq!(
            output,
            AdapterOutput::Qualified {
                score: 71,
                rationale: "fits ICP".to_string(),
                verdict: QualificationVerdict::Accepted,
            }
        );
        assert_eq!(output.summary(), "qualification accepted (score 71)");
    }
}
