//! Mock agent adapter for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::adapter::{
    AdapterError, AdapterOutput, AdapterRequest, AgentAdapter, Capability, IdempotencyKey,
};
use crate::lead::{EmailDraft, LeadProfile, QualificationVerdict};

/// A recorded adapter call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub capability: Capability,
    pub lead_id: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub followup_step: Option<u32>,
    /// Enrichment keys visible to the adapter when it was called.
    pub enrichment_keys: Vec<String>,
}

type Scripted = Result<AdapterOutput, AdapterError>;

/// Mock implementation of the AgentAdapter trait.
///
/// Provides controllable behavior for testing:
/// - Queue results per capability (consumed in order)
/// - Fail a capability on every call
/// - Add artificial latency
/// - Record calls and observed concurrency
///
/// When nothing is queued, each capability returns a plausible successful output.
///
/// # Example
///
/// ```rust,ignore
/// use leadflow_core::testing::MockAdapter;
///
/// let adapter = MockAdapter::new();
/// adapter.push_error(Capability::Enrich, AdapterError::transient("timeout")).await;
///
/// // ... drive a lead ...
///
/// assert_eq!(adapter.call_count(Capability::Enrich).await, 2);
/// ```
#[derive(Debug)]
pub struct MockAdapter {
    service: String,
    /// Results returned before falling back to defaults.
    queued: Arc<RwLock<HashMap<Capability, VecDeque<Scripted>>>>,
    /// Errors returned on every call, taking precedence over the queue.
    sticky_errors: Arc<RwLock<HashMap<Capability, AdapterError>>>,
    /// Simulated latency per call.
    delay: Arc<RwLock<Duration>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a new mock adapter billed against the "mock" service.
    pub fn new() -> Self {
        Self::for_service("mock")
    }

    /// Create a mock adapter billed against the given governor service.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            queued: Arc::new(RwLock::new(HashMap::new())),
            sticky_errors: Arc::new(RwLock::new(HashMap::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            calls: Arc::new(RwLock::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue an output for the next call of a capability.
    pub async fn push_output(&self, capability: Capability, output: AdapterOutput) {
        self.push(capability, Ok(output)).await;
    }

    /// Queue an error for the next call of a capability.
    pub async fn push_error(&self, capability: Capability, error: AdapterError) {
        self.push(capability, Err(error)).await;
    }

    async fn push(&self, capability: Capability, result: Scripted) {
        self.queued
            .write()
            .await
            .entry(capability)
            .or_default()
            .push_back(result);
    }

    /// Fail every call of a capability with this error.
    pub async fn fail_always(&self, capability: Capability, error: AdapterError) {
        self.sticky_errors.write().await.insert(capability, error);
    }

    /// Stop failing a capability.
    pub async fn clear_failure(&self, capability: Capability) {
        self.sticky_errors.write().await.remove(&capability);
    }

    /// Set simulated latency for every call.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// All recorded calls in order.
    pub async fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls made for a capability.
    pub async fn call_count(&self, capability: Capability) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.capability == capability)
            .count()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Clear recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Plausible successful output for a request.
    pub fn default_output(request: &AdapterRequest) -> AdapterOutput {
        let profile = &request.profile;
        match request.capability {
            Capability::Enrich => {
                let mut fields = BTreeMap::new();
                fields.insert(
                    "title".to_string(),
                    serde_json::json!(profile.title.as_deref().unwrap_or("Head of Operations")),
                );
                fields.insert("company_size".to_string(), serde_json::json!(120));
                AdapterOutput::Enriched {
                    fields,
                    source: "mock".to_string(),
                }
            }
            Capability::FindLookalikes => {
                let count = request.max_results.unwrap_or(3);
                let leads = (1..=count)
                    .map(|i| {
                        LeadProfile::new(format!("{} Lookalike {}", profile.name, i))
                            .with_email(format!("lookalike{}@example.com", i))
                    })
                    .collect();
                AdapterOutput::Lookalikes {
                    leads,
                    icp_summary: Some(format!("Profiles similar to {}", profile.name)),
                }
            }
            Capability::Qualify => AdapterOutput::Qualified {
                score: 80,
                rationale: "Matches the ideal customer profile".to_string(),
                verdict: QualificationVerdict::Accepted,
            },
            Capability::GenerateEmail => {
                let sequence = &request.campaign.sequence;
                let mut drafts = vec![EmailDraft {
                    step: 1,
                    subject: format!("Quick question, {}", profile.name),
                    body: format!("Hi {},\n\n{}.", profile.name, request.campaign.goal),
                    delay_secs: 0,
                }];
                for i in 0..sequence.num_followups {
                    drafts.push(EmailDraft {
                        step: i + 2,
                        subject: format!("Following up ({})", i + 1),
                        body: format!("Hi {}, just following up.", profile.name),
                        delay_secs: request
                            .campaign
                            .followup_cadence_secs
                            .get(i as usize)
                            .copied()
                            .unwrap_or(0),
                    });
                }
                AdapterOutput::EmailSequence { drafts }
            }
            Capability::CompanyIntel => {
                let mut fields = BTreeMap::new();
                fields.insert(
                    "company_summary".to_string(),
                    serde_json::json!(format!(
                        "{} builds software for operations teams",
                        profile.company.as_deref().unwrap_or("The company")
                    )),
                );
                AdapterOutput::CompanyIntel { fields }
            }
            Capability::SendEmail | Capability::SendFollowup => AdapterOutput::Delivered {
                message_id: match request.idempotency_key {
                    Some(ref key) => format!("msg-{}", key),
                    None => "msg-standalone".to_string(),
                },
            },
            Capability::CrmSync => AdapterOutput::CrmSynced {
                record_id: format!("crm-{}", profile.name.to_lowercase().replace(' ', "-")),
            },
        }
    }
}

#[async_trait]
impl AgentAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn invoke(&self, request: AdapterRequest) -> Result<AdapterOutput, AdapterError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.calls.write().await.push(RecordedCall {
            capability: request.capability,
            lead_id: request.lead.as_ref().map(|lead| lead.id.clone()),
            idempotency_key: request.idempotency_key.clone(),
            followup_step: request.followup_step,
            enrichment_keys: request
                .lead
                .as_ref()
                .map(|lead| lead.enrichment.keys().cloned().collect())
                .unwrap_or_default(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let sticky = self
            .sticky_errors
            .read()
            .await
            .get(&request.capability)
            .cloned();
        let result = match sticky {
            Some(error) => Err(error),
            None => {
                let queued = self
                    .queued
                    .write()
                    .await
                    .get_mut(&request.capability)
                    .and_then(|queue| queue.pop_front());
                queued.unwrap_or_else(|| Ok(Self::default_output(&request)))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
