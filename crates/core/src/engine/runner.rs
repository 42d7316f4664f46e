//! Orchestration engine implementation.
//!
//! Moves one lead one stage at a time:
//! - Looks up the adapter for the stage's capability
//! - Acquires a budget slot from the governor
//! - Invokes the adapter with a timeout
//! - Commits the result through compare-and-transition
//!
//! Transient failures are retried through the scheduler; permanent failures
//! and exhausted retries move the lead to `failed`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::adapter::{
    AdapterError, AdapterOutput, AdapterRegistry, AdapterRequest, Capability, IdempotencyKey,
};
use crate::campaign::{CampaignConfig, CampaignError, CampaignStore, ReplyPolicy};
use crate::governor::Governor;
use crate::intel::{normalize_company_url, CachedIntel, IntelCache};
use crate::lead::{
    EnrichedField, ErrorDetail, ErrorKind, Lead, LeadError, LeadPatch, LeadStore, Qualification,
    QualificationVerdict, Stage, StageAttempt, Transition,
};
use crate::metrics;
use crate::scheduler::{
    ActionHandler, ActionKind, ActionStatus, FollowupScheduler, NewAction, ScheduledAction,
    SchedulerError,
};

use super::config::{EngineConfig, RetryConfig};
use super::types::{EngineError, Outcome};

/// Provenance recorded on fields produced by the company intel pre-step.
pub const COMPANY_INTEL_SOURCE: &str = "company_intel";

/// What the engine does for a lead in a given stage.
pub(super) enum Step {
    Invoke(Capability),
    ScheduleFollowup { slot: usize },
}

/// The orchestration engine - drives leads through the stage machine.
pub struct OrchestrationEngine {
    pub(super) config: EngineConfig,
    pub(super) leads: Arc<dyn LeadStore>,
    campaigns: Arc<dyn CampaignStore>,
    pub(super) scheduler: Arc<FollowupScheduler>,
    governor: Arc<Governor>,
    adapters: AdapterRegistry,
    default_campaign: CampaignConfig,
    intel_cache: Option<Arc<dyn IntelCache>>,
}

impl OrchestrationEngine {
    /// Create a new engine.
    pub fn new(
        config: EngineConfig,
        leads: Arc<dyn LeadStore>,
        campaigns: Arc<dyn CampaignStore>,
        scheduler: Arc<FollowupScheduler>,
        governor: Arc<Governor>,
        adapters: AdapterRegistry,
    ) -> Self {
        Self {
            config,
            leads,
            campaigns,
            scheduler,
            governor,
            adapters,
            default_campaign: CampaignConfig::default(),
            intel_cache: None,
        }
    }

    /// Share company intel between leads at the same company.
    pub fn with_intel_cache(mut self, cache: Arc<dyn IntelCache>) -> Self {
        self.intel_cache = Some(cache);
        self
    }

    /// Configuration used for leads that do not belong to a campaign.
    pub fn with_default_campaign(mut self, config: CampaignConfig) -> Self {
        self.default_campaign = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn leads(&self) -> &Arc<dyn LeadStore> {
        &self.leads
    }

    pub fn scheduler(&self) -> &Arc<FollowupScheduler> {
        &self.scheduler
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    pub fn default_campaign(&self) -> &CampaignConfig {
        &self.default_campaign
    }

    /// Get a lead, failing with `NotFound` if absent.
    pub fn lead(&self, lead_id: &str) -> Result<Lead, EngineError> {
        self.leads
            .get(lead_id)?
            .ok_or_else(|| EngineError::NotFound(lead_id.to_string()))
    }

    /// Campaign configuration that applies to a lead.
    pub fn campaign_config(&self, lead: &Lead) -> Result<CampaignConfig, EngineError> {
        match lead.campaign_id {
            Some(ref id) => {
                let campaign = self
                    .campaigns
                    .get(id)?
                    .ok_or_else(|| CampaignError::NotFound(id.clone()))?;
                Ok(campaign.config)
            }
            None => Ok(self.default_campaign.clone()),
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Run one stage for a lead currently at `stage`.
    ///
    /// Fails with `StaleState` if the lead is no longer at `stage`.
    pub async fn advance(&self, lead_id: &str, stage: Stage) -> Result<Outcome, EngineError> {
        let lead = self.lead(lead_id)?;
        if lead.stage != stage {
            return Err(self.stale(lead_id, stage, lead.stage));
        }

        let campaign = self.campaign_config(&lead)?;
        match self.step_for(&lead, &campaign)? {
            None => Ok(Outcome::Terminal { stage }),
            Some(Step::ScheduleFollowup { slot }) => {
                self.schedule_followup(lead, campaign, slot).await
            }
            Some(Step::Invoke(Capability::SendEmail)) => self.send_email(lead, campaign).await,
            Some(Step::Invoke(capability)) => {
                self.run_stage(lead, campaign, capability, None).await
            }
        }
    }

    /// Advance repeatedly while the lead lands in a stage that chains immediately.
    pub async fn drive(&self, lead_id: &str, stage: Stage) -> Result<Outcome, EngineError> {
        let mut current = stage;
        loop {
            let outcome = self.advance(lead_id, current).await?;
            match outcome {
                Outcome::Advanced { to, .. } if to.chains_immediately() => current = to,
                _ => return Ok(outcome),
            }
        }
    }

    /// Record that the lead replied, apply the campaign's reply policy and drive on.
    pub async fn record_reply(&self, lead_id: &str) -> Result<Outcome, EngineError> {
        let lead = self.lead(lead_id)?;
        if !lead.stage.accepts_reply() {
            return Err(EngineError::InvalidState {
                lead_id: lead_id.to_string(),
                stage: lead.stage,
                operation: "record a reply for".to_string(),
            });
        }

        let campaign = self.campaign_config(&lead)?;
        let policy = campaign.reply_policy;
        self.commit(
            lead_id,
            lead.stage,
            Transition::new(Stage::Replied, format!("reply received ({})", policy)),
        )?;

        let kinds: &[ActionKind] = match policy {
            ReplyPolicy::StopSequence => &ActionKind::ALL,
            ReplyPolicy::SkipNext => &[ActionKind::SendFollowup, ActionKind::RetryStage],
        };
        let cancelled = self.scheduler.cancel_for_lead(lead_id, kinds)?;
        info!(
            "Lead {} replied, {} pending actions cancelled ({})",
            lead_id,
            cancelled.len(),
            policy
        );

        self.drive(lead_id, Stage::Replied).await
    }

    /// Cancel a pending action.
    ///
    /// Returns false if the action was no longer pending. Cancelling a lead's
    /// follow-up ends its sequence and syncs the lead to the CRM.
    pub async fn cancel_action(&self, action_id: &str) -> Result<bool, EngineError> {
        let action = self
            .scheduler
            .get(action_id)?
            .ok_or_else(|| SchedulerError::NotFound(action_id.to_string()))?;
        if !self.scheduler.cancel(action_id)? {
            return Ok(false);
        }

        if action.kind == ActionKind::SendFollowup {
            match self.drive(&action.lead_id, Stage::AwaitingFollowup).await {
                Ok(outcome) => info!(
                    "Follow-up {} cancelled, lead {} now at {}",
                    action_id,
                    action.lead_id,
                    outcome.stage()
                ),
                Err(e) if e.is_stale() => {}
                Err(e) => warn!(
                    "Follow-up {} cancelled but lead {} was not closed: {}",
                    action_id, action.lead_id, e
                ),
            }
        }
        Ok(true)
    }

    /// Governed, time-bounded adapter call without any stage transition.
    pub async fn invoke_once(&self, request: AdapterRequest) -> Result<AdapterOutput, EngineError> {
        let capability = request.capability;
        Ok(self.invoke(capability, request).await?)
    }

    // =========================================================================
    // Stage execution
    // =========================================================================

    pub(super) fn plan(lead: &Lead, campaign: &CampaignConfig) -> Option<Step> {
        let step = match lead.stage {
            Stage::New => Step::Invoke(Capability::Enrich),
            Stage::Enriched => Step::Invoke(Capability::Qualify),
            Stage::Qualified => Step::Invoke(Capability::GenerateEmail),
            Stage::EmailGenerated => Step::Invoke(Capability::SendEmail),
            Stage::AwaitingFollowup => Step::Invoke(Capability::SendFollowup),
            Stage::EmailSent | Stage::FollowupSent => Self::next_followup(lead, campaign),
            Stage::Replied => match campaign.reply_policy {
                ReplyPolicy::SkipNext => Self::next_followup(lead, campaign),
                ReplyPolicy::StopSequence => Step::Invoke(Capability::CrmSync),
            },
            Stage::Rejected | Stage::CrmSynced | Stage::Failed => return None,
        };
        Some(step)
    }

    /// `plan`, except that a lead whose pending follow-up was cancelled closes
    /// its sequence instead of sending.
    pub(super) fn step_for(
        &self,
        lead: &Lead,
        campaign: &CampaignConfig,
    ) -> Result<Option<Step>, EngineError> {
        if self.followup_cancelled(lead)? {
            return Ok(Some(Step::Invoke(Capability::CrmSync)));
        }
        Ok(Self::plan(lead, campaign))
    }

    /// True if the lead waits for a follow-up whose action was cancelled.
    pub(super) fn followup_cancelled(&self, lead: &Lead) -> Result<bool, EngineError> {
        if lead.stage != Stage::AwaitingFollowup {
            return Ok(false);
        }
        let latest = self
            .scheduler
            .latest_for_lead(&lead.id, ActionKind::SendFollowup)?;
        Ok(latest.is_some_and(|action| {
            action.status == ActionStatus::Cancelled
                && action.created_at >= lead.stage_entered_at()
        }))
    }

    fn next_followup(lead: &Lead, campaign: &CampaignConfig) -> Step {
        let slot = lead.followup_slots_used();
        if slot < campaign.followup_cadence_secs.len() {
            Step::ScheduleFollowup { slot }
        } else {
            Step::Invoke(Capability::CrmSync)
        }
    }

    async fn schedule_followup(
        &self,
        lead: Lead,
        campaign: CampaignConfig,
        slot: usize,
    ) -> Result<Outcome, EngineError> {
        let Some(delay) = campaign.followup_delay_for(&lead, slot) else {
            return self
                .run_stage(lead, campaign, Capability::CrmSync, None)
                .await;
        };

        let stage = lead.stage;
        let execute_at = campaign.send_time(after(delay), &lead.profile);
        let attempt_number = self.leads.last_attempt_number(&lead.id, stage)? + 1;
        let attempt = StageAttempt::pending(&lead.id, stage, attempt_number).succeed();

        self.commit(
            &lead.id,
            stage,
            Transition::new(
                Stage::AwaitingFollowup,
                format!("follow-up {} due at {}", slot + 1, execute_at.to_rfc3339()),
            )
            .with_attempt(attempt),
        )?;
        metrics::STAGE_ATTEMPTS
            .with_label_values(&[stage.as_str(), "success"])
            .inc();

        // A crash here leaves the lead waiting without an action; recovery re-creates it
        let action = self.scheduler.schedule(
            NewAction::new(
                &lead.id,
                ActionKind::SendFollowup,
                Stage::AwaitingFollowup,
                execute_at,
            )
            .in_campaign(lead.campaign_id.clone()),
        )?;
        info!(
            "Lead {} awaiting follow-up {} (action {} at {})",
            lead.id,
            slot + 1,
            action.id,
            execute_at
        );

        Ok(Outcome::Advanced {
            from: stage,
            to: Stage::AwaitingFollowup,
        })
    }

    /// Send the introduction now, or schedule it for the campaign's next
    /// send window opening.
    async fn send_email(&self, lead: Lead, campaign: CampaignConfig) -> Result<Outcome, EngineError> {
        let now = Utc::now();
        let execute_at = campaign.send_time(now, &lead.profile);
        if execute_at <= now {
            return self
                .run_stage(lead, campaign, Capability::SendEmail, None)
                .await;
        }

        let stage = lead.stage;
        let pending = self
            .scheduler
            .pending_for_lead(&lead.id)?
            .into_iter()
            .find(|action| action.kind == ActionKind::SendEmail);
        let action = match pending {
            Some(action) => action,
            None => self.scheduler.schedule(
                NewAction::new(&lead.id, ActionKind::SendEmail, stage, execute_at)
                    .in_campaign(lead.campaign_id.clone()),
            )?,
        };
        info!(
            "Lead {} outside its send window, email due at {} (action {})",
            lead.id, action.execute_at, action.id
        );

        Ok(Outcome::Scheduled {
            stage,
            action_id: action.id,
            execute_at: action.execute_at,
        })
    }

    /// Invoke the stage's capability and commit the result.
    ///
    /// `resumed` carries an interrupted attempt to re-run with its original key.
    pub(super) async fn run_stage(
        &self,
        lead: Lead,
        campaign: CampaignConfig,
        capability: Capability,
        resumed: Option<StageAttempt>,
    ) -> Result<Outcome, EngineError> {
        let stage = lead.stage;
        let retry = self.config.retry_for(stage).clone();
        let prior = self.visit_attempts(&lead)?;

        let (attempt, visit) = match resumed {
            Some(attempt) => (attempt, prior.max(1)),
            None if capability.has_side_effects() => {
                match self.leads.reserve_attempt(&lead.id, stage)? {
                    Some(attempt) => (attempt, prior + 1),
                    None => return Err(self.stale_reread(&lead.id, stage)),
                }
            }
            None => {
                let number = self.leads.last_attempt_number(&lead.id, stage)? + 1;
                (StageAttempt::pending(&lead.id, stage, number), prior + 1)
            }
        };

        let key = IdempotencyKey::new(&lead.id, stage, attempt.attempt_number);
        let mut patch = LeadPatch::default();
        let mut snapshot = lead.clone();

        if capability == Capability::GenerateEmail {
            self.company_intel_prestep(&mut snapshot, &campaign, &key, &mut patch)
                .await;
        }

        let mut request = AdapterRequest::for_lead(capability, key, snapshot, campaign.clone());
        if capability == Capability::SendFollowup {
            request = request.with_followup_step(lead.followup_slots_used() as u32 + 1);
        }

        debug!(
            "Running {} for lead {} at {} (attempt {}, visit attempt {})",
            capability, lead.id, stage, attempt.attempt_number, visit
        );

        match self.invoke(capability, request).await {
            Ok(output) => {
                self.commit_success(&lead, &campaign, attempt, visit, &retry, output, patch)
            }
            Err(err) => self.handle_failure(&lead, attempt, visit, &retry, err),
        }
    }

    /// Fetch company intel before email generation. Failure is not fatal.
    ///
    /// A fresh cached entry for the lead's company is used instead of calling
    /// the adapter.
    async fn company_intel_prestep(
        &self,
        snapshot: &mut Lead,
        campaign: &CampaignConfig,
        key: &IdempotencyKey,
        patch: &mut LeadPatch,
    ) {
        if !campaign.company_intel {
            return;
        }
        let Some(company_key) = snapshot
            .profile
            .company_url
            .as_deref()
            .map(normalize_company_url)
        else {
            return;
        };

        let fields = match self.cached_intel(&company_key) {
            Some(fields) => fields,
            None => {
                if !self.adapters.contains(Capability::CompanyIntel) {
                    debug!("No company intel adapter registered, skipping pre-step");
                    return;
                }
                let request = AdapterRequest::for_lead(
                    Capability::CompanyIntel,
                    key.clone(),
                    snapshot.clone(),
                    campaign.clone(),
                );
                match self.invoke(Capability::CompanyIntel, request).await {
                    Ok(AdapterOutput::CompanyIntel { fields }) => {
                        self.store_intel(&company_key, &fields);
                        fields
                    }
                    Ok(_) => return,
                    Err(e) => {
                        warn!(
                            "Company intel failed for lead {}, generating without it: {}",
                            snapshot.id, e
                        );
                        return;
                    }
                }
            }
        };

        for (name, value) in fields {
            let field = EnrichedField::new(value, COMPANY_INTEL_SOURCE);
            snapshot.enrichment.insert(name.clone(), field.clone());
            patch.enrichment.insert(name, field);
        }
    }

    fn cached_intel(
        &self,
        company_key: &str,
    ) -> Option<BTreeMap<String, serde_json::Value>> {
        let cache = self.intel_cache.as_ref()?;
        if self.config.company_intel_ttl_secs == 0 {
            return None;
        }
        match cache.get(company_key, Utc::now()) {
            Ok(Some(entry)) => {
                metrics::INTEL_CACHE.with_label_values(&["hit"]).inc();
                debug!("Company intel cache hit for {}", company_key);
                Some(entry.fields)
            }
            Ok(None) => {
                metrics::INTEL_CACHE.with_label_values(&["miss"]).inc();
                None
            }
            Err(e) => {
                warn!("Company intel cache read failed for {}: {}", company_key, e);
                None
            }
        }
    }

    fn store_intel(
        &self,
        company_key: &str,
        fields: &BTreeMap<String, serde_json::Value>,
    ) {
        let Some(ref cache) = self.intel_cache else {
            return;
        };
        if self.config.company_intel_ttl_secs == 0 {
            return;
        }
        let fetched_at = Utc::now();
        let entry = CachedIntel {
            company_key: company_key.to_string(),
            fields: fields.clone(),
            fetched_at,
            expires_at: offset(fetched_at, self.config.company_intel_ttl()),
        };
        if let Err(e) = cache.put(&entry) {
            warn!("Company intel cache write failed for {}: {}", company_key, e);
        }
    }

    /// Governor slot, adapter lookup and timeout around a single call.
    async fn invoke(
        &self,
        capability: Capability,
        request: AdapterRequest,
    ) -> Result<AdapterOutput, AdapterError> {
        let Some(adapter) = self.adapters.get(capability) else {
            return Err(AdapterError::permanent(format!(
                "no adapter registered for {}",
                capability
            )));
        };
        let adapter = Arc::clone(adapter);

        let permit = self
            .governor
            .acquire(adapter.service())
            .await
            .map_err(|e| AdapterError {
                kind: ErrorKind::BudgetExceeded,
                message: e.to_string(),
            })?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.config.adapter_timeout(), adapter.invoke(request)).await;
        self.governor.release(permit);

        let (result, status) = match result {
            Ok(Ok(output)) if capability.accepts(&output) => (Ok(output), "success"),
            Ok(Ok(_)) => (
                Err(AdapterError::permanent(format!(
                    "{} adapter returned an unexpected output",
                    capability
                ))),
                "permanent",
            ),
            Ok(Err(e)) => {
                let status = if e.is_transient() { "transient" } else { "permanent" };
                (Err(e), status)
            }
            Err(_) => (
                Err(AdapterError::transient(format!(
                    "{} timed out after {}ms",
                    capability, self.config.adapter_timeout_ms
                ))),
                "timeout",
            ),
        };

        metrics::ADAPTER_DURATION
            .with_label_values(&[capability.as_str(), status])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_success(
        &self,
        lead: &Lead,
        campaign: &CampaignConfig,
        attempt: StageAttempt,
        visit: u32,
        retry: &RetryConfig,
        output: AdapterOutput,
        mut patch: LeadPatch,
    ) -> Result<Outcome, EngineError> {
        let stage = lead.stage;
        let summary = output.summary();

        let to = match output {
            AdapterOutput::Enriched { fields, source } => {
                for (name, value) in fields {
                    patch
                        .enrichment
                        .insert(name, EnrichedField::new(value, source.clone()));
                }
                Stage::Enriched
            }
            AdapterOutput::Qualified {
                score,
                rationale,
                verdict,
            } => {
                let score = score.min(100);
                let verdict = match verdict {
                    QualificationVerdict::Accepted if score < campaign.icp.min_score => {
                        QualificationVerdict::Rejected
                    }
                    QualificationVerdict::Deferred if visit >= retry.max_attempts => {
                        QualificationVerdict::Rejected
                    }
                    QualificationVerdict::Deferred => {
                        return self.defer_qualification(lead, attempt, rationale);
                    }
                    other => other,
                };
                patch.qualification = Some(Qualification {
                    score,
                    rationale,
                    verdict,
                    qualified_at: Utc::now(),
                });
                if verdict == QualificationVerdict::Accepted {
                    Stage::Qualified
                } else {
                    Stage::Rejected
                }
            }
            AdapterOutput::EmailSequence { drafts } => {
                patch.drafts = Some(drafts);
                Stage::EmailGenerated
            }
            AdapterOutput::Delivered { .. } if stage == Stage::AwaitingFollowup => {
                Stage::FollowupSent
            }
            AdapterOutput::Delivered { .. } => Stage::EmailSent,
            AdapterOutput::CrmSynced { .. } => Stage::CrmSynced,
            AdapterOutput::Lookalikes { .. } | AdapterOutput::CompanyIntel { .. } => {
                let err = AdapterError::permanent(format!("unexpected output at stage {}", stage));
                return self.handle_failure(lead, attempt, visit, retry, err);
            }
        };

        self.commit(
            &lead.id,
            stage,
            Transition::new(to, summary)
                .with_attempt(attempt.succeed())
                .with_patch(patch),
        )?;
        metrics::STAGE_ATTEMPTS
            .with_label_values(&[stage.as_str(), "success"])
            .inc();
        info!("Lead {} advanced {} -> {}", lead.id, stage, to);

        Ok(Outcome::Advanced { from: stage, to })
    }

    fn defer_qualification(
        &self,
        lead: &Lead,
        attempt: StageAttempt,
        rationale: String,
    ) -> Result<Outcome, EngineError> {
        let stage = lead.stage;
        self.record(&lead.id, stage, &attempt.succeed())?;
        metrics::STAGE_ATTEMPTS
            .with_label_values(&[stage.as_str(), "deferred"])
            .inc();

        let retry_at = after(self.config.requalify_delay());
        let action = self.scheduler.schedule(
            NewAction::new(&lead.id, ActionKind::Requalify, stage, retry_at)
                .in_campaign(lead.campaign_id.clone()),
        )?;
        info!(
            "Qualification of lead {} deferred until {}: {}",
            lead.id, retry_at, rationale
        );

        Ok(Outcome::Deferred {
            stage,
            action_id: action.id,
            retry_at,
        })
    }

    fn handle_failure(
        &self,
        lead: &Lead,
        attempt: StageAttempt,
        visit: u32,
        retry: &RetryConfig,
        err: AdapterError,
    ) -> Result<Outcome, EngineError> {
        let stage = lead.stage;
        let detail = ErrorDetail::from(err);

        if !detail.kind.is_retryable() {
            warn!(
                "Lead {} failed permanently at {}: {}",
                lead.id, stage, detail.message
            );
            self.commit(
                &lead.id,
                stage,
                Transition::new(Stage::Failed, format!("permanent failure: {}", detail.message))
                    .with_attempt(attempt.fail(detail.clone())),
            )?;
            metrics::STAGE_ATTEMPTS
                .with_label_values(&[stage.as_str(), "failed"])
                .inc();
            return Ok(Outcome::Failed {
                stage,
                error: detail,
            });
        }

        if visit >= retry.max_attempts {
            warn!(
                "Lead {} exhausted {} attempts at {}: {}",
                lead.id, visit, stage, detail
            );
            self.commit(
                &lead.id,
                stage,
                Transition::new(
                    Stage::Failed,
                    format!("retries exhausted after {} attempts: {}", visit, detail.message),
                )
                .with_attempt(attempt.exhaust(detail.clone())),
            )?;
            metrics::STAGE_ATTEMPTS
                .with_label_values(&[stage.as_str(), "exhausted"])
                .inc();
            return Ok(Outcome::Failed {
                stage,
                error: detail,
            });
        }

        let attempt_number = attempt.attempt_number;
        self.record(&lead.id, stage, &attempt.fail(detail.clone()))?;
        metrics::STAGE_ATTEMPTS
            .with_label_values(&[stage.as_str(), "failed"])
            .inc();

        let retry_at = after(retry.delay_for(visit));
        let action = self.scheduler.schedule(
            NewAction::new(&lead.id, ActionKind::RetryStage, stage, retry_at)
                .in_campaign(lead.campaign_id.clone()),
        )?;
        metrics::RETRIES_SCHEDULED
            .with_label_values(&[stage.as_str()])
            .inc();
        info!(
            "Lead {} attempt {} at {} failed ({}), retry at {}",
            lead.id, attempt_number, stage, detail, retry_at
        );

        Ok(Outcome::RetryScheduled {
            stage,
            attempt_number,
            action_id: action.id,
            retry_at,
        })
    }

    // =========================================================================
    // Store helpers
    // =========================================================================

    /// Attempts made since the lead entered its current stage.
    fn visit_attempts(&self, lead: &Lead) -> Result<u32, EngineError> {
        let entered = lead.stage_entered_at();
        let count = self
            .leads
            .attempts(&lead.id, Some(lead.stage))?
            .iter()
            .filter(|attempt| attempt.started_at >= entered)
            .count();
        Ok(count as u32)
    }

    pub(super) fn commit(
        &self,
        lead_id: &str,
        expected: Stage,
        transition: Transition,
    ) -> Result<(), EngineError> {
        let to = transition.to;
        match self.leads.compare_and_transition(lead_id, expected, transition) {
            Ok(true) => {
                metrics::STAGE_TRANSITIONS
                    .with_label_values(&[expected.as_str(), to.as_str()])
                    .inc();
                Ok(())
            }
            Ok(false) | Err(LeadError::AttemptConflict { .. }) => {
                Err(self.stale_reread(lead_id, expected))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record(
        &self,
        lead_id: &str,
        expected: Stage,
        attempt: &StageAttempt,
    ) -> Result<(), EngineError> {
        match self.leads.record_attempt(lead_id, expected, attempt) {
            Ok(true) => Ok(()),
            Ok(false) | Err(LeadError::AttemptConflict { .. }) => {
                Err(self.stale_reread(lead_id, expected))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stale_reread(&self, lead_id: &str, expected: Stage) -> EngineError {
        let actual = match self.leads.get(lead_id) {
            Ok(Some(lead)) => lead.stage,
            Ok(None) => return EngineError::NotFound(lead_id.to_string()),
            Err(e) => {
                error!("Failed to re-read lead {}: {}", lead_id, e);
                expected
            }
        };
        self.stale(lead_id, expected, actual)
    }

    fn stale(&self, lead_id: &str, expected: Stage, actual: Stage) -> EngineError {
        metrics::STALE_ADVANCES.inc();
        debug!(
            "Stale advance for lead {}: expected {}, found {}",
            lead_id, expected, actual
        );
        EngineError::StaleState {
            lead_id: lead_id.to_string(),
            expected,
            actual,
        }
    }
}

#[async_trait]
impl ActionHandler for OrchestrationEngine {
    async fn fire(&self, action: ScheduledAction) {
        match self.drive(&action.lead_id, action.stage).await {
            Ok(outcome) => debug!(
                "Action {} ({}) for lead {} finished at {}",
                action.id,
                action.kind,
                action.lead_id,
                outcome.stage()
            ),
            Err(e) if e.is_stale() => debug!(
                "Action {} for lead {} discarded: {}",
                action.id, action.lead_id, e
            ),
            Err(EngineError::NotFound(_)) => {
                warn!("Action {} references unknown lead {}", action.id, action.lead_id)
            }
            Err(e) => error!(
                "Action {} for lead {} failed: {}",
                action.id, action.lead_id, e
            ),
        }
    }
}

/// Wall-clock time `delay` from now.
pub(super) fn after(delay: Duration) -> DateTime<Utc> {
    offset(Utc::now(), delay)
}

pub(super) fn offset(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    from.checked_add_signed(chrono::Duration::milliseconds(millis))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
