//! Startup recovery.
//!
//! Re-runs attempts that were in flight when the process stopped and
//! re-creates work for leads that have nothing pending.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::lead::{Lead, LeadFilter, Stage, StageAttempt};
use crate::scheduler::{ActionKind, NewAction};

use super::runner::{offset, OrchestrationEngine, Step};
use super::types::{EngineError, Outcome, RecoveryReport};

const PAGE_SIZE: i64 = 500;

impl OrchestrationEngine {
    /// Recover interrupted work after a restart.
    ///
    /// - Pending attempts are re-run with their original idempotency key
    /// - Leads waiting for a follow-up without an action get one re-created,
    ///   unless their follow-up was cancelled, which closes the sequence
    /// - Other non-terminal leads with nothing pending are driven again
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        info!("Recovering interrupted work");
        let mut report = RecoveryReport::default();
        let mut handled = HashSet::new();

        for attempt in self.leads.pending_attempts()? {
            let lead_id = attempt.lead_id.clone();
            handled.insert(lead_id.clone());
            match self.resume_attempt(attempt).await {
                Ok(outcome) => {
                    report.resumed_attempts += 1;
                    info!("Resumed attempt for lead {}, now at {}", lead_id, outcome.stage());
                }
                Err(e) if e.is_stale() => {}
                Err(e) => warn!("Failed to resume attempt for lead {}: {}", lead_id, e),
            }
        }

        let mut to_drive = Vec::new();
        let mut offset_rows = 0;
        loop {
            let filter = LeadFilter::new()
                .non_terminal()
                .with_limit(PAGE_SIZE)
                .with_offset(offset_rows);
            let page = self.leads.list(&filter)?;
            let fetched = page.len() as i64;

            for lead in page {
                if handled.contains(&lead.id) {
                    continue;
                }
                if !self.scheduler.pending_for_lead(&lead.id)?.is_empty() {
                    continue;
                }
                if self.followup_cancelled(&lead)? {
                    report.closed_sequences += 1;
                    to_drive.push((lead.id, lead.stage));
                } else if lead.stage == Stage::AwaitingFollowup {
                    match self.reschedule_followup(&lead) {
                        Ok(()) => report.rescheduled_followups += 1,
                        Err(e) => warn!("Failed to reschedule follow-up for lead {}: {}", lead.id, e),
                    }
                } else {
                    to_drive.push((lead.id, lead.stage));
                }
            }

            if fetched < PAGE_SIZE {
                break;
            }
            offset_rows += PAGE_SIZE;
        }

        let concurrency = self.config.recovery_concurrency.max(1);
        let results: Vec<(String, Result<Outcome, EngineError>)> = stream::iter(to_drive)
            .map(|(lead_id, stage)| async move {
                let result = self.drive(&lead_id, stage).await;
                (lead_id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (lead_id, result) in results {
            match result {
                Ok(_) => report.redriven_leads += 1,
                Err(e) if e.is_stale() => {}
                Err(e) => warn!("Failed to re-drive lead {}: {}", lead_id, e),
            }
        }

        info!(
            "Recovery complete: {} attempts resumed, {} follow-ups rescheduled, {} sequences closed, {} leads re-driven",
            report.resumed_attempts,
            report.rescheduled_followups,
            report.closed_sequences,
            report.redriven_leads
        );
        Ok(report)
    }

    async fn resume_attempt(&self, attempt: StageAttempt) -> Result<Outcome, EngineError> {
        let lead = self.lead(&attempt.lead_id)?;
        if lead.stage != attempt.stage {
            return Err(EngineError::StaleState {
                lead_id: lead.id,
                expected: attempt.stage,
                actual: lead.stage,
            });
        }

        let campaign = self.campaign_config(&lead)?;
        let Some(Step::Invoke(capability)) = self.step_for(&lead, &campaign)? else {
            return Err(EngineError::InvalidState {
                lead_id: lead.id,
                stage: attempt.stage,
                operation: "resume an attempt for".to_string(),
            });
        };

        let lead_id = lead.id.clone();
        let outcome = self
            .run_stage(lead, campaign, capability, Some(attempt))
            .await?;
        match outcome {
            Outcome::Advanced { to, .. } if to.chains_immediately() => {
                self.drive(&lead_id, to).await
            }
            other => Ok(other),
        }
    }

    /// Re-create the follow-up action for a lead waiting without one.
    ///
    /// The due time is computed from when the lead entered the waiting stage.
    fn reschedule_followup(&self, lead: &Lead) -> Result<(), EngineError> {
        let campaign = self.campaign_config(lead)?;
        let slot = lead.followup_slots_used().saturating_sub(1);
        let delay = campaign.followup_delay_for(lead, slot).unwrap_or_default();
        let execute_at = campaign.send_time(offset(lead.stage_entered_at(), delay), &lead.profile);

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
            "Re-created follow-up action {} for lead {} at {}",
            action.id, lead.id, execute_at
        );
        Ok(())
    }
}
