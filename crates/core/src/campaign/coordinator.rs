//! Campaign coordinator.
//!
//! Fans a campaign's leads into independent engine drives through a bounded
//! worker pool and aggregates their progress. Holds no stage logic itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, OrchestrationEngine, Outcome, RecoveryReport};
use crate::lead::{CreateLeadRequest, Lead, LeadFilter, LeadProfile, Stage};

use super::config::CoordinatorConfig;
use super::store::CampaignStore;
use super::types::{Campaign, CampaignError, CampaignProgress, NewCampaign};

/// Handle to a started campaign.
pub struct CampaignHandle {
    pub campaign_id: String,
    /// Created leads in submission order.
    pub lead_ids: Vec<String>,
    dispatch: JoinHandle<()>,
}

impl CampaignHandle {
    /// True once every lead's initial drive has returned.
    ///
    /// Leads waiting on follow-ups are driven later by the scheduler.
    pub fn is_dispatched(&self) -> bool {
        self.dispatch.is_finished()
    }

    /// Wait for every lead's initial drive to return.
    pub async fn dispatched(self) {
        if let Err(e) = self.dispatch.await {
            error!("Dispatch task for campaign {} failed: {}", self.campaign_id, e);
        }
    }
}

/// Runs campaigns on top of the orchestration engine.
pub struct CampaignCoordinator {
    config: CoordinatorConfig,
    engine: Arc<OrchestrationEngine>,
    campaigns: Arc<dyn CampaignStore>,
    workers: Arc<Semaphore>,
    status_cache: Mutex<HashMap<String, CampaignProgress>>,
}

impl CampaignCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        engine: Arc<OrchestrationEngine>,
        campaigns: Arc<dyn CampaignStore>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_leads.max(1)));
        Self {
            config,
            engine,
            campaigns,
            workers,
            status_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    /// Create the campaign and its leads, then drive every lead from `new`.
    ///
    /// Returns as soon as the leads are persisted; the drives run in the background.
    /// If persisting fails, whatever was already written is removed again.
    pub fn start(&self, request: NewCampaign) -> Result<CampaignHandle, CampaignError> {
        let config = request
            .config
            .unwrap_or_else(|| self.config.defaults.clone());
        config.validate()?;

        let campaign = self.campaigns.create(&request.name, &config)?;
        let mut lead_ids = Vec::with_capacity(request.leads.len());
        if let Err(e) = self.persist_leads(&campaign, request.leads, &mut lead_ids) {
            self.discard(&campaign, &lead_ids);
            return Err(e);
        }

        info!(
            "Started campaign {} ({}) with {} leads",
            campaign.id,
            campaign.name,
            lead_ids.len()
        );

        let work = lead_ids.iter().map(|id| (id.clone(), Stage::New)).collect();
        let dispatch = self.dispatch(campaign.id.clone(), work);

        Ok(CampaignHandle {
            campaign_id: campaign.id,
            lead_ids,
            dispatch,
        })
    }

    fn persist_leads(
        &self,
        campaign: &Campaign,
        profiles: Vec<LeadProfile>,
        lead_ids: &mut Vec<String>,
    ) -> Result<(), CampaignError> {
        for profile in profiles {
            let lead = self
                .engine
                .leads()
                .create(CreateLeadRequest::new(profile).in_campaign(&campaign.id))?;
            lead_ids.push(lead.id);
        }
        self.campaigns.add_leads(&campaign.id, lead_ids)
    }

    /// Remove a campaign whose start failed, with the leads created for it.
    fn discard(&self, campaign: &Campaign, lead_ids: &[String]) {
        warn!(
            "Start of campaign {} failed, removing it and {} created leads",
            campaign.id,
            lead_ids.len()
        );
        for lead_id in lead_ids {
            if let Err(e) = self.engine.leads().delete(lead_id) {
                error!("Failed to remove lead {} of campaign {}: {}", lead_id, campaign.id, e);
            }
        }
        if let Err(e) = self.campaigns.delete(&campaign.id) {
            error!("Failed to remove campaign {}: {}", campaign.id, e);
        }
    }

    /// Drive each (lead, stage) pair on the shared worker pool.
    fn dispatch(&self, campaign_id: String, work: Vec<(String, Stage)>) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let workers = Arc::clone(&self.workers);

        tokio::spawn(async move {
            let mut tasks = Vec::with_capacity(work.len());
            for (lead_id, stage) in work {
                let engine = Arc::clone(&engine);
                let workers = Arc::clone(&workers);
                let campaign_id = campaign_id.clone();
                tasks.push(tokio::spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    match engine.drive(&lead_id, stage).await {
                        Ok(outcome) => debug!(
                            "Lead {} of campaign {} settled at {}",
                            lead_id,
                            campaign_id,
                            outcome.stage()
                        ),
                        Err(e) if e.is_stale() => {
                            debug!("Lead {} already moved on: {}", lead_id, e)
                        }
                        Err(e) => warn!(
                            "Lead {} of campaign {} could not be driven: {}",
                            lead_id, campaign_id, e
                        ),
                    }
                }));
            }

            for task in tasks {
                if let Err(e) = task.await {
                    error!("Lead task of campaign {} panicked: {}", campaign_id, e);
                }
            }
            debug!("Campaign {} dispatch finished", campaign_id);
        })
    }

    /// Aggregate progress, possibly served from a snapshot younger than the cache TTL.
    pub fn status(&self, campaign_id: &str) -> Result<CampaignProgress, CampaignError> {
        let ttl = chrono::Duration::milliseconds(self.config.status_cache_ttl_ms as i64);
        if self.config.status_cache_ttl_ms > 0 {
            if let Ok(cache) = self.status_cache.lock() {
                if let Some(progress) = cache.get(campaign_id) {
                    if chrono::Utc::now() - progress.computed_at < ttl {
                        return Ok(progress.clone());
                    }
                }
            }
        }
        self.fresh_status(campaign_id)
    }

    /// Aggregate progress recomputed from the campaign's leads.
    pub fn fresh_status(&self, campaign_id: &str) -> Result<CampaignProgress, CampaignError> {
        if self.campaigns.get(campaign_id)?.is_none() {
            return Err(CampaignError::NotFound(campaign_id.to_string()));
        }

        let counts = self.engine.leads().count_by_stage(Some(campaign_id))?;
        let progress = CampaignProgress::from_counts(campaign_id, counts);

        if self.config.status_cache_ttl_ms > 0 {
            if let Ok(mut cache) = self.status_cache.lock() {
                cache.insert(campaign_id.to_string(), progress.clone());
            }
        }
        Ok(progress)
    }

    /// True when every lead of the campaign is in a terminal stage.
    pub fn is_complete(&self, campaign_id: &str) -> Result<bool, CampaignError> {
        Ok(self.fresh_status(campaign_id)?.complete)
    }

    /// Poll until the campaign completes or `timeout` elapses.
    pub async fn wait_for_completion(
        &self,
        campaign_id: &str,
        timeout: Duration,
    ) -> Result<CampaignProgress, CampaignError> {
        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(self.config.completion_poll_ms.max(1));
        loop {
            let progress = self.fresh_status(campaign_id)?;
            if progress.complete {
                return Ok(progress);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CampaignError::Timeout(campaign_id.to_string()));
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Record a reply for one of the campaign's leads.
    pub async fn record_reply(&self, lead_id: &str) -> Result<Outcome, EngineError> {
        self.engine.record_reply(lead_id).await
    }

    pub fn get(&self, campaign_id: &str) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get(campaign_id)?
            .ok_or_else(|| CampaignError::NotFound(campaign_id.to_string()))
    }

    pub fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>, CampaignError> {
        self.campaigns.list(limit, offset)
    }

    /// Leads of a campaign, oldest first.
    pub fn leads(
        &self,
        campaign_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Lead>, CampaignError> {
        let filter = LeadFilter::new()
            .with_campaign(campaign_id)
            .with_limit(limit)
            .with_offset(offset);
        Ok(self.engine.leads().list(&filter)?)
    }

    /// Resume interrupted work after a restart.
    pub async fn resume(&self) -> Result<RecoveryReport, EngineError> {
        self.engine.recover().await
    }
}
