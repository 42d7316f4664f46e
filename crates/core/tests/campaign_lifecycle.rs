//! Campaign coordinator tests: fan-out, aggregation and completion.

use std::sync::Arc;
use std::time::Duration;

use leadflow_core::adapter::{AdapterError, Capability};
use leadflow_core::campaign::{
    Campaign, CampaignConfig, CampaignCoordinator, CampaignError, CampaignStore,
    CoordinatorConfig, NewCampaign, SequenceTemplate,
};
use leadflow_core::engine::EngineConfig;
use leadflow_core::lead::{LeadFilter, Stage};
use leadflow_core::testing::fixtures::{self, Harness};
use leadflow_core::testing::MockAdapter;

fn setup(config: CoordinatorConfig) -> (Arc<MockAdapter>, Harness, CampaignCoordinator) {
    let adapter = Arc::new(MockAdapter::new());
    let harness = fixtures::harness(
        adapter.clone(),
        EngineConfig::default().with_retry(fixtures::immediate_retry(3)),
    );
    let coordinator = CampaignCoordinator::new(
        config,
        Arc::clone(&harness.engine),
        Arc::clone(&harness.campaigns),
    );
    (adapter, harness, coordinator)
}

fn no_followups() -> CampaignConfig {
    CampaignConfig {
        sequence: SequenceTemplate {
            num_followups: 0,
            ..SequenceTemplate::default()
        },
        followup_cadence_secs: Vec::new(),
        ..CampaignConfig::default()
    }
}

fn new_campaign(name: &str, size: usize, config: Option<CampaignConfig>) -> NewCampaign {
    NewCampaign {
        name: name.to_string(),
        config,
        leads: (0..size)
            .map(|i| fixtures::profile(&format!("Prospect {}", i)))
            .collect(),
    }
}

#[tokio::test]
async fn test_start_drives_every_lead() {
    let (adapter, _harness, coordinator) = setup(CoordinatorConfig::default());

    let handle = coordinator
        .start(new_campaign("Q3 outbound", 3, None))
        .unwrap();
    let campaign_id = handle.campaign_id.clone();
    assert_eq!(handle.lead_ids.len(), 3);
    handle.dispatched().await;

    let campaign = coordinator.get(&campaign_id).unwrap();
    assert_eq!(campaign.name, "Q3 outbound");
    assert_eq!(campaign.lead_ids.len(), 3);

    let progress = coordinator.fresh_status(&campaign_id).unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.counts.values().sum::<u64>(), 3);
    assert_eq!(progress.counts.get(&Stage::AwaitingFollowup), Some(&3));
    assert!(!progress.complete);
    assert!(!coordinator.is_complete(&campaign_id).unwrap());

    assert_eq!(adapter.call_count(Capability::SendEmail).await, 3);
}

#[tokio::test]
async fn test_campaign_without_followups_completes() {
    let (_adapter, _harness, coordinator) = setup(CoordinatorConfig::default());

    let handle = coordinator
        .start(new_campaign("Short", 4, Some(no_followups())))
        .unwrap();

    let progress = coordinator
        .wait_for_completion(&handle.campaign_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(progress.complete);
    assert_eq!(progress.total, 4);
    assert_eq!(progress.terminal, 4);
    assert_eq!(progress.counts.get(&Stage::CrmSynced), Some(&4));
}

#[tokio::test]
async fn test_lead_failure_does_not_fail_campaign() {
    let (adapter, _harness, coordinator) = setup(CoordinatorConfig::default());
    adapter
        .push_error(Capability::Enrich, AdapterError::permanent("invalid profile"))
        .await;

    let handle = coordinator
        .start(new_campaign("Mixed", 3, Some(no_followups())))
        .unwrap();
    let progress = coordinator
        .wait_for_completion(&handle.campaign_id, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(progress.complete);
    assert_eq!(progress.failed(), 1);
    assert_eq!(progress.counts.get(&Stage::CrmSynced), Some(&2));
    assert_eq!(progress.counts.values().sum::<u64>(), progress.total);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_creating_anything() {
    let (_adapter, harness, coordinator) = setup(CoordinatorConfig::default());
    let config = CampaignConfig {
        goal: "  ".to_string(),
        ..CampaignConfig::default()
    };

    let result = coordinator.start(new_campaign("Broken", 2, Some(config)));
    assert!(matches!(result, Err(CampaignError::InvalidConfig(_))));
    assert!(coordinator.list(10, 0).unwrap().is_empty());
    assert!(harness
        .leads
        .list(&LeadFilter::new())
        .unwrap()
        .is_empty());
}

/// Campaign store whose membership writes always fail.
struct FailingMembership {
    inner: Arc<dyn CampaignStore>,
}

impl CampaignStore for FailingMembership {
    fn create(&self, name: &str, config: &CampaignConfig) -> Result<Campaign, CampaignError> {
        self.inner.create(name, config)
    }

    fn add_leads(&self, _campaign_id: &str, _lead_ids: &[String]) -> Result<(), CampaignError> {
        Err(CampaignError::Database("disk I/O error".to_string()))
    }

    fn get(&self, id: &str) -> Result<Option<Campaign>, CampaignError> {
        self.inner.get(id)
    }

    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>, CampaignError> {
        self.inner.list(limit, offset)
    }

    fn delete(&self, id: &str) -> Result<bool, CampaignError> {
        self.inner.delete(id)
    }
}

#[tokio::test]
async fn test_failed_start_leaves_nothing_behind() {
    let (adapter, harness, _coordinator) = setup(CoordinatorConfig::default());
    let coordinator = CampaignCoordinator::new(
        CoordinatorConfig::default(),
        Arc::clone(&harness.engine),
        Arc::new(FailingMembership {
            inner: Arc::clone(&harness.campaigns),
        }),
    );

    let result = coordinator.start(new_campaign("Doomed", 3, None));
    assert!(matches!(result, Err(CampaignError::Database(_))));

    assert!(harness.campaigns.list(10, 0).unwrap().is_empty());
    assert!(harness.leads.list(&LeadFilter::new()).unwrap().is_empty());
    assert!(adapter.recorded_calls().await.is_empty());
}

#[tokio::test]
async fn test_status_of_unknown_campaign() {
    let (_adapter, _harness, coordinator) = setup(CoordinatorConfig::default());
    assert!(matches!(
        coordinator.status("missing"),
        Err(CampaignError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_wait_for_completion_times_out() {
    let (_adapter, _harness, coordinator) = setup(CoordinatorConfig::default());
    let handle = coordinator.start(new_campaign("Slow", 1, None)).unwrap();
    let campaign_id = handle.campaign_id.clone();
    handle.dispatched().await;

    let result = coordinator
        .wait_for_completion(&campaign_id, Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(CampaignError::Timeout(_))));
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let config = CoordinatorConfig {
        max_concurrent_leads: 2,
        ..CoordinatorConfig::default()
    };
    let (adapter, _harness, coordinator) = setup(config);
    adapter.set_delay(Duration::from_millis(20)).await;

    let handle = coordinator
        .start(new_campaign("Bounded", 6, Some(no_followups())))
        .unwrap();
    handle.dispatched().await;

    assert!(adapter.max_in_flight() <= 2);
    assert_eq!(adapter.call_count(Capability::CrmSync).await, 6);
}

#[tokio::test]
async fn test_status_cache_serves_recent_snapshot() {
    let config = CoordinatorConfig {
        status_cache_ttl_ms: 60_000,
        ..CoordinatorConfig::default()
    };
    let (_adapter, _harness, coordinator) = setup(config);
    let handle = coordinator
        .start(new_campaign("Cached", 2, Some(no_followups())))
        .unwrap();
    let campaign_id = handle.campaign_id.clone();

    let early = coordinator.fresh_status(&campaign_id).unwrap();
    handle.dispatched().await;

    let cached = coordinator.status(&campaign_id).unwrap();
    assert_eq!(cached, early);

    let fresh = coordinator.fresh_status(&campaign_id).unwrap();
    assert!(fresh.complete);
}

#[tokio::test]
async fn test_reply_through_coordinator() {
    let (adapter, harness, coordinator) = setup(CoordinatorConfig::default());
    let handle = coordinator.start(new_campaign("Replies", 2, None)).unwrap();
    let campaign_id = handle.campaign_id.clone();
    let lead_ids = handle.lead_ids.clone();
    handle.dispatched().await;

    coordinator.record_reply(&lead_ids[0]).await.unwrap();

    let progress = coordinator.fresh_status(&campaign_id).unwrap();
    assert_eq!(progress.counts.get(&Stage::CrmSynced), Some(&1));
    assert_eq!(progress.counts.get(&Stage::AwaitingFollowup), Some(&1));
    assert!(harness
        .scheduler
        .pending_for_lead(&lead_ids[0])
        .unwrap()
        .is_empty());
    assert_eq!(adapter.call_count(Capability::CrmSync).await, 1);

    let leads = coordinator.leads(&campaign_id, 10, 0).unwrap();
    assert_eq!(leads.len(), 2);
}
