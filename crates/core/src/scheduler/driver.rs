//! Follow-up scheduler driver.
//!
//! Actions live in an [`ActionStore`]; a background loop wakes at the earliest
//! due time (or when a new action is scheduled), claims due actions atomically
//! and hands them to an [`ActionHandler`] through a bounded pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Notify, Semaphore};
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use super::store::ActionStore;
use super::types::{ActionKind, NewAction, ScheduledAction, SchedulerError};
use crate::metrics;

/// Receives actions once they have been claimed.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle a fired action. Failures are the handler's to record.
    async fn fire(&self, action: ScheduledAction);
}

/// Persistent, recoverable work queue for follow-ups, re-qualifications and retries.
pub struct FollowupScheduler {
    config: SchedulerConfig,
    store: Arc<dyn ActionStore>,
    wakeup: Arc<Notify>,
    fire_slots: Arc<Semaphore>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl FollowupScheduler {
    pub fn new(config: SchedulerConfig, store: Arc<dyn ActionStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let fire_slots = Arc::new(Semaphore::new(config.max_concurrent_fires.max(1)));
        Self {
            config,
            store,
            wakeup: Arc::new(Notify::new()),
            fire_slots,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Persist an action and wake the driver.
    pub fn schedule(&self, action: NewAction) -> Result<ScheduledAction, SchedulerError> {
        let scheduled = self.store.insert(action)?;
        debug!(
            action_id = %scheduled.id,
            lead_id = %scheduled.lead_id,
            kind = %scheduled.kind,
            execute_at = %scheduled.execute_at,
            "Scheduled action"
        );
        self.wakeup.notify_one();
        Ok(scheduled)
    }

    /// Cancel a pending action. Returns false if it already fired or was cancelled.
    pub fn cancel(&self, action_id: &str) -> Result<bool, SchedulerError> {
        let action = self
            .store
            .get(action_id)?
            .ok_or_else(|| SchedulerError::NotFound(action_id.to_string()))?;

        let cancelled = self.store.cancel(action_id)?;
        if cancelled {
            metrics::ACTIONS_CANCELLED
                .with_label_values(&[action.kind.as_str()])
                .inc();
            info!(action_id = %action_id, lead_id = %action.lead_id, "Cancelled action");
        }
        Ok(cancelled)
    }

    /// Cancel a lead's pending actions of the given kinds.
    pub fn cancel_for_lead(
        &self,
        lead_id: &str,
        kinds: &[ActionKind],
    ) -> Result<Vec<ScheduledAction>, SchedulerError> {
        let cancelled = self.store.cancel_for_lead(lead_id, kinds)?;
        for action in &cancelled {
            metrics::ACTIONS_CANCELLED
                .with_label_values(&[action.kind.as_str()])
                .inc();
        }
        if !cancelled.is_empty() {
            info!(lead_id = %lead_id, count = cancelled.len(), "Cancelled pending actions");
        }
        Ok(cancelled)
    }

    pub fn get(&self, action_id: &str) -> Result<Option<ScheduledAction>, SchedulerError> {
        self.store.get(action_id)
    }

    pub fn pending_for_lead(&self, lead_id: &str) -> Result<Vec<ScheduledAction>, SchedulerError> {
        self.store.pending_for_lead(lead_id)
    }

    pub fn latest_for_lead(
        &self,
        lead_id: &str,
        kind: ActionKind,
    ) -> Result<Option<ScheduledAction>, SchedulerError> {
        self.store.latest_for_lead(lead_id, kind)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the driver loop. Due actions (including ones missed while down) fire first.
    pub fn start(&self, handler: Arc<dyn ActionHandler>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!("Starting follow-up scheduler");

        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let wakeup = Arc::clone(&self.wakeup);
        let fire_slots = Arc::clone(&self.fire_slots);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Scheduler loop started");
            loop {
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                let fired =
                    match Self::fire_due_with(&store, &handler, &fire_slots, config.batch_size)
                        .await
                    {
                        Ok(fired) => fired,
                        Err(e) => {
                            error!("Failed to fire due actions: {}", e);
                            0
                        }
                    };
                if fired >= config.batch_size {
                    continue;
                }

                let sleep_for = Self::next_sleep(&store, &config);
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
            info!("Scheduler loop stopped");
        });
    }

    /// Stop the driver loop and wait briefly for in-flight handlers.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping follow-up scheduler");
        let _ = self.shutdown_tx.send(());

        let slots = self.config.max_concurrent_fires.max(1) as u32;
        match tokio::time::timeout(Duration::from_secs(5), self.fire_slots.acquire_many(slots))
            .await
        {
            Ok(Ok(_all)) => info!("Follow-up scheduler stopped"),
            _ => warn!("Follow-up scheduler stopped with handlers still running"),
        }
    }

    /// Claim and fire every action that is due now, up to one batch.
    ///
    /// Returns the number of actions claimed.
    pub async fn fire_due(&self, handler: Arc<dyn ActionHandler>) -> Result<usize, SchedulerError> {
        Self::fire_due_with(&self.store, &handler, &self.fire_slots, self.config.batch_size).await
    }

    async fn fire_due_with(
        store: &Arc<dyn ActionStore>,
        handler: &Arc<dyn ActionHandler>,
        fire_slots: &Arc<Semaphore>,
        batch_size: usize,
    ) -> Result<usize, SchedulerError> {
        let due = store.due(Utc::now(), batch_size)?;
        let mut claimed = 0;

        for action in due {
            // Hold a fire slot before claiming; a queued action stays pending and cancellable
            let permit = match Arc::clone(fire_slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("Scheduler fire pool closed");
                    break;
                }
            };

            // Losing the claim means a canceller got there first
            if !store.claim(&action.id)? {
                debug!(action_id = %action.id, "Action resolved before firing");
                continue;
            }
            claimed += 1;
            metrics::ACTIONS_FIRED
                .with_label_values(&[action.kind.as_str()])
                .inc();

            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                debug!(
                    action_id = %action.id,
                    lead_id = %action.lead_id,
                    kind = %action.kind,
                    "Firing action"
                );
                handler.fire(action).await;
                drop(permit);
            });
        }

        Ok(claimed)
    }

    fn next_sleep(store: &Arc<dyn ActionStore>, config: &SchedulerConfig) -> Duration {
        let poll = Duration::from_millis(config.poll_interval_ms);
        match store.next_due_at() {
            Ok(Some(next)) => (next - Utc::now())
                .to_std()
                .map(|until| until.min(poll))
                .unwrap_or(Duration::ZERO),
            Ok(None) => poll,
            Err(e) => {
                warn!("Failed to read next due action: {}", e);
                poll
            }
        }
    }
}
