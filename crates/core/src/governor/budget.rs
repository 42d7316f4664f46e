//! Per-service concurrency and rate budgets.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore, TryAcquireError};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::bucket::TokenBucket;
use super::config::{GovernorConfig, GovernorMode, ServiceBudget};
use crate::metrics;

/// Why a budget could not be granted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Non-blocking mode and the wait queue is full.
    QueueFull,
    /// The slot did not free up within the max wait.
    MaxWait,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::QueueFull => write!(f, "queue_full"),
            DenialReason::MaxWait => write!(f, "max_wait"),
        }
    }
}

/// Errors from the governor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GovernorError {
    #[error("budget exceeded for service {service} ({reason})")]
    BudgetExceeded {
        service: String,
        reason: DenialReason,
    },
}

/// A granted budget slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    service: String,
    _slot: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
}

impl Permit {
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of one service's budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetStatus {
    pub service: String,
    /// 0 = unlimited.
    pub max_concurrent: usize,
    /// 0 = unlimited.
    pub requests_per_minute: u32,
    pub in_flight: usize,
    pub waiting: usize,
    /// `None` when the rate is unlimited.
    pub tokens_available: Option<f32>,
}

struct ServiceLimiter {
    name: String,
    budget: ServiceBudget,
    slots: Option<Arc<Semaphore>>,
    bucket: Mutex<TokenBucket>,
    waiting: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

impl ServiceLimiter {
    fn new(name: &str, budget: ServiceBudget) -> Self {
        let slots = (budget.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(budget.max_concurrent)));
        Self {
            name: name.to_string(),
            bucket: Mutex::new(TokenBucket::new(budget.requests_per_minute)),
            budget,
            slots,
            waiting: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    /// Join the queue unless it already holds `capacity` waiters.
    ///
    /// Check and increment are one atomic step.
    fn try_enter(counter: &'a AtomicUsize, capacity: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < capacity).then_some(waiting + 1)
            })
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Rate/budget governor shared by all engine workers.
///
/// Each external service gets a concurrency semaphore and a token bucket.
/// Services without configuration get the default budget on first use.
pub struct Governor {
    config: GovernorConfig,
    limiters: RwLock<HashMap<String, Arc<ServiceLimiter>>>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        let limiters = config
            .services
            .iter()
            .map(|(name, budget)| {
                (
                    name.clone(),
                    Arc::new(ServiceLimiter::new(name, budget.clone())),
                )
            })
            .collect();
        Self {
            config,
            limiters: RwLock::new(limiters),
        }
    }

    /// A governor that never limits anything.
    pub fn unlimited() -> Self {
        Self::new(GovernorConfig {
            default_budget: ServiceBudget::unlimited(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    async fn limiter(&self, service: &str) -> Arc<ServiceLimiter> {
        if let Some(limiter) = self.limiters.read().await.get(service) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write().await;
        let limiter = limiters.entry(service.to_string()).or_insert_with(|| {
            debug!(service = %service, "Creating default budget for service");
            Arc::new(ServiceLimiter::new(
                service,
                self.config.default_budget.clone(),
            ))
        });
        Arc::clone(limiter)
    }

    /// Acquire a budget slot for `service`.
    ///
    /// Waits for a concurrency slot and a rate token, bounded by the configured
    /// max wait. In non-blocking mode the call fails immediately when it would
    /// have to queue behind `queue_capacity` other waiters.
    pub async fn acquire(&self, service: &str) -> Result<Permit, GovernorError> {
        let limiter = self.limiter(service).await;
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.max_wait_ms);

        let slot = match limiter.slots {
            Some(ref slots) => Some(self.acquire_slot(&limiter, slots, deadline).await?),
            None => None,
        };

        self.acquire_token(&limiter, deadline).await?;

        limiter.in_flight.fetch_add(1, Ordering::SeqCst);
        metrics::GOVERNOR_WAIT
            .with_label_values(&[service])
            .observe(started.elapsed().as_secs_f64());

        Ok(Permit {
            service: service.to_string(),
            _slot: slot,
            in_flight: Arc::clone(&limiter.in_flight),
        })
    }

    /// Release a permit. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    async fn acquire_slot(
        &self,
        limiter: &ServiceLimiter,
        slots: &Arc<Semaphore>,
        deadline: Instant,
    ) -> Result<OwnedSemaphorePermit, GovernorError> {
        match Arc::clone(slots).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(self.deny(limiter, DenialReason::MaxWait)),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = self.join_queue(limiter)?;
        match tokio::time::timeout_at(deadline, Arc::clone(slots).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(self.deny(limiter, DenialReason::MaxWait)),
        }
    }

    async fn acquire_token(
        &self,
        limiter: &ServiceLimiter,
        deadline: Instant,
    ) -> Result<(), GovernorError> {
        let mut queued: Option<WaitGuard<'_>> = None;
        loop {
            let result = limiter.bucket.lock().await.try_acquire();
            let wait = match result {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            if Instant::now() + wait > deadline {
                return Err(self.deny(limiter, DenialReason::MaxWait));
            }
            if queued.is_none() {
                queued = Some(self.join_queue(limiter)?);
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn join_queue<'a>(&self, limiter: &'a ServiceLimiter) -> Result<WaitGuard<'a>, GovernorError> {
        let capacity = match self.config.mode {
            GovernorMode::NonBlocking => self.config.queue_capacity,
            GovernorMode::Blocking => usize::MAX,
        };
        WaitGuard::try_enter(&limiter.waiting, capacity)
            .ok_or_else(|| self.deny(limiter, DenialReason::QueueFull))
    }

    fn deny(&self, limiter: &ServiceLimiter, reason: DenialReason) -> GovernorError {
        warn!(service = %limiter.name, reason = %reason, "Budget exceeded");
        let reason_label = reason.to_string();
        metrics::GOVERNOR_REJECTIONS
            .with_label_values(&[limiter.name.as_str(), reason_label.as_str()])
            .inc();
        GovernorError::BudgetExceeded {
            service: limiter.name.clone(),
            reason,
        }
    }

    /// Budget status of every known service, sorted by name.
    pub async fn status(&self) -> Vec<BudgetStatus> {
        let limiters: Vec<Arc<ServiceLimiter>> =
            self.limiters.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(limiters.len());
        for limiter in limiters {
            let tokens_available = limiter.bucket.lock().await.available();
            statuses.push(BudgetStatus {
                service: limiter.name.clone(),
                max_concurrent: limiter.budget.max_concurrent,
                requests_per_minute: limiter.budget.requests_per_minute,
                in_flight: limiter.in_flight.load(Ordering::SeqCst),
                waiting: limiter.waiting.load(Ordering::SeqCst),
                tokens_available,
            });
        }
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }
}
