//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestration engine (stage attempts, transitions, retries, stale advances, intel cache)
//! - Governor (wait time, rejections)
//! - Adapters (latency by capability)
//! - Scheduler (fired and cancelled actions)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Engine
// =============================================================================

/// Stage attempts by stage and result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("leadflow_stage_attempts_total", "Total stage attempts"),
        &["stage", "result"], // "success", "failed", "exhausted", "deferred"
    )
    .unwrap()
});

/// Committed stage transitions.
pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "leadflow_stage_transitions_total",
            "Total committed stage transitions",
        ),
        &["from", "to"],
    )
    .unwrap()
});

/// Retries scheduled after transient failures.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("leadflow_retries_scheduled_total", "Total retries scheduled"),
        &["stage"],
    )
    .unwrap()
});

/// Company intel cache lookups.
pub static INTEL_CACHE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "leadflow_company_intel_cache_total",
            "Company intel cache lookups",
        ),
        &["result"], // "hit", "miss"
    )
    .unwrap()
});

/// Advances that lost a compare-and-transition race.
pub static STALE_ADVANCES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "leadflow_stale_advances_total",
        "Advances discarded because the lead moved on",
    )
    .unwrap()
});

// =============================================================================
// Governor
// =============================================================================

/// Time spent waiting for a budget slot, in seconds.
pub static GOVERNOR_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "leadflow_governor_wait_seconds",
            "Time spent waiting for a budget slot",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
        &["service"],
    )
    .unwrap()
});

/// Acquires that failed with budget exceeded.
pub static GOVERNOR_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "leadflow_governor_rejections_total",
            "Total budget acquisitions rejected",
        ),
        &["service", "reason"], // reason: "queue_full", "max_wait"
    )
    .unwrap()
});

// =============================================================================
// Adapters
// =============================================================================

/// Adapter call duration in seconds.
pub static ADAPTER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "leadflow_adapter_duration_seconds",
            "Duration of agent adapter calls",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["capability", "status"], // status: "success", "transient", "permanent", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Scheduler
// =============================================================================

/// Scheduled actions fired.
pub static ACTIONS_FIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("leadflow_actions_fired_total", "Total scheduled actions fired"),
        &["kind"],
    )
    .unwrap()
});

/// Scheduled actions cancelled before firing.
pub static ACTIONS_CANCELLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "leadflow_actions_cancelled_total",
            "Total scheduled actions cancelled",
        ),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Engine
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_TRANSITIONS.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(STALE_ADVANCES.clone()),
        Box::new(INTEL_CACHE.clone()),
        // Governor
        Box::new(GOVERNOR_WAIT.clone()),
        Box::new(GOVERNOR_REJECTIONS.clone()),
        // Adapters
        Box::new(ADAPTER_DURATION.clone()),
        // Scheduler
        Box::new(ACTIONS_FIRED.clone()),
        Box::new(ACTIONS_CANCELLED.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        STAGE_ATTEMPTS.with_label_values(&["new", "success"]).inc();
        assert!(!registry.gather().is_empty());
    }
}
