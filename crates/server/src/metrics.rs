//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the leadflow server:
//! - HTTP request metrics (latency, counts)
//! - Lead and campaign intake
//! - Pipeline, scheduler and governor status (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::warn;

use leadflow_core::Stage;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "leadflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("leadflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "leadflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Intake Metrics
// =============================================================================

/// Leads created through the API (standalone or as part of a campaign).
pub static LEADS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "leadflow_leads_created_total",
        "Total leads created since startup",
    )
    .unwrap()
});

/// Campaigns started through the API.
pub static CAMPAIGNS_STARTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "leadflow_campaigns_started_total",
        "Total campaigns started since startup",
    )
    .unwrap()
});

// =============================================================================
// Pipeline Metrics (collected dynamically)
// =============================================================================

/// Leads by current stage.
pub static LEADS_BY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("leadflow_leads_by_stage", "Current lead count by stage"),
        &["stage"],
    )
    .unwrap()
});

/// Scheduler running state (1 = running, 0 = stopped).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "leadflow_scheduler_running",
        "Whether the follow-up scheduler is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Governor calls in flight per service.
pub static GOVERNOR_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "leadflow_governor_in_flight",
            "Calls currently holding a governor slot",
        ),
        &["service"],
    )
    .unwrap()
});

/// Governor callers waiting per service.
pub static GOVERNOR_WAITING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "leadflow_governor_waiting",
            "Calls waiting for a governor slot",
        ),
        &["service"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Intake
    registry
        .register(Box::new(LEADS_CREATED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(CAMPAIGNS_STARTED_TOTAL.clone()))
        .unwrap();

    // Pipeline
    registry
        .register(Box::new(LEADS_BY_STAGE.clone()))
        .unwrap();
    registry
        .register(Box::new(SCHEDULER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(GOVERNOR_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(GOVERNOR_WAITING.clone()))
        .unwrap();

    // Core metrics (engine, governor, adapters, scheduler)
    for metric in leadflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the stores and the governor at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    SCHEDULER_RUNNING.set(if state.scheduler().is_running() { 1 } else { 0 });

    match state.leads().count_by_stage(None) {
        Ok(counts) => {
            for stage in Stage::ALL {
                let count = counts.get(&stage).copied().unwrap_or(0);
                LEADS_BY_STAGE
                    .with_label_values(&[stage.as_str()])
                    .set(count as i64);
            }
        }
        Err(e) => warn!("Failed to count leads by stage: {}", e),
    }

    for budget in state.governor().status().await {
        GOVERNOR_IN_FLIGHT
            .with_label_values(&[&budget.service])
            .set(budget.in_flight as i64);
        GOVERNOR_WAITING
            .with_label_values(&[&budget.service])
            .set(budget.waiting as i64);
    }
}

static UUID_RE: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

static NUMERIC_RE: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/leads/550e8400-e29b-41d4-a716-446655440000/reply";
        assert_eq!(normalize_path(path), "/api/leads/{id}/reply");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/campaigns/12345";
        assert_eq!(normalize_path(path), "/api/campaigns/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/health"), "/api/health");
        assert_eq!(normalize_path("/api/leads/lookalike"), "/api/leads/lookalike");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("leadflow_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        // Vec metrics only show up once a label set has been touched
        leadflow_core::metrics::STAGE_TRANSITIONS
            .with_label_values(&["new", "enriched"])
            .inc();
        LEADS_BY_STAGE.with_label_values(&["new"]).set(0);
        SCHEDULER_RUNNING.set(0);

        let output = encode_metrics();
        assert!(output.contains("leadflow_stage_transitions_total"));
        assert!(output.contains("leadflow_leads_by_stage"));
        assert!(output.contains("leadflow_scheduler_running"));
    }
}
