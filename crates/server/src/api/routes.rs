use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{actions, agents, campaigns, governor, handlers, leads, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::metrics))
        // Campaigns
        .route("/campaigns", get(campaigns::list_campaigns))
        .route("/campaigns/process", post(campaigns::process_campaign))
        .route("/campaigns/{id}", get(campaigns::get_campaign))
        // Leads
        .route("/leads", post(leads::create_lead).get(leads::list_leads))
        .route("/leads/lookalike", post(agents::find_lookalikes))
        .route("/leads/{id}", get(leads::get_lead))
        .route("/leads/{id}/reply", post(leads::record_reply))
        // Standalone agents
        .route("/company/intel", post(agents::company_intel))
        // Governor
        .route("/governor", get(governor::get_status))
        // Scheduled actions
        .route(
            "/actions/{id}",
            get(actions::get_action).delete(actions::cancel_action),
        )
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
