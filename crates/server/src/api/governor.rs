//! Governor status handler.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use leadflow_core::{BudgetStatus, GovernorMode};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct GovernorStatusResponse {
    pub mode: GovernorMode,
    pub max_wait_ms: u64,
    pub services: Vec<BudgetStatus>,
}

/// Budget usage per external service
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<GovernorStatusResponse> {
    let governor = state.governor();
    Json(GovernorStatusResponse {
        mode: governor.config().mode,
        max_wait_ms: governor.config().max_wait_ms,
        services: governor.status().await,
    })
}
