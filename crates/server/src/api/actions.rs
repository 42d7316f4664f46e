//! Scheduled action handlers. An action id is its cancellation token.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use leadflow_core::ScheduledAction;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelActionResponse {
    pub id: String,
    pub cancelled: bool,
}

/// Get a scheduled action
pub async fn get_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduledAction>, ApiError> {
    state
        .scheduler()
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Action not found: {}", id)))
}

/// Cancel a pending action. Cancelling a follow-up ends the lead's sequence.
pub async fn cancel_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelActionResponse>, ApiError> {
    if !state.engine().cancel_action(&id).await? {
        return Err(ApiError::conflict(format!(
            "Action {} is no longer pending",
            id
        )));
    }
    Ok(Json(CancelActionResponse {
        id,
        cancelled: true,
    }))
}
