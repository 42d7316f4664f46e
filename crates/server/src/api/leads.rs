//! Lead API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use leadflow_core::{
    CreateLeadRequest, Lead, LeadFilter, LeadProfile, Outcome, ScheduledAction, Stage,
    StageAttempt,
};

use super::error::ApiError;
use crate::metrics::LEADS_CREATED_TOTAL;
use crate::state::AppState;

/// Maximum allowed limit for lead queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for lead queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a standalone lead
#[derive(Debug, Deserialize)]
pub struct CreateLeadBody {
    pub profile: LeadProfile,
    /// Run the pipeline until the lead waits or finishes (default: true)
    #[serde(default = "default_drive")]
    pub drive: bool,
}

fn default_drive() -> bool {
    true
}

/// Response for a created lead
#[derive(Debug, Serialize)]
pub struct CreateLeadResponse {
    pub lead: Lead,
    /// Last outcome of the drive, absent when `drive` was false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

/// Query parameters for listing leads
#[derive(Debug, Deserialize)]
pub struct ListLeadsParams {
    pub campaign_id: Option<String>,
    pub stage: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing leads
#[derive(Debug, Serialize)]
pub struct ListLeadsResponse {
    pub leads: Vec<Lead>,
    pub limit: i64,
    pub offset: i64,
}

/// Response for a single lead
#[derive(Debug, Serialize)]
pub struct LeadDetailResponse {
    pub lead: Lead,
    pub attempts: Vec<StageAttempt>,
    pub pending_actions: Vec<ScheduledAction>,
}

/// Response for a recorded reply
#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub outcome: Outcome,
    pub lead: Lead,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a lead outside any campaign and drive it
pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateLeadBody>,
) -> Result<(StatusCode, Json<CreateLeadResponse>), ApiError> {
    if body.profile.name.trim().is_empty() {
        return Err(ApiError::bad_request("profile.name must not be empty"));
    }

    let lead = state.leads().create(CreateLeadRequest::new(body.profile))?;
    LEADS_CREATED_TOTAL.inc();
    info!(lead_id = %lead.id, drive = body.drive, "Lead created");

    if !body.drive {
        return Ok((
            StatusCode::CREATED,
            Json(CreateLeadResponse {
                lead,
                outcome: None,
            }),
        ));
    }

    let outcome = state.engine().drive(&lead.id, Stage::New).await?;
    let lead = state.engine().lead(&lead.id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateLeadResponse {
            lead,
            outcome: Some(outcome),
        }),
    ))
}

/// List leads with optional filters
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListLeadsParams>,
) -> Result<Json<ListLeadsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = LeadFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref campaign_id) = params.campaign_id {
        filter = filter.with_campaign(campaign_id);
    }
    if let Some(ref stage) = params.stage {
        let stage: Stage = stage.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_stage(stage);
    }

    let leads = state.leads().list(&filter)?;
    Ok(Json(ListLeadsResponse {
        leads,
        limit,
        offset,
    }))
}

/// Get a lead with its attempts and pending actions
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LeadDetailResponse>, ApiError> {
    let lead = state.engine().lead(&id)?;
    let attempts = state.leads().attempts(&id, None)?;
    let pending_actions = state.scheduler().pending_for_lead(&id)?;
    Ok(Json(LeadDetailResponse {
        lead,
        attempts,
        pending_actions,
    }))
}

/// Record that the lead replied
pub async fn record_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReplyResponse>, ApiError> {
    let outcome = state.coordinator().record_reply(&id).await?;
    let lead = state.engine().lead(&id)?;
    Ok(Json(ReplyResponse { outcome, lead }))
}
