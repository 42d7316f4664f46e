//! Campaign API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use leadflow_core::{Campaign, CampaignConfig, CampaignProgress, Lead, LeadProfile, NewCampaign, Stage};

use super::error::ApiError;
use crate::metrics::{CAMPAIGNS_STARTED_TOTAL, LEADS_CREATED_TOTAL};
use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for processing a campaign
#[derive(Debug, Deserialize)]
pub struct ProcessCampaignBody {
    /// Display name (defaults to a timestamped name)
    pub name: Option<String>,
    /// Overrides the server's default campaign settings
    pub config: Option<CampaignConfig>,
    /// Profiles to create leads from
    pub leads: Vec<LeadProfile>,
}

/// Response for a started campaign
#[derive(Debug, Serialize)]
pub struct ProcessCampaignResponse {
    pub campaign_id: String,
    pub lead_ids: Vec<String>,
    pub progress: CampaignProgress,
}

/// Pagination parameters
#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Compact view of a campaign member
#[derive(Debug, Serialize)]
pub struct LeadSummary {
    pub id: String,
    pub name: String,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl From<Lead> for LeadSummary {
    fn from(lead: Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.profile.name,
            stage: lead.stage,
            updated_at: lead.updated_at,
        }
    }
}

/// Response for a single campaign
#[derive(Debug, Serialize)]
pub struct CampaignDetailResponse {
    pub campaign: Campaign,
    pub progress: CampaignProgress,
    pub leads: Vec<LeadSummary>,
}

/// Response for listing campaigns
#[derive(Debug, Serialize)]
pub struct ListCampaignsResponse {
    pub campaigns: Vec<Campaign>,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a campaign; leads are driven in the background
pub async fn process_campaign(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessCampaignBody>,
) -> Result<(StatusCode, Json<ProcessCampaignResponse>), ApiError> {
    if body.leads.is_empty() {
        return Err(ApiError::bad_request("leads must not be empty"));
    }
    if let Some(index) = body
        .leads
        .iter()
        .position(|profile| profile.name.trim().is_empty())
    {
        return Err(ApiError::bad_request(format!(
            "leads[{}].name must not be empty",
            index
        )));
    }

    let name = body
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("Campaign {}", Utc::now().format("%Y-%m-%d %H:%M:%S")));

    let handle = state.coordinator().start(NewCampaign {
        name,
        config: body.config,
        leads: body.leads,
    })?;

    CAMPAIGNS_STARTED_TOTAL.inc();
    LEADS_CREATED_TOTAL.inc_by(handle.lead_ids.len() as u64);
    info!(
        campaign_id = %handle.campaign_id,
        leads = handle.lead_ids.len(),
        "Campaign accepted"
    );

    let progress = state.coordinator().fresh_status(&handle.campaign_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessCampaignResponse {
            campaign_id: handle.campaign_id.clone(),
            lead_ids: handle.lead_ids.clone(),
            progress,
        }),
    ))
}

/// Get a campaign with its progress and members
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<CampaignDetailResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let coordinator = state.coordinator();
    let campaign = coordinator.get(&id)?;
    let progress = coordinator.status(&id)?;
    let leads = coordinator
        .leads(&id, limit, offset)?
        .into_iter()
        .map(LeadSummary::from)
        .collect();

    Ok(Json(CampaignDetailResponse {
        campaign,
        progress,
        leads,
    }))
}

/// List campaigns, newest first
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<ListCampaignsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let campaigns = state.coordinator().list(limit, offset)?;
    Ok(Json(ListCampaignsResponse {
        campaigns,
        limit,
        offset,
    }))
}
