//! Standalone agent invocations (no lead is stored).

use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use leadflow_core::{AdapterOutput, AdapterRequest, CampaignConfig, Capability, LeadProfile};

use super::error::ApiError;
use crate::state::AppState;

/// Upper bound on lookalikes per request
const MAX_LOOKALIKES: u32 = 50;

/// Request body for a lookalike search
#[derive(Debug, Deserialize)]
pub struct LookalikeBody {
    /// Seed profile to find similar leads for
    pub profile: LeadProfile,
    pub max_results: Option<u32>,
    /// Campaign context (defaults to the server's default campaign)
    pub campaign: Option<CampaignConfig>,
}

/// Request body for company intel
#[derive(Debug, Deserialize)]
pub struct CompanyIntelBody {
    pub company_url: String,
    pub company: Option<String>,
}

/// Find leads similar to a seed profile
pub async fn find_lookalikes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LookalikeBody>,
) -> Result<Json<AdapterOutput>, ApiError> {
    if body.profile.name.trim().is_empty() {
        return Err(ApiError::bad_request("profile.name must not be empty"));
    }
    let max_results = body.max_results.unwrap_or(10);
    if max_results == 0 || max_results > MAX_LOOKALIKES {
        return Err(ApiError::bad_request(format!(
            "max_results must be within 1..={}",
            MAX_LOOKALIKES
        )));
    }

    let campaign = campaign_or_default(&state, body.campaign)?;
    let request = AdapterRequest::standalone(Capability::FindLookalikes, body.profile, campaign)
        .with_max_results(max_results);
    let output = state.engine().invoke_once(request).await?;
    Ok(Json(output))
}

/// Research a company by its website
pub async fn company_intel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CompanyIntelBody>,
) -> Result<Json<AdapterOutput>, ApiError> {
    let url = body.company_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::bad_request("company_url must be an http(s) URL"));
    }

    let name = body.company.clone().unwrap_or_else(|| url.to_string());
    let profile = LeadProfile::new(name.clone()).with_company(name, Some(url.to_string()));
    let campaign = state.engine().default_campaign().clone();
    let request = AdapterRequest::standalone(Capability::CompanyIntel, profile, campaign);
    let output = state.engine().invoke_once(request).await?;
    Ok(Json(output))
}

fn campaign_or_default(
    state: &AppState,
    campaign: Option<CampaignConfig>,
) -> Result<CampaignConfig, ApiError> {
    match campaign {
        Some(config) => {
            config.validate()?;
            Ok(config)
        }
        None => Ok(state.engine().default_campaign().clone()),
    }
}
