//! Mapping from core errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use leadflow_core::{
    CampaignError, EngineError, ErrorKind, GovernorError, LeadError, SchedulerError,
};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error returned by a handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("Internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LeadError> for ApiError {
    fn from(e: LeadError) -> Self {
        match e {
            LeadError::NotFound(_) => Self::not_found(e.to_string()),
            LeadError::IllegalTransition { .. } | LeadError::AttemptConflict { .. } => {
                Self::conflict(e.to_string())
            }
            LeadError::InvalidAttempt { .. } => Self::bad_request(e.to_string()),
            LeadError::Database(_) | LeadError::Serialization(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<CampaignError> for ApiError {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::NotFound(_) => Self::not_found(e.to_string()),
            CampaignError::InvalidConfig(_) => Self::bad_request(e.to_string()),
            CampaignError::Timeout(_) => Self::new(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
            CampaignError::Lead(inner) => inner.into(),
            CampaignError::Database(_) | CampaignError::Serialization(_) => {
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NotFound(_) => Self::not_found(e.to_string()),
            SchedulerError::Database(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<GovernorError> for ApiError {
    fn from(e: GovernorError) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(_) => Self::not_found(e.to_string()),
            EngineError::StaleState { .. } | EngineError::InvalidState { .. } => {
                Self::conflict(e.to_string())
            }
            EngineError::Store(inner) => inner.into(),
            EngineError::Scheduler(inner) => inner.into(),
            EngineError::Campaign(inner) => inner.into(),
            EngineError::Governor(inner) => inner.into(),
            EngineError::Adapter(ref inner) => {
                let status = match inner.kind {
                    ErrorKind::BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,
                    ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::BAD_GATEWAY,
                };
                Self::new(status, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::{AdapterError, DenialReason, Stage};

    #[test]
    fn test_engine_error_status_codes() {
        let cases = [
            (EngineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                EngineError::StaleState {
                    lead_id: "x".into(),
                    expected: Stage::New,
                    actual: Stage::Enriched,
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::Governor(GovernorError::BudgetExceeded {
                    service: "openai".into(),
                    reason: DenialReason::QueueFull,
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EngineError::Adapter(AdapterError::transient("timeout")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::Adapter(AdapterError::permanent("bad input")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::Campaign(CampaignError::InvalidConfig("goal".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Store(LeadError::Database("locked".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status, expected);
        }
    }

    #[test]
    fn test_budget_exceeded_adapter_error_is_429() {
        let error = AdapterError {
            kind: ErrorKind::BudgetExceeded,
            message: "budget exceeded for service openai (max_wait)".into(),
        };
        assert_eq!(
            ApiError::from(EngineError::Adapter(error)).status,
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
