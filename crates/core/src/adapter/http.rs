//! Adapter that forwards invocations to an HTTP agent service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::error::AdapterError;
use super::traits::AgentAdapter;
use super::types::{AdapterOutput, AdapterRequest};

/// Header carrying the idempotency key on side-effecting calls.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Posts adapter requests as JSON to `{base_url}/agents/{capability}`.
pub struct HttpAgentAdapter {
    client: Client,
    base_url: String,
    service: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentErrorBody {
    #[serde(alias = "detail")]
    error: String,
}

impl HttpAgentAdapter {
    /// Create an adapter for the agent service at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        service: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service: service.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn endpoint(&self, request: &AdapterRequest) -> String {
        format!("{}/agents/{}", self.base_url, request.capability)
    }

    fn classify_send_error(e: reqwest::Error) -> AdapterError {
        if e.is_timeout() {
            AdapterError::transient(format!("agent request timed out: {}", e))
        } else if e.is_connect() || e.is_request() {
            AdapterError::transient(format!("agent service unreachable: {}", e))
        } else {
            AdapterError::permanent(format!("agent request failed: {}", e))
        }
    }

    fn classify_status(status: StatusCode, body: String) -> AdapterError {
        let message = serde_json::from_str::<AgentErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        let message = format!("agent returned {}: {}", status.as_u16(), message);
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            AdapterError::transient(message)
        } else {
            AdapterError::permanent(message)
        }
    }
}

#[async_trait]
impl AgentAdapter for HttpAgentAdapter {
    fn name(&self) -> &str {
        "http"
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn invoke(&self, request: AdapterRequest) -> Result<AdapterOutput, AdapterError> {
        let url = self.endpoint(&request);
        debug!(url = %url, capability = %request.capability, "Invoking agent service");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key.to_string());
        }
        if let Some(ref api_key) = self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(Self::classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let output: AdapterOutput = response
            .json()
            .await
            .map_err(|e| AdapterError::permanent(format!("undecodable agent response: {}", e)))?;

        if !request.capability.accepts(&output) {
            return Err(AdapterError::permanent(format!(
                "agent answered {} with an unexpected output",
                request.capability
            )));
        }
        Ok(output)
    }
}
