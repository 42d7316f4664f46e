//! Trait definitions for agent adapters.

use async_trait::async_trait;

use super::error::AdapterError;
use super::types::{AdapterOutput, AdapterRequest};

/// Boundary implementation of one or more agent capabilities.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Returns the name of this adapter implementation.
    fn name(&self) -> &str;

    /// External service whose budget this adapter consumes.
    fn service(&self) -> &str;

    /// Performs the capability named in the request.
    ///
    /// Side-effecting capabilities must deduplicate on `request.idempotency_key`.
    async fn invoke(&self, request: AdapterRequest) -> Result<AdapterOutput, AdapterError>;
}
