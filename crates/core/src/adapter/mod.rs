//! Agent adapter interface.
//!
//! Every external agent (enrichment, qualification, email generation, delivery,
//! CRM) is reached through the [`AgentAdapter`] trait. The engine looks adapters
//! up by [`Capability`] in an [`AdapterRegistry`] built at startup.

mod error;
mod http;
mod registry;
mod traits;
mod types;

pub use error::AdapterError;
pub use http::{HttpAgentAdapter, IDEMPOTENCY_HEADER};
pub use registry::{AdapterRegistry, AdapterRegistryBuilder};
pub use traits::AgentAdapter;
pub use types::{AdapterOutput, AdapterRequest, Capability, IdempotencyKey};
