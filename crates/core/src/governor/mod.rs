//! Rate/budget governor for external agent services.

mod bucket;
mod budget;
mod config;

pub use bucket::TokenBucket;
pub use budget::{BudgetStatus, DenialReason, Governor, GovernorError, Permit};
pub use config::{GovernorConfig, GovernorMode, ServiceBudget};
