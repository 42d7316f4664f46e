//! Orchestration engine.
//!
//! Drives each lead through its stage machine, one committed transition at
//! a time, and recovers interrupted work on startup.

mod config;
mod recovery;
mod runner;
mod types;

pub use config::{EngineConfig, RetryConfig};
pub use runner::{OrchestrationEngine, COMPANY_INTEL_SOURCE};
pub use types::{EngineError, Outcome, RecoveryReport};
