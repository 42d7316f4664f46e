//! Lead records, stage machine and persistence.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteLeadStore;
pub use store::{CreateLeadRequest, LeadError, LeadFilter, LeadStore};
pub use types::{
    AttemptStatus, EmailDraft, EnrichedField, EnrichmentData, ErrorDetail, ErrorKind,
    HistoryEntry, Lead, LeadPatch, LeadProfile, Qualification, QualificationVerdict, Stage,
    StageAttempt, Transition,
};
