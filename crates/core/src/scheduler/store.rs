//! Action store trait.

use chrono::{DateTime, Utc};

use super::{ActionKind, NewAction, ScheduledAction, SchedulerError};

/// Durable queue of scheduled actions.
///
/// `claim` and `cancel` are the only ways out of `pending`; both are atomic
/// so that exactly one of them wins for a given action.
pub trait ActionStore: Send + Sync {
    /// Persist a new pending action.
    fn insert(&self, action: NewAction) -> Result<ScheduledAction, SchedulerError>;

    /// Get an action by ID.
    fn get(&self, id: &str) -> Result<Option<ScheduledAction>, SchedulerError>;

    /// Move a pending action to `cancelled`. Returns false if it was not pending.
    fn cancel(&self, id: &str) -> Result<bool, SchedulerError>;

    /// Move a pending action to `fired`. Returns false if it was not pending.
    fn claim(&self, id: &str) -> Result<bool, SchedulerError>;

    /// Pending actions due at or before `now`, in execution order.
    fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledAction>, SchedulerError>;

    /// Execution time of the earliest pending action.
    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, SchedulerError>;

    /// Pending actions of one lead, in execution order.
    fn pending_for_lead(&self, lead_id: &str) -> Result<Vec<ScheduledAction>, SchedulerError>;

    /// Most recently scheduled action of one kind for a lead, whatever its status.
    fn latest_for_lead(
        &self,
        lead_id: &str,
        kind: ActionKind,
    ) -> Result<Option<ScheduledAction>, SchedulerError>;

    /// Cancel every pending action of a lead whose kind is in `kinds`.
    ///
    /// Returns the cancelled actions.
    fn cancel_for_lead(
        &self,
        lead_id: &str,
        kinds: &[ActionKind],
    ) -> Result<Vec<ScheduledAction>, SchedulerError>;
}
