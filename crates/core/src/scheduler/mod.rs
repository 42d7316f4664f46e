//! Follow-up scheduler: persisted actions and the driver that fires them.

mod config;
mod driver;
mod sqlite_store;
mod store;
mod types;

pub use config::SchedulerConfig;
pub use driver::{ActionHandler, FollowupScheduler};
pub use sqlite_store::SqliteActionStore;
pub use store::ActionStore;
pub use types::{ActionKind, ActionStatus, NewAction, ScheduledAction, SchedulerError};
