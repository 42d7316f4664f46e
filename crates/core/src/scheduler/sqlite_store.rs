//! SQLite-backed action store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ActionKind, ActionStatus, ActionStore, NewAction, ScheduledAction, SchedulerError};
use crate::lead::Stage;

const ACTION_COLUMNS: &str =
    "id, lead_id, campaign_id, kind, stage, execute_at, status, created_at, resolved_at";

/// SQLite-backed action store.
pub struct SqliteActionStore {
    conn: Mutex<Connection>,
}

impl SqliteActionStore {
    /// Open (or create) the action table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SchedulerError> {
        // execute_at is unix milliseconds so that ordering is numeric
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_actions (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL,
                campaign_id TEXT,
                kind TEXT NOT NULL,
                stage TEXT NOT NULL,
                execute_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_actions_due ON scheduled_actions(status, execute_at);
            CREATE INDEX IF NOT EXISTS idx_actions_lead ON scheduled_actions(lead_id, status);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<ScheduledAction> {
        let kind: String = row.get(3)?;
        let stage: String = row.get(4)?;
        let execute_at: i64 = row.get(5)?;
        let status: String = row.get(6)?;
        let created_at: String = row.get(7)?;
        let resolved_at: Option<String> = row.get(8)?;

        Ok(ScheduledAction {
            id: row.get(0)?,
            lead_id: row.get(1)?,
            campaign_id: row.get(2)?,
            kind: kind
                .parse::<ActionKind>()
                .map_err(|e| conversion_error(3, e))?,
            stage: stage.parse::<Stage>().map_err(|e| conversion_error(4, e))?,
            execute_at: from_millis(execute_at).map_err(|e| conversion_error(5, e))?,
            status: status
                .parse::<ActionStatus>()
                .map_err(|e| conversion_error(6, e))?,
            created_at: parse_rfc3339(&created_at).map_err(|e| conversion_error(7, e))?,
            resolved_at: resolved_at
                .map(|s| parse_rfc3339(&s).map_err(|e| conversion_error(8, e)))
                .transpose()?,
        })
    }

    fn query_actions(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ScheduledAction>, SchedulerError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_action)?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    fn resolve(&self, id: &str, status: ActionStatus) -> Result<bool, SchedulerError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduled_actions SET status = ?, resolved_at = ? WHERE id = ? AND status = 'pending'",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated == 1)
    }
}

impl ActionStore for SqliteActionStore {
    fn insert(&self, action: NewAction) -> Result<ScheduledAction, SchedulerError> {
        let conn = self.conn()?;

        let scheduled = ScheduledAction {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: action.lead_id,
            campaign_id: action.campaign_id,
            kind: action.kind,
            stage: action.stage,
            execute_at: action.execute_at,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };

        conn.execute(
            &format!(
                "INSERT INTO scheduled_actions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)",
                ACTION_COLUMNS
            ),
            params![
                scheduled.id,
                scheduled.lead_id,
                scheduled.campaign_id,
                scheduled.kind.as_str(),
                scheduled.stage.as_str(),
                scheduled.execute_at.timestamp_millis(),
                scheduled.status.as_str(),
                scheduled.created_at.to_rfc3339(),
            ],
        )?;

        Ok(scheduled)
    }

    fn get(&self, id: &str) -> Result<Option<ScheduledAction>, SchedulerError> {
        let conn = self.conn()?;
        let action = conn
            .query_row(
                &format!("SELECT {} FROM scheduled_actions WHERE id = ?", ACTION_COLUMNS),
                params![id],
                Self::row_to_action,
            )
            .optional()?;
        Ok(action)
    }

    fn cancel(&self, id: &str) -> Result<bool, SchedulerError> {
        self.resolve(id, ActionStatus::Cancelled)
    }

    fn claim(&self, id: &str) -> Result<bool, SchedulerError> {
        self.resolve(id, ActionStatus::Fired)
    }

    fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledAction>, SchedulerError> {
        let conn = self.conn()?;
        Self::query_actions(
            &conn,
            &format!(
                "SELECT {} FROM scheduled_actions WHERE status = 'pending' AND execute_at <= ? ORDER BY execute_at ASC, created_at ASC LIMIT ?",
                ACTION_COLUMNS
            ),
            params![now.timestamp_millis(), limit as i64],
        )
    }

    fn next_due_at(&self) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MIN(execute_at) FROM scheduled_actions WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        millis
            .map(|ms| from_millis(ms).map_err(SchedulerError::Database))
            .transpose()
    }

    fn pending_for_lead(&self, lead_id: &str) -> Result<Vec<ScheduledAction>, SchedulerError> {
        let conn = self.conn()?;
        Self::query_actions(
            &conn,
            &format!(
                "SELECT {} FROM scheduled_actions WHERE lead_id = ? AND status = 'pending' ORDER BY execute_at ASC, created_at ASC",
                ACTION_COLUMNS
            ),
            params![lead_id],
        )
    }

    fn latest_for_lead(
        &self,
        lead_id: &str,
        kind: ActionKind,
    ) -> Result<Option<ScheduledAction>, SchedulerError> {
        let conn = self.conn()?;
        let action = conn
            .query_row(
                &format!(
                    "SELECT {} FROM scheduled_actions WHERE lead_id = ? AND kind = ? ORDER BY rowid DESC LIMIT 1",
                    ACTION_COLUMNS
                ),
                params![lead_id, kind.as_str()],
                Self::row_to_action,
            )
            .optional()?;
        Ok(action)
    }

    fn cancel_for_lead(
        &self,
        lead_id: &str,
        kinds: &[ActionKind],
    ) -> Result<Vec<ScheduledAction>, SchedulerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let pending = Self::query_actions(
            &tx,
            &format!(
                "SELECT {} FROM scheduled_actions WHERE lead_id = ? AND status = 'pending' ORDER BY execute_at ASC",
                ACTION_COLUMNS
            ),
            params![lead_id],
        )?;

        let now = Utc::now();
        let mut cancelled = Vec::new();
        for mut action in pending.into_iter().filter(|a| kinds.contains(&a.kind)) {
            let updated = tx.execute(
                "UPDATE scheduled_actions SET status = 'cancelled', resolved_at = ? WHERE id = ? AND status = 'pending'",
                params![now.to_rfc3339(), action.id],
            )?;
            if updated == 1 {
                action.status = ActionStatus::Cancelled;
                action.resolved_at = Some(now);
                cancelled.push(action);
            }
        }

        tx.commit()?;
        Ok(cancelled)
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("invalid timestamp: {}", ms))
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteActionStore {
        SqliteActionStore::in_memory().unwrap()
    }

    fn followup(lead_id: &str, at: DateTime<Utc>) -> NewAction {
        NewAction::new(lead_id, ActionKind::SendFollowup, Stage::AwaitingFollowup, at)
    }

    #[test]
    fn test_insert_and_get() {
        let store = store();
        let at = Utc::now() + Duration::days(3);
        let action = store
            .insert(followup("lead-1", at).in_campaign(Some("c-1".to_string())))
            .unwrap();

        let fetched = store.get(&action.id).unwrap().unwrap();
        assert_eq!(fetched.status, ActionStatus::Pending);
        assert_eq!(fetched.campaign_id.as_deref(), Some("c-1"));
        assert_eq!(fetched.execute_at.timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_claim_and_cancel_are_exclusive() {
        let store = store();
        let action = store.insert(followup("lead-1", Utc::now())).unwrap();

        assert!(store.claim(&action.id).unwrap());
        assert!(!store.cancel(&action.id).unwrap());
        assert!(!store.claim(&action.id).unwrap());
        assert_eq!(
            store.get(&action.id).unwrap().unwrap().status,
            ActionStatus::Fired
        );

        let other = store.insert(followup("lead-1", Utc::now())).unwrap();
        assert!(store.cancel(&other.id).unwrap());
        assert!(!store.claim(&other.id).unwrap());
        let other = store.get(&other.id).unwrap().unwrap();
        assert_eq!(other.status, ActionStatus::Cancelled);
        assert!(other.resolved_at.is_some());
    }

    #[test]
    fn test_cancel_unknown_action() {
        let store = store();
        assert!(!store.cancel("missing").unwrap());
    }

    #[test]
    fn test_due_in_timestamp_order() {
        let store = store();
        let now = Utc::now();
        let late = store.insert(followup("a", now - Duration::seconds(1))).unwrap();
        let early = store.insert(followup("b", now - Duration::seconds(10))).unwrap();
        store.insert(followup("c", now + Duration::hours(1))).unwrap();

        let due = store.due(now, 10).unwrap();
        let ids: Vec<_> = due.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

        assert_eq!(store.due(now, 1).unwrap().len(), 1);
        assert_eq!(
            store.next_due_at().unwrap().unwrap().timestamp_millis(),
            early.execute_at.timestamp_millis()
        );
    }

    #[test]
    fn test_next_due_at_empty() {
        assert!(store().next_due_at().unwrap().is_none());
    }

    #[test]
    fn test_latest_for_lead_includes_resolved() {
        let store = store();
        let now = Utc::now();
        assert!(store
            .latest_for_lead("lead-1", ActionKind::SendFollowup)
            .unwrap()
            .is_none());

        let first = store.insert(followup("lead-1", now)).unwrap();
        assert!(store.claim(&first.id).unwrap());
        let second = store.insert(followup("lead-1", now + Duration::days(3))).unwrap();
        assert!(store.cancel(&second.id).unwrap());
        store
            .insert(NewAction::new(
                "lead-1",
                ActionKind::RetryStage,
                Stage::AwaitingFollowup,
                now,
            ))
            .unwrap();

        let latest = store
            .latest_for_lead("lead-1", ActionKind::SendFollowup)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.status, ActionStatus::Cancelled);
    }

    #[test]
    fn test_cancel_for_lead_filters_kinds() {
        let store = store();
        let now = Utc::now();
        store.insert(followup("lead-1", now + Duration::days(3))).unwrap();
        store
            .insert(NewAction::new(
                "lead-1",
                ActionKind::RetryStage,
                Stage::EmailSent,
                now,
            ))
            .unwrap();
        store.insert(followup("lead-2", now)).unwrap();

        let cancelled = store
            .cancel_for_lead("lead-1", &[ActionKind::SendFollowup])
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].kind, ActionKind::SendFollowup);

        let remaining = store.pending_for_lead("lead-1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, ActionKind::RetryStage);
        assert_eq!(store.pending_for_lead("lead-2").unwrap().len(), 1);
    }
}
