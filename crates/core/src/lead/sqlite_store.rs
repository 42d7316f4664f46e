//! SQLite-backed lead store implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{
    AttemptStatus, CreateLeadRequest, ErrorDetail, ErrorKind, HistoryEntry, Lead, LeadError, LeadFilter,
    LeadStore, Stage, StageAttempt, Transition,
};

const LEAD_COLUMNS: &str = "id, campaign_id, profile, enrichment, qualification, drafts, stage, created_at, updated_at";
const ATTEMPT_COLUMNS: &str =
    "lead_id, stage, attempt_number, status, error, started_at, completed_at";

/// SQLite-backed lead store.
pub struct SqliteLeadStore {
    conn: Mutex<Connection>,
}

impl SqliteLeadStore {
    /// Create a new SQLite lead store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, LeadError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite lead store (useful for testing).
    pub fn in_memory() -> Result<Self, LeadError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LeadError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                campaign_id TEXT,
                profile TEXT NOT NULL,
                enrichment TEXT NOT NULL,
                qualification TEXT,
                drafts TEXT NOT NULL,
                stage TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_leads_campaign ON leads(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads(stage);

            CREATE TABLE IF NOT EXISTS lead_history (
                lead_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                from_stage TEXT,
                to_stage TEXT NOT NULL,
                at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                attempt_number INTEGER,
                PRIMARY KEY (lead_id, seq)
            );

            CREATE TABLE IF NOT EXISTS stage_attempts (
                lead_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                attempt_number INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (lead_id, stage, attempt_number)
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_status ON stage_attempts(status);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LeadError> {
        self.conn
            .lock()
            .map_err(|_| LeadError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &LeadFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref campaign_id) = filter.campaign_id {
            conditions.push("campaign_id = ?".to_string());
            params.push(Box::new(campaign_id.clone()));
        }

        if let Some(stage) = filter.stage {
            conditions.push("stage = ?".to_string());
            params.push(Box::new(stage.as_str()));
        }

        if filter.non_terminal {
            let terminal: Vec<String> = Stage::ALL
                .iter()
                .filter(|s| s.is_terminal())
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            conditions.push(format!("stage NOT IN ({})", terminal.join(", ")));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_lead(row: &rusqlite::Row) -> rusqlite::Result<Lead> {
        Ok(Lead {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            profile: json_column(row, 2)?,
            enrichment: json_column(row, 3)?,
            qualification: optional_json_column(row, 4)?,
            drafts: json_column(row, 5)?,
            stage: stage_column(row, 6)?,
            history: Vec::new(),
            created_at: timestamp_column(row, 7)?,
            updated_at: timestamp_column(row, 8)?,
        })
    }

    fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
        let from: Option<String> = row.get(1)?;
        let from = match from {
            Some(s) => Some(
                s.parse::<Stage>()
                    .map_err(|e| conversion_error(1, e.into()))?,
            ),
            None => None,
        };
        Ok(HistoryEntry {
            seq: row.get(0)?,
            from,
            to: stage_column(row, 2)?,
            at: timestamp_column(row, 3)?,
            outcome: row.get(4)?,
            attempt_number: row.get(5)?,
        })
    }

    fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<StageAttempt> {
        let status: String = row.get(3)?;
        let completed_at: Option<String> = row.get(6)?;
        Ok(StageAttempt {
            lead_id: row.get(0)?,
            stage: stage_column(row, 1)?,
            attempt_number: row.get(2)?,
            status: status
                .parse::<AttemptStatus>()
                .map_err(|e| conversion_error(3, e.into()))?,
            error: optional_json_column::<ErrorDetail>(row, 4)?,
            started_at: timestamp_column(row, 5)?,
            completed_at: completed_at
                .map(|s| parse_timestamp(&s).map_err(|e| conversion_error(6, e)))
                .transpose()?,
        })
    }

    fn load_lead(conn: &Connection, id: &str) -> Result<Option<Lead>, LeadError> {
        let lead = conn
            .query_row(
                &format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS),
                params![id],
                Self::row_to_lead,
            )
            .optional()?;

        match lead {
            Some(mut lead) => {
                lead.history = Self::load_history(conn, id)?;
                Ok(Some(lead))
            }
            None => Ok(None),
        }
    }

    fn load_history(conn: &Connection, lead_id: &str) -> Result<Vec<HistoryEntry>, LeadError> {
        let mut stmt = conn.prepare(
            "SELECT seq, from_stage, to_stage, at, outcome, attempt_number FROM lead_history WHERE lead_id = ? ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![lead_id], Self::row_to_history)?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }

    fn current_stage(tx: &Transaction, lead_id: &str) -> Result<Stage, LeadError> {
        let stage: Option<String> = tx
            .query_row(
                "SELECT stage FROM leads WHERE id = ?",
                params![lead_id],
                |row| row.get(0),
            )
            .optional()?;
        let stage = stage.ok_or_else(|| LeadError::NotFound(lead_id.to_string()))?;
        stage.parse::<Stage>().map_err(LeadError::Database)
    }

    fn max_attempt(tx: &Transaction, lead_id: &str, stage: Stage) -> Result<u32, LeadError> {
        let max: Option<u32> = tx.query_row(
            "SELECT MAX(attempt_number) FROM stage_attempts WHERE lead_id = ? AND stage = ?",
            params![lead_id, stage.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// Insert or update an attempt, keeping attempt numbers dense and increasing.
    ///
    /// Only a pending attempt may be updated; completed attempts are final.
    fn upsert_attempt(tx: &Transaction, attempt: &StageAttempt) -> Result<(), LeadError> {
        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM stage_attempts WHERE lead_id = ? AND stage = ? AND attempt_number = ?",
                params![attempt.lead_id, attempt.stage.as_str(), attempt.attempt_number],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(status) = existing {
            if status != AttemptStatus::Pending.as_str() {
                return Err(LeadError::AttemptConflict {
                    lead_id: attempt.lead_id.clone(),
                    stage: attempt.stage,
                    attempt_number: attempt.attempt_number,
                });
            }
        }

        let max = Self::max_attempt(tx, &attempt.lead_id, attempt.stage)?;
        if attempt.attempt_number == 0 || attempt.attempt_number > max + 1 {
            return Err(LeadError::InvalidAttempt {
                lead_id: attempt.lead_id.clone(),
                reason: format!(
                    "attempt {} for stage {} does not follow {}",
                    attempt.attempt_number, attempt.stage, max
                ),
            });
        }

        let error_json = attempt.error.as_ref().map(serde_json::to_string).transpose()?;

        tx.execute(
            r#"
            INSERT INTO stage_attempts (lead_id, stage, attempt_number, status, error, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(lead_id, stage, attempt_number) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                completed_at = excluded.completed_at
            "#,
            params![
                attempt.lead_id,
                attempt.stage.as_str(),
                attempt.attempt_number,
                attempt.status.as_str(),
                error_json,
                attempt.started_at.to_rfc3339(),
                attempt.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn append_history(
        tx: &Transaction,
        lead_id: &str,
        from: Option<Stage>,
        to: Stage,
        at: DateTime<Utc>,
        outcome: &str,
        attempt_number: Option<u32>,
    ) -> Result<(), LeadError> {
        let next_seq: u32 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM lead_history WHERE lead_id = ?",
            params![lead_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO lead_history (lead_id, seq, from_stage, to_stage, at, outcome, attempt_number) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                lead_id,
                next_seq,
                from.map(|s| s.as_str()),
                to.as_str(),
                at.to_rfc3339(),
                outcome,
                attempt_number,
            ],
        )?;
        Ok(())
    }
}

impl LeadStore for SqliteLeadStore {
    fn create(&self, request: CreateLeadRequest) -> Result<Lead, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        tx.execute(
            &format!(
                "INSERT INTO leads ({}) VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?)",
                LEAD_COLUMNS
            ),
            params![
                id,
                request.campaign_id,
                serde_json::to_string(&request.profile)?,
                "{}",
                "[]",
                Stage::New.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Self::append_history(&tx, &id, None, Stage::New, now, "created", None)?;
        tx.commit()?;

        Ok(Lead {
            id,
            campaign_id: request.campaign_id,
            profile: request.profile,
            enrichment: Default::default(),
            qualification: None,
            drafts: Vec::new(),
            stage: Stage::New,
            history: vec![HistoryEntry {
                seq: 0,
                from: None,
                to: Stage::New,
                at: now,
                outcome: "created".to_string(),
                attempt_number: None,
            }],
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Lead>, LeadError> {
        let conn = self.conn()?;
        Self::load_lead(&conn, id)
    }

    fn list(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM leads {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            LEAD_COLUMNS, where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_lead)?;

        let mut leads = Vec::new();
        for row in rows {
            let mut lead = row?;
            lead.history = Self::load_history(&conn, &lead.id)?;
            leads.push(lead);
        }
        Ok(leads)
    }

    fn count_by_stage(&self, campaign_id: Option<&str>) -> Result<BTreeMap<Stage, u64>, LeadError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT stage, COUNT(*) FROM leads WHERE (?1 IS NULL OR campaign_id = ?1) GROUP BY stage",
        )?;
        let rows = stmt.query_map(params![campaign_id], |row| {
            Ok((stage_column(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (stage, count) = row?;
            counts.insert(stage, count as u64);
        }
        Ok(counts)
    }

    fn attempts(
        &self,
        lead_id: &str,
        stage: Option<Stage>,
    ) -> Result<Vec<StageAttempt>, LeadError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_attempts WHERE lead_id = ?1 AND (?2 IS NULL OR stage = ?2) ORDER BY started_at ASC, attempt_number ASC",
            ATTEMPT_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![lead_id, stage.map(|s| s.as_str())],
            Self::row_to_attempt,
        )?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?);
        }
        Ok(attempts)
    }

    fn last_attempt_number(&self, lead_id: &str, stage: Stage) -> Result<u32, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::max_attempt(&tx, lead_id, stage)
    }

    fn compare_and_transition(
        &self,
        lead_id: &str,
        expected: Stage,
        transition: Transition,
    ) -> Result<bool, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = Self::current_stage(&tx, lead_id)?;
        if current != expected {
            return Ok(false);
        }
        if !expected.can_transition_to(transition.to) {
            return Err(LeadError::IllegalTransition {
                lead_id: lead_id.to_string(),
                from: expected,
                to: transition.to,
            });
        }

        let attempt_number = match transition.attempt {
            Some(ref attempt) => {
                if attempt.lead_id != lead_id || attempt.stage != expected {
                    return Err(LeadError::InvalidAttempt {
                        lead_id: lead_id.to_string(),
                        reason: format!(
                            "attempt for {}/{} recorded on transition out of {}",
                            attempt.lead_id, attempt.stage, expected
                        ),
                    });
                }
                Self::upsert_attempt(&tx, attempt)?;
                Some(attempt.attempt_number)
            }
            None => None,
        };

        let now = Utc::now();

        // Leaving a stage abandons whatever was still in flight for it
        let abandoned = ErrorDetail::new(ErrorKind::Transient, "abandoned: lead left the stage");
        tx.execute(
            "UPDATE stage_attempts SET status = ?, error = ?, completed_at = ? WHERE lead_id = ? AND stage = ? AND status = 'pending'",
            params![
                AttemptStatus::Failed.as_str(),
                serde_json::to_string(&abandoned)?,
                now.to_rfc3339(),
                lead_id,
                expected.as_str(),
            ],
        )?;

        if transition.patch.is_empty() {
            tx.execute(
                "UPDATE leads SET stage = ?, updated_at = ? WHERE id = ?",
                params![transition.to.as_str(), now.to_rfc3339(), lead_id],
            )?;
        } else {
            let mut lead = tx
                .query_row(
                    &format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS),
                    params![lead_id],
                    Self::row_to_lead,
                )?;
            transition.patch.apply(&mut lead);
            tx.execute(
                "UPDATE leads SET stage = ?, enrichment = ?, qualification = ?, drafts = ?, updated_at = ? WHERE id = ?",
                params![
                    transition.to.as_str(),
                    serde_json::to_string(&lead.enrichment)?,
                    lead.qualification.as_ref().map(serde_json::to_string).transpose()?,
                    serde_json::to_string(&lead.drafts)?,
                    now.to_rfc3339(),
                    lead_id,
                ],
            )?;
        }

        Self::append_history(
            &tx,
            lead_id,
            Some(expected),
            transition.to,
            now,
            &transition.outcome,
            attempt_number,
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn record_attempt(
        &self,
        lead_id: &str,
        expected: Stage,
        attempt: &StageAttempt,
    ) -> Result<bool, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if Self::current_stage(&tx, lead_id)? != expected {
            return Ok(false);
        }
        Self::upsert_attempt(&tx, attempt)?;
        tx.execute(
            "UPDATE leads SET updated_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), lead_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn reserve_attempt(
        &self,
        lead_id: &str,
        stage: Stage,
    ) -> Result<Option<StageAttempt>, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if Self::current_stage(&tx, lead_id)? != stage {
            return Ok(None);
        }

        let pending: i64 = tx.query_row(
            "SELECT COUNT(*) FROM stage_attempts WHERE lead_id = ? AND stage = ? AND status = 'pending'",
            params![lead_id, stage.as_str()],
            |row| row.get(0),
        )?;
        if pending > 0 {
            return Ok(None);
        }

        let number = Self::max_attempt(&tx, lead_id, stage)? + 1;
        let attempt = StageAttempt::pending(lead_id, stage, number);
        Self::upsert_attempt(&tx, &attempt)?;
        tx.commit()?;
        Ok(Some(attempt))
    }

    fn pending_attempts(&self) -> Result<Vec<StageAttempt>, LeadError> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT a.lead_id, a.stage, a.attempt_number, a.status, a.error, a.started_at, a.completed_at
            FROM stage_attempts a
            JOIN leads l ON l.id = a.lead_id
            WHERE a.status = 'pending' AND l.stage = a.stage
            ORDER BY a.started_at ASC
            "#,
        )?;
        let rows = stmt.query_map([], Self::row_to_attempt)?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?);
        }
        Ok(attempts)
    }

    fn delete(&self, id: &str) -> Result<bool, LeadError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM stage_attempts WHERE lead_id = ?", params![id])?;
        tx.execute("DELETE FROM lead_history WHERE lead_id = ?", params![id])?;
        let deleted = tx.execute("DELETE FROM leads WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

fn conversion_error(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn timestamp_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_timestamp(&s).map_err(|e| conversion_error(idx, e))
}

fn stage_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Stage> {
    let s: String = row.get(idx)?;
    s.parse::<Stage>().map_err(|e| conversion_error(idx, e.into()))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn optional_json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, Box::new(e))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::{
        EnrichedField, LeadPatch, LeadProfile, Qualification, QualificationVerdict,
    };

    fn create_test_store() -> SqliteLeadStore {
        SqliteLeadStore::in_memory().unwrap()
    }

    fn create_test_request() -> CreateLeadRequest {
        CreateLeadRequest::new(
            LeadProfile::new("Grace Hopper")
                .with_email("grace@example.com")
                .with_company("Acme Systems", Some("https://acme.example".to_string())),
        )
    }

    fn succeeded(lead_id: &str, stage: Stage, number: u32) -> StageAttempt {
        StageAttempt::pending(lead_id, stage, number).succeed()
    }

    #[test]
    fn test_create_lead() {
        let store = create_test_store();
        let lead = store.create(create_test_request().in_campaign("c-1")).unwrap();

        assert!(!lead.id.is_empty());
        assert_eq!(lead.stage, Stage::New);
        assert_eq!(lead.campaign_id.as_deref(), Some("c-1"));
        assert_eq!(lead.history.len(), 1);
        assert_eq!(lead.history[0].from, None);

        let fetched = store.get(&lead.id).unwrap().unwrap();
        assert_eq!(fetched, lead_with_stored_precision(&lead, &fetched));
    }

    // RFC3339 storage keeps sub-second precision, so compare the rest field by field.
    fn lead_with_stored_precision(created: &Lead, fetched: &Lead) -> Lead {
        let mut expected = created.clone();
        expected.created_at = fetched.created_at;
        expected.updated_at = fetched.updated_at;
        expected.history[0].at = fetched.history[0].at;
        expected
    }

    #[test]
    fn test_get_missing_lead() {
        let store = create_test_store();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_delete_lead_removes_history_and_attempts() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();
        store.reserve_attempt(&lead.id, Stage::New).unwrap().unwrap();

        assert!(store.delete(&lead.id).unwrap());
        assert!(store.get(&lead.id).unwrap().is_none());
        assert!(store.attempts(&lead.id, None).unwrap().is_empty());
        assert!(store.pending_attempts().unwrap().is_empty());
        assert!(!store.delete(&lead.id).unwrap());
    }

    #[test]
    fn test_transition_writes_patch_attempt_and_history() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let mut patch = LeadPatch::default();
        patch
            .enrichment
            .insert("title".to_string(), EnrichedField::new("CTO", "linkedin"));
        let moved = store
            .compare_and_transition(
                &lead.id,
                Stage::New,
                Transition::new(Stage::Enriched, "enriched")
                    .with_attempt(succeeded(&lead.id, Stage::New, 1))
                    .with_patch(patch),
            )
            .unwrap();
        assert!(moved);

        let lead = store.get(&lead.id).unwrap().unwrap();
        assert_eq!(lead.stage, Stage::Enriched);
        assert_eq!(lead.enrichment["title"].value, "CTO");
        assert_eq!(lead.history.len(), 2);
        assert_eq!(lead.history[1].from, Some(Stage::New));
        assert_eq!(lead.history[1].to, Stage::Enriched);
        assert_eq!(lead.history[1].attempt_number, Some(1));

        let attempts = store.attempts(&lead.id, Some(Stage::New)).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Success);
    }

    #[test]
    fn test_stale_transition_returns_false() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let moved = store
            .compare_and_transition(
                &lead.id,
                Stage::Enriched,
                Transition::new(Stage::Qualified, "qualified"),
            )
            .unwrap();
        assert!(!moved);
        assert_eq!(store.get(&lead.id).unwrap().unwrap().stage, Stage::New);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let result = store.compare_and_transition(
            &lead.id,
            Stage::New,
            Transition::new(Stage::EmailSent, "skip ahead"),
        );
        assert!(matches!(result, Err(LeadError::IllegalTransition { .. })));
        assert_eq!(store.get(&lead.id).unwrap().unwrap().history.len(), 1);
    }

    #[test]
    fn test_transition_missing_lead() {
        let store = create_test_store();
        let result =
            store.compare_and_transition("nope", Stage::New, Transition::new(Stage::Failed, "x"));
        assert!(matches!(result, Err(LeadError::NotFound(_))));
    }

    #[test]
    fn test_qualification_patch_persisted() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();
        store
            .compare_and_transition(&lead.id, Stage::New, Transition::new(Stage::Enriched, "ok"))
            .unwrap();

        let patch = LeadPatch {
            qualification: Some(Qualification {
                score: 82,
                rationale: "Decision maker at target company".to_string(),
                verdict: QualificationVerdict::Accepted,
                qualified_at: Utc::now(),
            }),
            ..Default::default()
        };
        store
            .compare_and_transition(
                &lead.id,
                Stage::Enriched,
                Transition::new(Stage::Qualified, "qualified").with_patch(patch),
            )
            .unwrap();

        let lead = store.get(&lead.id).unwrap().unwrap();
        assert_eq!(lead.qualification.unwrap().score, 82);
    }

    #[test]
    fn test_attempt_numbers_must_be_dense() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let skipped = StageAttempt::pending(&lead.id, Stage::New, 3);
        let result = store.record_attempt(&lead.id, Stage::New, &skipped);
        assert!(matches!(result, Err(LeadError::InvalidAttempt { .. })));

        let first = StageAttempt::pending(&lead.id, Stage::New, 1)
            .fail(ErrorDetail::new(ErrorKind::Transient, "timeout"));
        assert!(store.record_attempt(&lead.id, Stage::New, &first).unwrap());
        assert_eq!(store.last_attempt_number(&lead.id, Stage::New).unwrap(), 1);
    }

    #[test]
    fn test_record_attempt_stale_stage() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let attempt = StageAttempt::pending(&lead.id, Stage::Enriched, 1);
        assert!(!store.record_attempt(&lead.id, Stage::Enriched, &attempt).unwrap());
        assert!(store.attempts(&lead.id, None).unwrap().is_empty());
    }

    #[test]
    fn test_reserve_attempt_is_exclusive() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let first = store.reserve_attempt(&lead.id, Stage::New).unwrap();
        assert_eq!(first.as_ref().map(|a| a.attempt_number), Some(1));
        assert!(store.reserve_attempt(&lead.id, Stage::New).unwrap().is_none());
        assert_eq!(store.pending_attempts().unwrap().len(), 1);

        let failed = first
            .unwrap()
            .fail(ErrorDetail::new(ErrorKind::Transient, "503"));
        store.record_attempt(&lead.id, Stage::New, &failed).unwrap();

        let second = store.reserve_attempt(&lead.id, Stage::New).unwrap().unwrap();
        assert_eq!(second.attempt_number, 2);
        assert!(store.reserve_attempt(&lead.id, Stage::Enriched).unwrap().is_none());
    }

    #[test]
    fn test_completed_attempt_is_final() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();

        let failed = StageAttempt::pending(&lead.id, Stage::New, 1)
            .fail(ErrorDetail::new(ErrorKind::Transient, "timeout"));
        store.record_attempt(&lead.id, Stage::New, &failed).unwrap();

        let result = store.compare_and_transition(
            &lead.id,
            Stage::New,
            Transition::new(Stage::Enriched, "ok").with_attempt(succeeded(&lead.id, Stage::New, 1)),
        );
        assert!(matches!(result, Err(LeadError::AttemptConflict { .. })));
        assert_eq!(store.get(&lead.id).unwrap().unwrap().stage, Stage::New);
    }

    #[test]
    fn test_leaving_stage_abandons_pending_attempt() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();
        store.reserve_attempt(&lead.id, Stage::New).unwrap().unwrap();

        store
            .compare_and_transition(&lead.id, Stage::New, Transition::new(Stage::Failed, "x"))
            .unwrap();

        let attempts = store.attempts(&lead.id, Some(Stage::New)).unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert!(attempts[0].error.is_some());
    }

    #[test]
    fn test_pending_attempts_ignore_moved_leads() {
        let store = create_test_store();
        let lead = store.create(create_test_request()).unwrap();
        store.reserve_attempt(&lead.id, Stage::New).unwrap();
        store
            .compare_and_transition(&lead.id, Stage::New, Transition::new(Stage::Failed, "x"))
            .unwrap();

        assert!(store.pending_attempts().unwrap().is_empty());
    }

    #[test]
    fn test_list_and_count_by_stage() {
        let store = create_test_store();
        let a = store.create(create_test_request().in_campaign("c-1")).unwrap();
        store.create(create_test_request().in_campaign("c-1")).unwrap();
        store.create(create_test_request().in_campaign("c-2")).unwrap();
        store
            .compare_and_transition(&a.id, Stage::New, Transition::new(Stage::Failed, "boom"))
            .unwrap();

        let campaign = store
            .list(&LeadFilter::new().with_campaign("c-1"))
            .unwrap();
        assert_eq!(campaign.len(), 2);
        assert_eq!(campaign[0].id, a.id);

        let active = store
            .list(&LeadFilter::new().with_campaign("c-1").non_terminal())
            .unwrap();
        assert_eq!(active.len(), 1);

        let counts = store.count_by_stage(Some("c-1")).unwrap();
        assert_eq!(counts.get(&Stage::New), Some(&1));
        assert_eq!(counts.get(&Stage::Failed), Some(&1));

        let all = store.count_by_stage(None).unwrap();
        assert_eq!(all.values().sum::<u64>(), 3);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads.db");

        let id = {
            let store = SqliteLeadStore::new(&path).unwrap();
            store.create(create_test_request()).unwrap().id
        };

        let store = SqliteLeadStore::new(&path).unwrap();
        let lead = store.get(&id).unwrap().unwrap();
        assert_eq!(lead.profile.name, "Grace Hopper");
    }
}
