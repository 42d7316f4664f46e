//! SQLite-backed company intel cache.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{CachedIntel, IntelCache, IntelError};

/// SQLite-backed company intel cache.
pub struct SqliteIntelCache {
    conn: Mutex<Connection>,
}

impl SqliteIntelCache {
    /// Open (or create) the cache table in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, IntelError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory() -> Result<Self, IntelError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), IntelError> {
        // expires_at is unix milliseconds so that expiry checks are numeric
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS company_intel_cache (
                company_key TEXT PRIMARY KEY,
                fields_json TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_company_intel_expires ON company_intel_cache(expires_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, IntelError> {
        self.conn
            .lock()
            .map_err(|_| IntelError::Database("connection mutex poisoned".to_string()))
    }
}

impl IntelCache for SqliteIntelCache {
    fn get(
        &self,
        company_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedIntel>, IntelError> {
        let conn = self.conn()?;
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT fields_json, fetched_at, expires_at FROM company_intel_cache WHERE company_key = ? AND expires_at > ?",
                params![company_key, now.timestamp_millis()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((fields_json, fetched_at, expires_at)) = row else {
            return Ok(None);
        };
        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| IntelError::Database(format!("invalid fetched_at: {}", e)))?
            .with_timezone(&Utc);
        let expires_at = DateTime::<Utc>::from_timestamp_millis(expires_at)
            .ok_or_else(|| IntelError::Database(format!("invalid expires_at: {}", expires_at)))?;

        Ok(Some(CachedIntel {
            company_key: company_key.to_string(),
            fields: serde_json::from_str(&fields_json)?,
            fetched_at,
            expires_at,
        }))
    }

    fn put(&self, entry: &CachedIntel) -> Result<(), IntelError> {
        let fields_json = serde_json::to_string(&entry.fields)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO company_intel_cache (company_key, fields_json, fetched_at, expires_at) VALUES (?, ?, ?, ?)",
            params![
                entry.company_key,
                fields_json,
                entry.fetched_at.to_rfc3339(),
                entry.expires_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, IntelError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM company_intel_cache WHERE expires_at <= ?",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }
}
