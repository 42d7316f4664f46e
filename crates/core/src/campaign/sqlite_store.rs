//! SQLite-backed campaign store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Campaign, CampaignConfig, CampaignError, CampaignStore};

/// SQLite-backed campaign store.
pub struct SqliteCampaignStore {
    conn: Mutex<Connection>,
}

impl SqliteCampaignStore {
    /// Open (or create) the campaign tables in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, CampaignError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, CampaignError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CampaignError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaign_leads (
                campaign_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                lead_id TEXT NOT NULL,
                PRIMARY KEY (campaign_id, position)
            );

            CREATE INDEX IF NOT EXISTS idx_campaigns_created_at ON campaigns(created_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CampaignError> {
        self.conn
            .lock()
            .map_err(|_| CampaignError::Database("connection mutex poisoned".to_string()))
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Campaign>, CampaignError> {
        let row = conn
            .query_row(
                "SELECT id, name, config, created_at FROM campaigns WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, config_json, created_at)) = row else {
            return Ok(None);
        };

        let config: CampaignConfig = serde_json::from_str(&config_json)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CampaignError::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT lead_id FROM campaign_leads WHERE campaign_id = ? ORDER BY position ASC",
        )?;
        let lead_ids = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Campaign {
            id,
            name,
            lead_ids,
            config,
            created_at,
        }))
    }
}

impl CampaignStore for SqliteCampaignStore {
    fn create(&self, name: &str, config: &CampaignConfig) -> Result<Campaign, CampaignError> {
        let conn = self.conn()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO campaigns (id, name, config, created_at) VALUES (?, ?, ?, ?)",
            params![id, name, serde_json::to_string(config)?, now.to_rfc3339()],
        )?;

        Ok(Campaign {
            id,
            name: name.to_string(),
            lead_ids: Vec::new(),
            config: config.clone(),
            created_at: now,
        })
    }

    fn add_leads(&self, campaign_id: &str, lead_ids: &[String]) -> Result<(), CampaignError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM campaigns WHERE id = ?",
                params![campaign_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(CampaignError::NotFound(campaign_id.to_string()));
        }

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM campaign_leads WHERE campaign_id = ?",
            params![campaign_id],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO campaign_leads (campaign_id, position, lead_id) VALUES (?, ?, ?)",
            )?;
            for (offset, lead_id) in lead_ids.iter().enumerate() {
                stmt.execute(params![campaign_id, next + offset as i64, lead_id])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Campaign>, CampaignError> {
        let conn = self.conn()?;
        Self::load(&conn, id)
    }

    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>, CampaignError> {
        let conn = self.conn()?;

        let ids = {
            let mut stmt = conn
                .prepare("SELECT id FROM campaigns ORDER BY created_at DESC LIMIT ? OFFSET ?")?;
            let ids = stmt
                .query_map(params![limit, offset], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut campaigns = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(campaign) = Self::load(&conn, &id)? {
                campaigns.push(campaign);
            }
        }
        Ok(campaigns)
    }

    fn delete(&self, id: &str) -> Result<bool, CampaignError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM campaign_leads WHERE campaign_id = ?",
            params![id],
        )?;
        let deleted = tx.execute("DELETE FROM campaigns WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::ReplyPolicy;

    #[test]
    fn test_create_and_get() {
        let store = SqliteCampaignStore::in_memory().unwrap();
        let config = CampaignConfig {
            reply_policy: ReplyPolicy::SkipNext,
            ..Default::default()
        };

        let campaign = store.create("Q3 fintech outreach", &config).unwrap();
        let fetched = store.get(&campaign.id).unwrap().unwrap();

        assert_eq!(fetched.name, "Q3 fintech outreach");
        assert_eq!(fetched.config.reply_policy, ReplyPolicy::SkipNext);
        assert!(fetched.lead_ids.is_empty());
    }

    #[test]
    fn test_delete_removes_campaign_and_membership() {
        let store = SqliteCampaignStore::in_memory().unwrap();
        let campaign = store.create("short-lived", &CampaignConfig::default()).unwrap();
        store.add_leads(&campaign.id, &["a".to_string()]).unwrap();

        assert!(store.delete(&campaign.id).unwrap());
        assert!(store.get(&campaign.id).unwrap().is_none());
        assert!(store.list(10, 0).unwrap().is_empty());
        assert!(!store.delete(&campaign.id).unwrap());
    }

    #[test]
    fn test_add_leads_keeps_order() {
        let store = SqliteCampaignStore::in_memory().unwrap();
        let campaign = store.create("ordered", &CampaignConfig::default()).unwrap();

        store
            .add_leads(&campaign.id, &["b".to_string(), "a".to_string()])
            .unwrap();
        store.add_leads(&campaign.id, &["c".to_string()]).unwrap();

        let fetched = store.get(&campaign.id).unwrap().unwrap();
        assert_eq!(fetched.lead_ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_add_leads_unknown_campaign() {
        let store = SqliteCampaignStore::in_memory().unwrap();
        let result = store.add_leads("missing", &["a".to_string()]);
        assert!(matches!(result, Err(CampaignError::NotFound(_))));
    }

    #[test]
    fn test_list_campaigns() {
        let store = SqliteCampaignStore::in_memory().unwrap();
        store.create("one", &CampaignConfig::default()).unwrap();
        store.create("two", &CampaignConfig::default()).unwrap();

        assert_eq!(store.list(10, 0).unwrap().len(), 2);
        assert_eq!(store.list(1, 0).unwrap().len(), 1);
        assert!(store.get("missing").unwrap().is_none());
    }
}
