//! Company intel cache.
//!
//! Leads at the same company share one company intel lookup for as long as
//! the cached entry is fresh.

mod sqlite;

pub use sqlite::SqliteIntelCache;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the intel cache.
#[derive(Debug, Error)]
pub enum IntelError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for IntelError {
    fn from(e: rusqlite::Error) -> Self {
        IntelError::Database(e.to_string())
    }
}

/// Company intel fields stored for one company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedIntel {
    /// Normalized company URL.
    pub company_key: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Store for company intel keyed by normalized company URL.
pub trait IntelCache: Send + Sync {
    /// Fresh entry for `company_key`, ignoring entries expired at `now`.
    fn get(&self, company_key: &str, now: DateTime<Utc>)
        -> Result<Option<CachedIntel>, IntelError>;

    /// Insert or replace the entry for `company_key`.
    fn put(&self, entry: &CachedIntel) -> Result<(), IntelError>;

    /// Drop entries expired at `now`. Returns how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, IntelError>;
}

/// Cache key for a company website.
///
/// Scheme, a leading `www.`, query, fragment and trailing slashes are dropped
/// and the result is lowercased, so `https://www.Example.com/` and
/// `example.com` share an entry.
pub fn normalize_company_url(url: &str) -> String {
    let url = url.trim().to_lowercase();
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url.as_str());
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_company_url() {
        assert_eq!(normalize_company_url("https://www.Example.com/"), "example.com");
        assert_eq!(normalize_company_url("http://example.com"), "example.com");
        assert_eq!(normalize_company_url("example.com"), "example.com");
        assert_eq!(
            normalize_company_url("https://example.com/about/?utm_source=x#team"),
            "example.com/about"
        );
        assert_ne!(
            normalize_company_url("https://example.com"),
            normalize_company_url("https://example.org")
        );
    }
}
