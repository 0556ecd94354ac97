//! Durable tier: SQLite-backed cache table, authoritative across restarts.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::entry::{CacheEntry, CacheStats, ListStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl CacheStore {
    /// Open (or create) the cache database at `path` and enable WAL mode.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rbl_cache (
                id INTEGER PRIMARY KEY,
                ip TEXT NOT NULL,
                rbl TEXT NOT NULL,
                listed INTEGER NOT NULL DEFAULT 0,
                response TEXT,
                error TEXT,
                ttl INTEGER NOT NULL,
                cached_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                UNIQUE(ip, rbl)
            );

            CREATE INDEX IF NOT EXISTS idx_rbl_cache_expires
                ON rbl_cache(expires_at);
            ",
        )
    }

    /// Fetch the non-expired entry for a key, if any.
    pub fn get(&self, ip: &str, rbl: &str, now: i64) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT ip, rbl, listed, response, error, ttl, cached_at, expires_at
                 FROM rbl_cache
                 WHERE ip = ?1 AND rbl = ?2 AND expires_at > ?3",
                params![ip, rbl, now],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert or replace the entry for its key.
    pub fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rbl_cache (ip, rbl, listed, response, error, ttl, cached_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(ip, rbl) DO UPDATE SET
                 listed = excluded.listed,
                 response = excluded.response,
                 error = excluded.error,
                 ttl = excluded.ttl,
                 cached_at = excluded.cached_at,
                 expires_at = excluded.expires_at",
            params![
                entry.ip,
                entry.rbl,
                entry.status == ListStatus::Listed,
                entry.response.map(|ip| ip.to_string()),
                entry.error,
                entry.ttl,
                entry.cached_at,
                entry.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn clean_expired(&self, now: i64) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM rbl_cache WHERE expires_at <= ?1", params![now])?;
        Ok(count)
    }

    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM rbl_cache", [])?;
        Ok(count)
    }

    pub fn clear_by_ip(&self, ip: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM rbl_cache WHERE ip = ?1", params![ip])?;
        Ok(count)
    }

    pub fn stats(&self, now: i64) -> Result<CacheStats, StoreError> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN expires_at <= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN error IS NULL AND listed = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN error IS NULL AND listed = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM rbl_cache",
            params![now],
            |row| {
                Ok(CacheStats {
                    total: row.get::<_, i64>(0)? as u64,
                    valid: row.get::<_, i64>(1)? as u64,
                    expired: row.get::<_, i64>(2)? as u64,
                    listed: row.get::<_, i64>(3)? as u64,
                    not_listed: row.get::<_, i64>(4)? as u64,
                    errors: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let listed: bool = row.get(2)?;
    let response: Option<String> = row.get(3)?;
    let error: Option<String> = row.get(4)?;

    let status = if error.is_some() {
        ListStatus::Error
    } else if listed {
        ListStatus::Listed
    } else {
        ListStatus::NotListed
    };

    Ok(CacheEntry {
        ip: row.get(0)?,
        rbl: row.get(1)?,
        status,
        response: response.and_then(|s| s.parse::<Ipv4Addr>().ok()),
        error,
        ttl: row.get(5)?,
        cached_at: row.get(6)?,
        expires_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ip: &str, rbl: &str, status: ListStatus, ttl: u32, now: i64) -> CacheEntry {
        let (response, error) = match status {
            ListStatus::Listed => (Some(Ipv4Addr::new(127, 0, 0, 2)), None),
            ListStatus::NotListed => (None, None),
            ListStatus::Error => (None, Some("timeout".to_string())),
        };
        CacheEntry::new(ip.to_string(), rbl.to_string(), status, response, error, ttl, now)
    }

    #[test]
    fn test_upsert_and_get() {
        let store = CacheStore::open_memory().unwrap();
        store
            .upsert(&entry("127.0.0.2", "zen.spamhaus.org", ListStatus::Listed, 900, 1000))
            .unwrap();

        let hit = store.get("127.0.0.2", "zen.spamhaus.org", 1500).unwrap().unwrap();
        assert_eq!(hit.status, ListStatus::Listed);
        assert_eq!(hit.response, Some(Ipv4Addr::new(127, 0, 0, 2)));
        assert_eq!(hit.ttl, 900);
        assert_eq!(hit.expires_at, 1900);

        // expired entries are never returned
        assert!(store.get("127.0.0.2", "zen.spamhaus.org", 1900).unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = CacheStore::open_memory().unwrap();
        let e = entry("1.2.3.4", "bl.example.org", ListStatus::NotListed, 3600, 1000);
        store.upsert(&e).unwrap();
        store.upsert(&e).unwrap();

        let stats = store.stats(1000).unwrap();
        assert_eq!(stats.total, 1);
        let hit = store.get("1.2.3.4", "bl.example.org", 1001).unwrap().unwrap();
        assert_eq!(hit.status, ListStatus::NotListed);
        assert_eq!(hit.response, None);
        assert_eq!(hit.error, None);
    }

    #[test]
    fn test_upsert_replaces_classification() {
        let store = CacheStore::open_memory().unwrap();
        store
            .upsert(&entry("1.2.3.4", "bl.example.org", ListStatus::Error, 300, 1000))
            .unwrap();
        store
            .upsert(&entry("1.2.3.4", "bl.example.org", ListStatus::Listed, 900, 1100))
            .unwrap();

        let hit = store.get("1.2.3.4", "bl.example.org", 1101).unwrap().unwrap();
        assert_eq!(hit.status, ListStatus::Listed);
        assert_eq!(hit.error, None);
        assert_eq!(hit.cached_at, 1100);
    }

    #[test]
    fn test_clean_expired() {
        let store = CacheStore::open_memory().unwrap();
        store.upsert(&entry("1.1.1.1", "bl", ListStatus::Listed, 100, 1000)).unwrap();
        store.upsert(&entry("2.2.2.2", "bl", ListStatus::Listed, 5000, 1000)).unwrap();

        assert_eq!(store.clean_expired(2000).unwrap(), 1);
        assert_eq!(store.stats(2000).unwrap().total, 1);
    }

    #[test]
    fn test_clear_by_ip() {
        let store = CacheStore::open_memory().unwrap();
        store.upsert(&entry("1.2.3.4", "a.example", ListStatus::Listed, 600, 1000)).unwrap();
        store.upsert(&entry("1.2.3.4", "b.example", ListStatus::NotListed, 600, 1000)).unwrap();
        store.upsert(&entry("5.6.7.8", "a.example", ListStatus::Listed, 600, 1000)).unwrap();

        assert_eq!(store.clear_by_ip("1.2.3.4").unwrap(), 2);
        assert_eq!(store.stats(1000).unwrap().total, 1);
    }

    #[test]
    fn test_stats_breakdown() {
        let store = CacheStore::open_memory().unwrap();
        store.upsert(&entry("1.1.1.1", "bl", ListStatus::Listed, 600, 1000)).unwrap();
        store.upsert(&entry("2.2.2.2", "bl", ListStatus::NotListed, 600, 1000)).unwrap();
        store.upsert(&entry("3.3.3.3", "bl", ListStatus::Error, 100, 1000)).unwrap();

        let stats = store.stats(1200).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.listed, 1);
        assert_eq!(stats.not_listed, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_stats_empty() {
        let store = CacheStore::open_memory().unwrap();
        assert_eq!(store.stats(1000).unwrap(), CacheStats::default());
    }
}
