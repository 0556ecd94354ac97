//! SQLite-backed custom blocklist: an administered CIDR table plus a single
//! zone-configuration row. The DNS path only ever reads; admin operations
//! mutate under the store's transactional semantics.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ipnetwork::IpNetwork;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::warn;

use rg_common::ip::{longest_prefix_match, NetworkEntry};

use crate::types::{CustomCheck, CustomEntry, CustomZoneConfig, CUSTOM_RESPONSE_ADDR};

#[derive(Error, Debug)]
pub enum CustomError {
    #[error("custom-RBL database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),
    #[error("duplicate network {0}")]
    Duplicate(String),
    #[error("entry {0} not found")]
    NotFound(i64),
    #[error("no entry for network {0}")]
    NetworkNotFound(String),
}

#[derive(Clone)]
pub struct CustomRblStore {
    conn: Arc<Mutex<Connection>>,
}

impl CustomRblStore {
    pub fn open(path: &str) -> Result<Self, CustomError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn open_memory() -> Result<Self, CustomError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS custom_rbl_entries (
                id INTEGER PRIMARY KEY,
                network TEXT NOT NULL UNIQUE,
                listed INTEGER NOT NULL DEFAULT 1,
                reason TEXT,
                added_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_custom_rbl_listed
                ON custom_rbl_entries(listed);

            CREATE TABLE IF NOT EXISTS custom_rbl_config (
                zone_name TEXT NOT NULL UNIQUE,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 0
            );
            ",
        )
    }

    /// The enabled zone configuration, if any.
    pub fn config(&self) -> Result<Option<CustomZoneConfig>, CustomError> {
        let conn = self.conn.lock().unwrap();
        let config = conn
            .query_row(
                "SELECT zone_name, description, enabled FROM custom_rbl_config
                 WHERE enabled = 1 LIMIT 1",
                [],
                |row| {
                    Ok(CustomZoneConfig {
                        zone_name: row.get(0)?,
                        description: row.get(1)?,
                        enabled: row.get::<_, bool>(2)?,
                    })
                },
            )
            .optional()?;
        Ok(config)
    }

    /// Upsert the configuration row. Enabling a zone disables any other row
    /// first, keeping at most one enabled.
    pub fn set_config(
        &self,
        zone_name: &str,
        description: Option<&str>,
        enabled: bool,
    ) -> Result<(), CustomError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if enabled {
            tx.execute("UPDATE custom_rbl_config SET enabled = 0", [])?;
        }
        tx.execute(
            "INSERT INTO custom_rbl_config (zone_name, description, enabled)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(zone_name) DO UPDATE SET
                 description = excluded.description,
                 enabled = excluded.enabled",
            params![zone_name, description, enabled],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Check an address against the table: longest-prefix match over listed
    /// rows only, ties broken by smallest id.
    pub fn check(&self, ip: IpAddr) -> Result<CustomCheck, CustomError> {
        let candidates = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                "SELECT id, network FROM custom_rbl_entries WHERE listed = 1",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut candidates = Vec::new();
            for row in rows {
                let (id, network) = row?;
                match IpNetwork::from_str(&network) {
                    Ok(net) => candidates.push(NetworkEntry {
                        id,
                        network: net,
                        listed: true,
                    }),
                    Err(_) => warn!("Skipping unparseable custom-RBL network '{}' (id {})", network, id),
                }
            }
            candidates
        };

        let Some(hit) = longest_prefix_match(&candidates, ip) else {
            return Ok(CustomCheck::not_listed());
        };

        let entry = self.get(hit.id)?;
        Ok(CustomCheck {
            listed: true,
            response: Some(CUSTOM_RESPONSE_ADDR),
            reason: entry.reason,
            network: Some(entry.network),
            matched_id: Some(entry.id),
        })
    }

    pub fn get(&self, id: i64) -> Result<CustomEntry, CustomError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, network, listed, reason, added_by, created_at, updated_at
             FROM custom_rbl_entries WHERE id = ?1",
            params![id],
            row_to_entry,
        )
        .optional()?
        .ok_or(CustomError::NotFound(id))
    }

    /// Insert a network. Bare addresses are accepted as host routes; the
    /// network is normalised (host bits cleared) before storage so that two
    /// spellings of one block collide.
    pub fn add(
        &self,
        cidr: &str,
        reason: Option<&str>,
        added_by: Option<&str>,
    ) -> Result<CustomEntry, CustomError> {
        let network = normalize_cidr(cidr)?;
        let network_text = network.to_string();
        let now = Utc::now().timestamp();

        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM custom_rbl_entries WHERE network = ?1)",
            params![network_text],
            |row| row.get(0),
        )?;
        if exists {
            return Err(CustomError::Duplicate(network_text));
        }

        conn.execute(
            "INSERT INTO custom_rbl_entries (network, listed, reason, added_by, created_at, updated_at)
             VALUES (?1, 1, ?2, ?3, ?4, ?4)",
            params![network_text, reason, added_by, now],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get(id)
    }

    pub fn remove_by_id(&self, id: i64) -> Result<(), CustomError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM custom_rbl_entries WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(CustomError::NotFound(id));
        }
        Ok(())
    }

    pub fn remove_by_cidr(&self, cidr: &str) -> Result<(), CustomError> {
        let network = normalize_cidr(cidr)?;
        let network_text = network.to_string();
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM custom_rbl_entries WHERE network = ?1",
            params![network_text],
        )?;
        if count == 0 {
            return Err(CustomError::NetworkNotFound(network_text));
        }
        Ok(())
    }

    pub fn set_reason(&self, id: i64, reason: Option<&str>) -> Result<(), CustomError> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE custom_rbl_entries SET reason = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, reason, now],
        )?;
        if count == 0 {
            return Err(CustomError::NotFound(id));
        }
        Ok(())
    }

    pub fn set_listed(&self, id: i64, listed: bool) -> Result<(), CustomError> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE custom_rbl_entries SET listed = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, listed, now],
        )?;
        if count == 0 {
            return Err(CustomError::NotFound(id));
        }
        Ok(())
    }

    /// Page through entries in id order; returns the page and the total count.
    pub fn list(&self, offset: u32, limit: u32) -> Result<(Vec<CustomEntry>, u64), CustomError> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM custom_rbl_entries", [], |row| row.get(0))?;

        let mut stmt = conn.prepare_cached(
            "SELECT id, network, listed, reason, added_by, created_at, updated_at
             FROM custom_rbl_entries ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok((entries, total as u64))
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CustomEntry> {
    let network_text: String = row.get(1)?;
    let network = IpNetwork::from_str(&network_text).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("bad network '{}'", network_text).into(),
        )
    })?;
    Ok(CustomEntry {
        id: row.get(0)?,
        network,
        listed: row.get(2)?,
        reason: row.get(3)?,
        added_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Parse and normalise administrative CIDR input: accept `net/prefix` or a
/// bare address (host prefix), clear host bits.
fn normalize_cidr(input: &str) -> Result<IpNetwork, CustomError> {
    let network = match IpNetwork::from_str(input.trim()) {
        Ok(net) => net,
        Err(_) => {
            let ip: IpAddr = input
                .trim()
                .parse()
                .map_err(|_| CustomError::InvalidCidr(input.to_string()))?;
            let prefix = match ip {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            IpNetwork::new(ip, prefix).map_err(|_| CustomError::InvalidCidr(input.to_string()))?
        }
    };
    // clear host bits so 10.1.2.3/8 and 10.0.0.0/8 are the same row
    IpNetwork::new(network.network(), network.prefix())
        .map_err(|_| CustomError::InvalidCidr(input.to_string()))
}
