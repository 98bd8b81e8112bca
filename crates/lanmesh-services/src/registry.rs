//! Persistent host registry.
//!
//! One SQLite table keyed by MAC address; each value is a JSON-encoded
//! [`HostRecord`]. Every public operation runs in a single IMMEDIATE
//! transaction behind one connection mutex, so writes exclude all other
//! registry operations and no caller observes a half-written record.
//! Reads are serialised through the same mutex.
//!
//! ```sql
//! CREATE TABLE hosts (
//!     mac    TEXT PRIMARY KEY,
//!     record TEXT NOT NULL
//! );
//! ```
//!
//! All methods block. Call them from `spawn_blocking` on async paths.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lanmesh_core::HostMetadata;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Everything the registry knows about one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Last accepted announcement.
    pub metadata: HostMetadata,
    /// Unix ms of the first accepted announcement. Never changes.
    pub first_seen: u64,
    /// Unix ms of the most recent accepted announcement.
    pub last_seen: u64,
    pub packet_count: u64,
    pub active: bool,
    pub ssh_key_pushed: bool,
    pub pushed_at: Option<u64>,
}

impl HostRecord {
    pub fn mac(&self) -> &str {
        &self.metadata.mac_address
    }
}

/// What an upsert did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First announcement from this MAC.
    Discovered,
    /// Already active; refreshed.
    Refreshed,
    /// Was inactive; active again.
    Revived,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub total: usize,
    pub active: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to create {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to open registry at {0}: {1}")]
    Open(PathBuf, rusqlite::Error),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to encode host record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("host {0} not found")]
    NotFound(String),
    #[error("registry lock poisoned")]
    Poisoned,
}

/// Handle to the host registry. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Registry {
    conn: Arc<Mutex<Connection>>,
}

impl Registry {
    /// Open (or create) the registry file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| RegistryError::CreateDir(parent.to_path_buf(), e))?;
        }
        let conn =
            Connection::open(path).map_err(|e| RegistryError::Open(path.to_path_buf(), e))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// In-memory registry for tests.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hosts (
                mac    TEXT PRIMARY KEY,
                record TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::Poisoned)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Record an accepted announcement.
    pub fn upsert(&self, metadata: &HostMetadata) -> Result<UpsertOutcome, RegistryError> {
        self.upsert_at(metadata, now_ms())
    }

    /// [`upsert`](Self::upsert) with an explicit clock.
    pub fn upsert_at(
        &self,
        metadata: &HostMetadata,
        now: u64,
    ) -> Result<UpsertOutcome, RegistryError> {
        let mac = metadata.mac_address.as_str();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = load_one(&tx, mac)?;
        let (record, outcome) = match existing {
            Some(mut record) => {
                let outcome = if record.active {
                    UpsertOutcome::Refreshed
                } else {
                    UpsertOutcome::Revived
                };
                record.metadata = metadata.clone();
                record.last_seen = now;
                record.packet_count += 1;
                record.active = true;
                (record, outcome)
            }
            None => (
                HostRecord {
                    metadata: metadata.clone(),
                    first_seen: now,
                    last_seen: now,
                    packet_count: 1,
                    active: true,
                    ssh_key_pushed: false,
                    pushed_at: None,
                },
                UpsertOutcome::Discovered,
            ),
        };

        store_one(&tx, &record)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Flag a host as having received our public key.
    pub fn mark_key_pushed(&self, mac: &str) -> Result<HostRecord, RegistryError> {
        self.mark_key_pushed_at(mac, now_ms())
    }

    pub fn mark_key_pushed_at(&self, mac: &str, now: u64) -> Result<HostRecord, RegistryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut record =
            load_one(&tx, mac)?.ok_or_else(|| RegistryError::NotFound(mac.to_string()))?;
        record.ssh_key_pushed = true;
        record.pushed_at = Some(now);

        store_one(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }

    /// Mark every active host silent for at least `threshold` as inactive.
    /// Returns the MACs that changed.
    pub fn expire_stale(&self, threshold: Duration) -> Result<Vec<String>, RegistryError> {
        self.expire_stale_at(threshold, now_ms())
    }

    pub fn expire_stale_at(
        &self,
        threshold: Duration,
        now: u64,
    ) -> Result<Vec<String>, RegistryError> {
        let threshold_ms = threshold.as_millis() as u64;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut expired = Vec::new();
        for mut record in load_all(&tx)? {
            if record.active && now.saturating_sub(record.last_seen) >= threshold_ms {
                record.active = false;
                store_one(&tx, &record)?;
                expired.push(record.metadata.mac_address);
            }
        }

        tx.commit()?;
        Ok(expired)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Every readable record. Corrupt rows are skipped.
    pub fn get_all(&self) -> Result<Vec<HostRecord>, RegistryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let records = load_all(&tx)?;
        tx.commit()?;
        Ok(records)
    }

    pub fn get_active(&self) -> Result<Vec<HostRecord>, RegistryError> {
        Ok(self.get_all()?.into_iter().filter(|r| r.active).collect())
    }

    pub fn get(&self, mac: &str) -> Result<Option<HostRecord>, RegistryError> {
        let conn = self.lock()?;
        load_one(&conn, mac)
    }

    pub fn counts(&self) -> Result<RegistryCounts, RegistryError> {
        let all = self.get_all()?;
        Ok(RegistryCounts {
            total: all.len(),
            active: all.iter().filter(|r| r.active).count(),
        })
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

/// Fetch one record. A row that fails to parse is treated as absent so the
/// next upsert overwrites it.
fn load_one(conn: &Connection, mac: &str) -> Result<Option<HostRecord>, RegistryError> {
    let raw: Option<String> = conn
        .query_row("SELECT record FROM hosts WHERE mac = ?1", [mac], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(raw.and_then(|text| match serde_json::from_str(&text) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(mac, error = %e, "corrupt host record");
            None
        }
    }))
}

fn load_all(conn: &Connection) -> Result<Vec<HostRecord>, RegistryError> {
    let mut stmt = conn.prepare("SELECT mac, record FROM hosts")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    for (mac, text) in rows {
        match serde_json::from_str::<HostRecord>(&text) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(mac = %mac, error = %e, "skipping corrupt host record"),
        }
    }
    Ok(records)
}

fn store_one(conn: &Connection, record: &HostRecord) -> Result<(), RegistryError> {
    let text = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO hosts (mac, record) VALUES (?1, ?2)
         ON CONFLICT(mac) DO UPDATE SET record = excluded.record",
        params![record.metadata.mac_address, text],
    )?;
    Ok(())
}
