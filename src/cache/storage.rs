//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{CacheEntry, CacheKey};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named partitions, each a key→entry map,
/// plus a small key/value table for lifecycle bookkeeping.
pub trait CacheStorage: Send + Sync {
  /// Names of all partitions that currently exist.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and every entry in it. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;

  /// Look up an entry.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

  /// Store an entry, creating the partition if needed. Overwrites silently.
  fn put(&self, partition: &str, key: &CacheKey, entry: &CacheEntry) -> Result<()>;

  /// Store a batch of entries all-or-nothing.
  fn put_all(&self, partition: &str, entries: &[(CacheKey, CacheEntry)]) -> Result<()>;

  fn get_meta(&self, name: &str) -> Result<Option<String>>;

  fn set_meta(&self, name: &str, value: &str) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open storage at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage that lives only as long as the process.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Response snapshots, one row per (partition, request identity)
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, entry_key)
);

-- Lifecycle bookkeeping (active version and friends)
CREATE TABLE IF NOT EXISTS meta (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn ensure_partition(conn: &Connection, partition: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
      params![partition, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, partition: &str, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (partition, entry_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        key.as_str(),
        entry.url,
        entry.response.status,
        headers,
        entry.response.body,
        entry.cached_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry: {}", e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as usize)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM entries
         WHERE partition = ? AND entry_key = ?",
        params![partition, key.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", url, e))?;
        let cached_at = parse_datetime(&cached_at)?;
        Ok(Some(CacheEntry {
          url,
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, partition: &str, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    ensure_partition(&conn, partition)?;
    insert_entry(&conn, partition, key, entry)
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, CacheEntry)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    for (key, entry) in entries {
      insert_entry(&tx, partition, key, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get_meta(&self, name: &str) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT value FROM meta WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read meta {}: {}", name, e))
  }

  fn set_meta(&self, name: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO meta (name, value) VALUES (?, ?)",
        params![name, value],
      )
      .map_err(|e| eyre!("Failed to write meta {}: {}", name, e))?;

    Ok(())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
