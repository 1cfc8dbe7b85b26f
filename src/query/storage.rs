//! Cache storage trait and SQLite implementation.
//!
//! Persisted results let a short-lived process start from the last known
//! records instead of an empty cache. Staleness still applies: a hydrated
//! entry older than the stale time is refetched on first observation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::QueryKey;

/// A query result read back from storage.
#[derive(Debug, Clone)]
pub struct StoredQuery {
  /// The cached records in order
  pub records: Vec<Value>,
  /// When the result was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get the stored records for a key.
  fn load(&self, key: &QueryKey) -> Result<Option<StoredQuery>>;

  /// Store records for a key, replacing any previous result.
  fn store(&self, key: &QueryKey, records: &[Value]) -> Result<()>;

  /// Delete every stored key that starts with `prefix`.
  fn remove_matching(&self, prefix: &QueryKey) -> Result<usize>;

  /// Delete everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self, _key: &QueryKey) -> Result<Option<StoredQuery>> {
    Ok(None) // Always miss
  }

  fn store(&self, _key: &QueryKey, _records: &[Value]) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove_matching(&self, _prefix: &QueryKey) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
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

  /// Open a throwaway in-memory database.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("backoffice").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    data BLOB NOT NULL,
    result_count INTEGER NOT NULL,
    cached_at TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn load(&self, key: &QueryKey) -> Result<Option<StoredQuery>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data, cached_at FROM query_cache WHERE query_hash = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![key.cache_hash()], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    let Some((data, cached_at)) = row else {
      return Ok(None);
    };

    let records: Vec<Value> = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize cached records for {}: {}", key, e))?;
    let cached_at = DateTime::parse_from_rfc3339(&cached_at)
      .map_err(|e| eyre!("Failed to parse datetime '{}': {}", cached_at, e))?
      .with_timezone(&Utc);

    Ok(Some(StoredQuery { records, cached_at }))
  }

  fn store(&self, key: &QueryKey, records: &[Value]) -> Result<()> {
    let conn = self.lock()?;

    let data =
      serde_json::to_vec(records).map_err(|e| eyre!("Failed to serialize records: {}", e))?;
    let key_json =
      serde_json::to_string(key).map_err(|e| eyre!("Failed to serialize query key: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_key, data, result_count, cached_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          key.cache_hash(),
          key_json,
          data,
          records.len(),
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store query result: {}", e))?;

    Ok(())
  }

  fn remove_matching(&self, prefix: &QueryKey) -> Result<usize> {
    let conn = self.lock()?;

    let rows: Vec<(String, String)> = {
      let mut stmt = conn
        .prepare("SELECT query_hash, query_key FROM query_cache")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to query cache keys: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      rows
    };

    let mut removed = 0;
    for (hash, key_json) in rows {
      let matches = serde_json::from_str::<QueryKey>(&key_json)
        .map(|key| key.starts_with(prefix))
        // Unreadable rows are dropped along with the matches
        .unwrap_or(true);
      if !matches {
        continue;
      }
      removed += conn
        .execute("DELETE FROM query_cache WHERE query_hash = ?", params![hash])
        .map_err(|e| eyre!("Failed to delete cached query: {}", e))?;
    }

    Ok(removed)
  }

  fn clear(&self) -> Result<()> {
    self
      .lock()?
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    Ok(())
  }
}
