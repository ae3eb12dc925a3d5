//! Cache storage trait and its backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::Cacheable;

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was last written by an authoritative fetch
  pub cached_at: DateTime<Utc>,
  /// Explicitly marked stale; the next read goes to the network
  pub invalidated: bool,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get a single entity by key.
  fn get_entity<T: Cacheable>(&self, key: &str) -> Result<Option<CachedEntity<T>>>;

  /// Store a single entity, resetting its age and clearing any invalidation.
  fn store_entity<T: Cacheable>(&self, key: &str, entity: &T) -> Result<()>;

  /// Read-modify-write an entity as one step. Returns the new value, or `None`
  /// when nothing is cached under `key` (in which case `f` is not called).
  /// The entity's age is left untouched.
  fn update_entity<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T;

  /// Mark an entity stale without dropping it.
  fn invalidate<T: Cacheable>(&self, key: &str) -> Result<()>;

  /// Drop every cached entity.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_entity<T: Cacheable>(&self, _key: &str) -> Result<Option<CachedEntity<T>>> {
    Ok(None) // Always miss
  }

  fn store_entity<T: Cacheable>(&self, _key: &str, _entity: &T) -> Result<()> {
    Ok(()) // Discard
  }

  fn update_entity<T, F>(&self, _key: &str, _f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    Ok(None)
  }

  fn invalidate<T: Cacheable>(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
  data: Value,
  cached_at: DateTime<Utc>,
  invalidated: bool,
}

/// Process-local storage. Entries are kept as JSON so one map serves every
/// entity type.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<(&'static str, String), MemoryEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<MutexGuard<'_, HashMap<(&'static str, String), MemoryEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn get_entity<T: Cacheable>(&self, key: &str) -> Result<Option<CachedEntity<T>>> {
    let entries = self.entries()?;
    match entries.get(&(T::entity_type(), key.to_string())) {
      Some(entry) => {
        let entity: T = serde_json::from_value(entry.data.clone())
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        Ok(Some(CachedEntity {
          entity,
          cached_at: entry.cached_at,
          invalidated: entry.invalidated,
        }))
      }
      None => Ok(None),
    }
  }

  fn store_entity<T: Cacheable>(&self, key: &str, entity: &T) -> Result<()> {
    let data =
      serde_json::to_value(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;
    self.entries()?.insert(
      (T::entity_type(), key.to_string()),
      MemoryEntry {
        data,
        cached_at: Utc::now(),
        invalidated: false,
      },
    );
    Ok(())
  }

  fn update_entity<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    // The lock is held across read and write so concurrent updates serialize.
    let mut entries = self.entries()?;
    let Some(entry) = entries.get_mut(&(T::entity_type(), key.to_string())) else {
      return Ok(None);
    };

    let current: T = serde_json::from_value(entry.data.clone())
      .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
    let updated = f(current);
    entry.data =
      serde_json::to_value(&updated).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    Ok(Some(updated))
  }

  fn invalidate<T: Cacheable>(&self, key: &str) -> Result<()> {
    if let Some(entry) = self.entries()?.get_mut(&(T::entity_type(), key.to_string())) {
      entry.invalidated = true;
    }
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self.entries()?.clear();
    Ok(())
  }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// SQLite-based cache storage implementation. Survives restarts, which is what
/// lets the offline fallback show the last known profile.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Create a new SQLite storage at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tandt").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, entity_key)
);
"#;

impl CacheStorage for SqliteStorage {
  fn get_entity<T: Cacheable>(&self, key: &str) -> Result<Option<CachedEntity<T>>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, String, bool)> = conn
      .query_row(
        "SELECT data, cached_at, invalidated FROM entity_cache
         WHERE entity_type = ? AND entity_key = ?",
        params![T::entity_type(), key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entity: {}", e))?;

    match row {
      Some((data, cached_at_str, invalidated)) => {
        let entity: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntity {
          entity,
          cached_at,
          invalidated,
        }))
      }
      None => Ok(None),
    }
  }

  fn store_entity<T: Cacheable>(&self, key: &str, entity: &T) -> Result<()> {
    let data =
      serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO entity_cache (entity_type, entity_key, data, invalidated, cached_at)
         VALUES (?, ?, ?, 0, datetime('now'))",
        params![T::entity_type(), key, data],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;

    Ok(())
  }

  fn update_entity<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let data: Option<Vec<u8>> = tx
      .query_row(
        "SELECT data FROM entity_cache WHERE entity_type = ? AND entity_key = ?",
        params![T::entity_type(), key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entity: {}", e))?;

    let Some(data) = data else {
      return Ok(None);
    };

    let current: T =
      serde_json::from_slice(&data).map_err(|e| eyre!("Failed to deserialize entity: {}", e))?;
    let updated = f(current);
    let data =
      serde_json::to_vec(&updated).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

    tx.execute(
      "UPDATE entity_cache SET data = ? WHERE entity_type = ? AND entity_key = ?",
      params![data, T::entity_type(), key],
    )
    .map_err(|e| eyre!("Failed to update entity: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(Some(updated))
  }

  fn invalidate<T: Cacheable>(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "UPDATE entity_cache SET invalidated = 1 WHERE entity_type = ? AND entity_key = ?",
        params![T::entity_type(), key],
      )
      .map_err(|e| eyre!("Failed to invalidate entity: {}", e))?;
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM entity_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

// ============================================================================
// Backend selection
// ============================================================================

/// The storage backends selectable from configuration.
pub enum StorageBackend {
  Memory(MemoryStorage),
  Sqlite(SqliteStorage),
  Noop(NoopStorage),
}

impl CacheStorage for StorageBackend {
  fn get_entity<T: Cacheable>(&self, key: &str) -> Result<Option<CachedEntity<T>>> {
    match self {
      StorageBackend::Memory(s) => s.get_entity(key),
      StorageBackend::Sqlite(s) => s.get_entity(key),
      StorageBackend::Noop(s) => s.get_entity(key),
    }
  }

  fn store_entity<T: Cacheable>(&self, key: &str, entity: &T) -> Result<()> {
    match self {
      StorageBackend::Memory(s) => s.store_entity(key, entity),
      StorageBackend::Sqlite(s) => s.store_entity(key, entity),
      StorageBackend::Noop(s) => s.store_entity(key, entity),
    }
  }

  fn update_entity<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    match self {
      StorageBackend::Memory(s) => s.update_entity(key, f),
      StorageBackend::Sqlite(s) => s.update_entity(key, f),
      StorageBackend::Noop(s) => s.update_entity(key, f),
    }
  }

  fn invalidate<T: Cacheable>(&self, key: &str) -> Result<()> {
    match self {
      StorageBackend::Memory(s) => s.invalidate::<T>(key),
      StorageBackend::Sqlite(s) => s.invalidate::<T>(key),
      StorageBackend::Noop(s) => s.invalidate::<T>(key),
    }
  }

  fn clear(&self) -> Result<()> {
    match self {
      StorageBackend::Memory(s) => s.clear(),
      StorageBackend::Sqlite(s) => s.clear(),
      StorageBackend::Noop(s) => s.clear(),
    }
  }
}
