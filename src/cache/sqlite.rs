//! Tier 2: compressed blob store in an embedded SQLite database.
//!
//! Rows carry the encoded size, timestamps and an access counter next to the
//! blob. `accessed_at` is a strictly increasing nanosecond tick so LRU order
//! is total even when two accesses land in the same clock reading.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::cache::backend::{BackendError, CacheBackend};
use crate::cache::codec;
use crate::cache::compressor::Compressor;
use crate::value::Value;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        size INTEGER NOT NULL,
        compressed INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        accessed_at INTEGER NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_accessed ON cache_entries(accessed_at);
";

struct SqliteState {
    conn: Connection,
    /// Last `accessed_at` handed out.
    clock: i64,
}

impl SqliteState {
    fn tick(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        self.clock = now.max(self.clock + 1);
        self.clock
    }
}

/// SQLite-backed blob cache.
pub struct SqliteCache {
    path: PathBuf,
    budget: u64,
    compressor: Option<Compressor>,
    state: Mutex<SqliteState>,
}

impl SqliteCache {
    /// Open (or create) `<dir>/cache.db`.
    pub fn open(dir: &Path, budget: u64, compressor: Option<Compressor>) -> Result<Self, BackendError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("cache.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;

        let clock: i64 = conn.query_row(
            "SELECT COALESCE(MAX(accessed_at), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        info!(path = %path.display(), budget, "Opened SQLite tier");

        Ok(Self {
            path,
            budget,
            compressor,
            state: Mutex::new(SqliteState { conn, clock }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored rows.
    pub fn len(&self) -> Result<usize, BackendError> {
        let state = self.state.lock();
        let count: i64 = state
            .conn
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }
}

impl CacheBackend for SqliteCache {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let mut state = self.state.lock();
        let row: Option<(Vec<u8>, bool)> = state
            .conn
            .query_row(
                "SELECT value, compressed FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((blob, compressed)) = row else {
            return Ok(None);
        };

        let tick = state.tick();
        state.conn.execute(
            "UPDATE cache_entries SET accessed_at = ?1, access_count = access_count + 1 WHERE key = ?2",
            params![tick, key],
        )?;
        drop(state);

        let bytes = match (&self.compressor, compressed) {
            (Some(compressor), true) => compressor.decompress(&blob)?,
            (None, true) => zstd::decode_all(blob.as_slice()).map_err(BackendError::Io)?,
            (_, false) => blob,
        };
        Ok(Some(codec::decode(&bytes)?))
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), BackendError> {
        let encoded = codec::encode(value)?;
        let size = encoded.len() as u64;
        if size > self.budget {
            return Err(BackendError::TooLarge {
                size,
                budget: self.budget,
            });
        }

        let (blob, compressed) = match &self.compressor {
            Some(compressor) => compressor.maybe_compress(encoded)?,
            None => (encoded, false),
        };

        let mut state = self.state.lock();
        let tick = state.tick();
        let tx = state.conn.transaction()?;

        let mut used: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM cache_entries WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;

        while used as u64 + size > self.budget {
            let oldest: Option<(String, i64)> = tx
                .query_row(
                    "SELECT key, size FROM cache_entries WHERE key != ?1 ORDER BY accessed_at ASC LIMIT 1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((victim, victim_size)) = oldest else {
                break;
            };
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![victim])?;
            used -= victim_size;
            debug!(key = %victim, size = victim_size, "SQLite tier evicted entry");
        }

        tx.execute(
            "INSERT OR REPLACE INTO cache_entries
                (key, value, size, compressed, created_at, accessed_at, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
            params![key, blob, size as i64, compressed, tick],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let state = self.state.lock();
        let found: Option<i64> = state
            .conn
            .query_row("SELECT 1 FROM cache_entries WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let state = self.state.lock();
        let removed = state
            .conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<(), BackendError> {
        let state = self.state.lock();
        state.conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn size(&self) -> Result<u64, BackendError> {
        let state = self.state.lock();
        let used: i64 = state
            .conn
            .query_row("SELECT COALESCE(SUM(size), 0) FROM cache_entries", [], |row| row.get(0))?;
        Ok(used as u64)
    }

    fn list_entries(&self) -> Result<Vec<(String, u64)>, BackendError> {
        let state = self.state.lock();
        let mut stmt = state
            .conn
            .prepare("SELECT key, size FROM cache_entries ORDER BY accessed_at ASC")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;
    use tempfile::TempDir;

    fn blob(len: usize) -> Value {
        Value::Bytes(vec![3u8; len])
    }

    fn encoded(len: usize) -> u64 {
        codec::encoded_size(&blob(len)).unwrap()
    }

    fn open(dir: &TempDir, budget: u64) -> SqliteCache {
        let compressor = Compressor::new(CompressionConfig::default());
        SqliteCache::open(dir.path(), budget, Some(compressor)).unwrap()
    }

    #[test]
    fn test_roundtrip_with_compression() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 1 << 20);

        let value = blob(10_000);
        cache.put("k", &value).unwrap();
        assert!(tmp.path().join("cache.db").exists());
        assert_eq!(cache.get("k").unwrap(), Some(value));
        assert_eq!(cache.size().unwrap(), encoded(10_000));
    }

    #[test]
    fn test_capacity_evicts_oldest_accessed() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, encoded(500) * 2);

        cache.put("a", &blob(500)).unwrap();
        cache.put("b", &blob(500)).unwrap();
        cache.get("a").unwrap();
        cache.put("c", &blob(500)).unwrap();

        assert_eq!(cache.list_keys().unwrap(), vec!["a".to_string(), "c".to_string()]);
        assert!(!cache.exists("b").unwrap());
    }

    #[test]
    fn test_replace_and_delete() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 1 << 20);

        cache.put("k", &Value::Int(1)).unwrap();
        cache.put("k", &Value::Int(2)).unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.get("k").unwrap(), Some(Value::Int(2)));

        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = open(&tmp, 1 << 20);
            cache.put("persisted", &Value::Text("yes".into())).unwrap();
        }
        let cache = open(&tmp, 1 << 20);
        assert_eq!(cache.get("persisted").unwrap(), Some(Value::Text("yes".into())));
    }

    #[test]
    fn test_too_large_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp, 16);
        assert!(matches!(cache.put("big", &blob(100)), Err(BackendError::TooLarge { .. })));
    }
}
