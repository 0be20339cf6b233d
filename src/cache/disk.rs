//! Tiers 3 and 4: file-based value store.
//!
//! Each key maps to a content-addressed file:
//!
//! ```text
//! <root>/metadata.json              index: key -> record
//! <root>/<hash[..2]>/<hash>.cache   payload, hash = sha256(key)
//! ```
//!
//! Tables are written as Parquet when columnar mode is on; every other value
//! is bincode, optionally zstd-compressed. Payloads are written to a temp
//! file and renamed into place, so writers of different keys never touch the
//! same path. Only the index is shared, and it sits behind a mutex.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::backend::{BackendError, CacheBackend};
use crate::cache::codec;
use crate::cache::columnar;
use crate::cache::compressor::Compressor;
use crate::value::Value;

const INDEX_FILE: &str = "metadata.json";

/// On-disk encoding of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    Parquet,
    Binary,
}

/// How a disk tier stores values.
#[derive(Debug, Clone, Copy)]
pub struct DiskOptions {
    /// Write tables as Parquet.
    pub columnar: bool,

    /// Compress payloads.
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskRecord {
    /// Payload path relative to the root.
    file: String,
    /// Encoded size; what the budget counts.
    size_bytes: u64,
    /// Bytes actually on disk.
    stored_bytes: u64,
    format: PayloadFormat,
    compressed: bool,
    /// Unix seconds.
    created_at: u64,
    /// Index clock value of the last access.
    accessed_at: u64,
    access_count: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskIndex {
    entries: HashMap<String, DiskRecord>,
    clock: u64,
}

impl DiskIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// I/O counters.
#[derive(Debug, Default, Clone)]
pub struct DiskIoStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
}

struct DiskState {
    index: DiskIndex,
    dirty: bool,
    stats: DiskIoStats,
}

/// File-backed cache rooted at one directory.
pub struct DiskCache {
    root: PathBuf,
    budget: u64,
    options: DiskOptions,
    compressor: Compressor,
    state: Mutex<DiskState>,
}

impl DiskCache {
    /// Open a disk cache, loading any existing index.
    pub fn open(
        root: impl Into<PathBuf>,
        budget: u64,
        options: DiskOptions,
        compressor: Compressor,
    ) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let mut index = if index_path.exists() {
            match fs::read(&index_path).map(|data| serde_json::from_slice::<DiskIndex>(&data)) {
                Ok(Ok(index)) => index,
                Ok(Err(e)) => {
                    warn!(path = %index_path.display(), error = %e, "Corrupt disk index, starting empty");
                    DiskIndex::default()
                }
                Err(e) => {
                    warn!(path = %index_path.display(), error = %e, "Unreadable disk index, starting empty");
                    DiskIndex::default()
                }
            }
        } else {
            DiskIndex::default()
        };

        let before = index.entries.len();
        index.entries.retain(|_, record| root.join(&record.file).exists());
        let dropped = before - index.entries.len();

        info!(
            root = %root.display(),
            budget,
            entries = index.entries.len(),
            dropped,
            "Opened disk tier"
        );

        Ok(Self {
            root,
            budget,
            options,
            compressor,
            state: Mutex::new(DiskState {
                index,
                dirty: dropped > 0,
                stats: DiskIoStats::default(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative payload path for a key: two-level fan-out on the key hash.
    fn relative_path(key: &str) -> String {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}/{}.cache", &hash[..2], hash)
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.state.lock().index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get disk I/O statistics.
    pub fn stats(&self) -> DiskIoStats {
        self.state.lock().stats.clone()
    }

    /// Bytes actually occupied by payload files (compressed sizes).
    pub fn disk_usage(&self) -> Result<u64, BackendError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                // Recurse one level (our shard dirs).
                for sub in fs::read_dir(entry.path())? {
                    let sub_meta = sub?.metadata()?;
                    if sub_meta.is_file() {
                        total += sub_meta.len();
                    }
                }
            }
        }
        Ok(total)
    }

    /// Persist the index if it changed.
    pub fn flush(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.persist_index(&mut state)
    }

    fn persist_index(&self, state: &mut DiskState) -> Result<(), BackendError> {
        if !state.dirty {
            return Ok(());
        }
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(&state.index)?)?;
        fs::rename(&tmp, &path)?;
        state.dirty = false;
        Ok(())
    }

    /// Oldest-accessed keys whose removal lets `incoming` more bytes fit.
    /// The index is not modified.
    fn select_victims(&self, state: &DiskState, key: &str, incoming: u64) -> Vec<String> {
        let mut used: u64 = state
            .index
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, r)| r.size_bytes)
            .sum();

        if used + incoming <= self.budget {
            return Vec::new();
        }

        let mut candidates: Vec<(String, u64, u64)> = state
            .index
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, r)| (k.clone(), r.accessed_at, r.size_bytes))
            .collect();
        candidates.sort_by_key(|(_, accessed_at, _)| *accessed_at);

        let mut victims = Vec::new();
        for (victim, _, size) in candidates {
            if used + incoming <= self.budget {
                break;
            }
            used -= size;
            victims.push(victim);
        }
        victims
    }

    fn write_payload(&self, path: &Path, value: &Value) -> Result<(PayloadFormat, bool, u64), BackendError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");

        let result = (|| -> Result<(PayloadFormat, bool), BackendError> {
            match value {
                Value::Table(table) if self.options.columnar && columnar::supports(table) => {
                    let level = self.options.compress.then(|| self.compressor.level());
                    columnar::write_table(File::create(&tmp)?, table, level)?;
                    Ok((PayloadFormat::Parquet, self.options.compress))
                }
                _ => {
                    let encoded = codec::encode(value)?;
                    let (bytes, compressed) = if self.options.compress {
                        self.compressor.maybe_compress(encoded)?
                    } else {
                        (encoded, false)
                    };
                    fs::write(&tmp, bytes)?;
                    Ok((PayloadFormat::Binary, compressed))
                }
            }
        })();

        match result {
            Ok((format, compressed)) => {
                let stored = fs::metadata(&tmp)?.len();
                if let Err(e) = fs::rename(&tmp, path) {
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
                Ok((format, compressed, stored))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    fn read_payload(&self, path: &Path, record: &DiskRecord) -> Result<Value, BackendError> {
        match record.format {
            PayloadFormat::Parquet => Ok(Value::Table(columnar::read_table(File::open(path)?)?)),
            PayloadFormat::Binary => {
                let bytes = self.compressor.decompress_if_needed(fs::read(path)?)?;
                Ok(codec::decode(&bytes)?)
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
    }
}

impl CacheBackend for DiskCache {
    fn name(&self) -> &'static str {
        if self.options.columnar {
            "columnar"
        } else {
            "compressed"
        }
    }

    fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let record = match self.state.lock().index.entries.get(key) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        let path = self.root.join(&record.file);
        if !path.exists() {
            let mut state = self.state.lock();
            state.index.entries.remove(key);
            state.dirty = true;
            warn!(key, path = %path.display(), "Indexed payload missing, dropping record");
            return Ok(None);
        }

        let value = self.read_payload(&path, &record)?;

        let mut state = self.state.lock();
        let tick = state.index.tick();
        if let Some(r) = state.index.entries.get_mut(key) {
            r.accessed_at = tick;
            r.access_count += 1;
        }
        state.dirty = true;
        state.stats.total_reads += 1;
        state.stats.total_bytes_read += record.stored_bytes;

        Ok(Some(value))
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), BackendError> {
        let size = codec::encoded_size(value)?;
        if size > self.budget {
            return Err(BackendError::TooLarge {
                size,
                budget: self.budget,
            });
        }

        let victims = self.select_victims(&self.state.lock(), key, size);

        // Victims stay indexed until the new payload is in place.
        let file = Self::relative_path(key);
        let path = self.root.join(&file);
        let (format, compressed, stored_bytes) = self.write_payload(&path, value)?;

        let mut state = self.state.lock();
        let mut evicted = Vec::with_capacity(victims.len());
        for victim in &victims {
            if let Some(record) = state.index.entries.remove(victim) {
                debug!(key = %victim, size = record.size_bytes, root = %self.root.display(), "Disk tier evicted entry");
                evicted.push(self.root.join(record.file));
            }
        }
        let tick = state.index.tick();
        state.index.entries.insert(
            key.to_string(),
            DiskRecord {
                file,
                size_bytes: size,
                stored_bytes,
                format,
                compressed,
                created_at: unix_now(),
                accessed_at: tick,
                access_count: 0,
            },
        );
        state.dirty = true;
        state.stats.total_writes += 1;
        state.stats.total_bytes_written += stored_bytes;

        debug!(
            key,
            path = %path.display(),
            size,
            stored_bytes,
            format = ?format,
            "Wrote value to disk"
        );

        let persisted = self.persist_index(&mut state);
        drop(state);
        for victim in &evicted {
            remove_if_exists(victim);
        }
        persisted
    }

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.state.lock().index.entries.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        let Some(record) = state.index.entries.remove(key) else {
            return Ok(false);
        };
        state.dirty = true;
        self.persist_index(&mut state)?;
        drop(state);

        remove_if_exists(&self.root.join(&record.file));
        debug!(key, "Deleted disk entry");
        Ok(true)
    }

    fn clear(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.index.entries.clear();
        state.dirty = true;
        self.persist_index(&mut state)?;

        // Shard directories also hold orphans from interrupted writes.
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.file_name().len() == 2 {
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    fn size(&self) -> Result<u64, BackendError> {
        Ok(self.state.lock().index.entries.values().map(|r| r.size_bytes).sum())
    }

    fn list_entries(&self) -> Result<Vec<(String, u64)>, BackendError> {
        let state = self.state.lock();
        let mut records: Vec<(&String, &DiskRecord)> = state.index.entries.iter().collect();
        records.sort_by_key(|(_, record)| record.accessed_at);
        Ok(records
            .into_iter()
            .map(|(k, record)| (k.clone(), record.size_bytes))
            .collect())
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Err(e) = self.persist_index(&mut state) {
            warn!(root = %self.root.display(), error = %e, "Failed to flush disk index");
        }
    }
}
