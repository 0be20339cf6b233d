//! The capability set every tier backend implements.

use thiserror::Error;

use crate::cache::codec::CodecError;
use crate::cache::columnar::ColumnarError;
use crate::cache::compressor::CompressionError;
use crate::value::Value;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Columnar(#[from] ColumnarError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Value of {size} bytes exceeds the backend budget of {budget} bytes")]
    TooLarge { size: u64, budget: u64 },
}

/// Storage behind one tier.
///
/// Implementations serialize their own access, so a backend can be shared
/// across threads. Sizes are encoded sizes (see [`crate::cache::codec`]).
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch a value. `Ok(None)` means the key is not stored.
    fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;

    /// Store a value, evicting least-recently-used entries if needed.
    fn put(&self, key: &str, value: &Value) -> Result<(), BackendError>;

    fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Remove a key. Returns whether it was present.
    fn delete(&self, key: &str) -> Result<bool, BackendError>;

    fn clear(&self) -> Result<(), BackendError>;

    /// Total encoded bytes currently stored.
    fn size(&self) -> Result<u64, BackendError>;

    /// Stored keys with their encoded sizes, least recently used first.
    fn list_entries(&self) -> Result<Vec<(String, u64)>, BackendError>;

    /// Stored keys, least recently used first.
    fn list_keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.list_entries()?.into_iter().map(|(key, _)| key).collect())
    }
}
