//! Spill files: values moved out of process memory onto disk.
//!
//! A spill file is owned by its [`SpillHandle`]s. When the last clone drops
//! the file is deleted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::codec::{self, CodecError};
use crate::cache::compressor::{CompressionError, Compressor};
use crate::value::Value;

#[derive(Error, Debug)]
pub enum SpillError {
    #[error("Spill I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// One value on disk.
#[derive(Debug)]
pub struct SpillFile {
    name: String,
    path: PathBuf,
    size_bytes: u64,
    created_at: SystemTime,
    compressor: Compressor,
}

pub type SpillHandle = Arc<SpillFile>;

impl SpillFile {
    /// Encode `value`, compress it and write it to `path`.
    pub(crate) fn write(
        name: &str,
        path: PathBuf,
        value: &Value,
        compressor: Compressor,
    ) -> Result<SpillHandle, SpillError> {
        let encoded = codec::encode(value)?;
        let compressed = compressor.compress(&encoded)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &compressed)?;

        debug!(
            name,
            path = %path.display(),
            encoded = encoded.len(),
            on_disk = compressed.len(),
            "Spilled value to disk"
        );

        Ok(Arc::new(Self {
            name: name.to_string(),
            path,
            size_bytes: compressed.len() as u64,
            created_at: SystemTime::now(),
            compressor,
        }))
    }

    /// Read the value back. The file stays in place.
    pub fn load(&self) -> Result<Value, SpillError> {
        let data = fs::read(&self.path)?;
        let decoded = self.compressor.decompress(&data)?;
        Ok(codec::decode(&decoded)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(name = %self.name, path = %self.path.display(), "Removed spill file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // Left for the next reclaim pass.
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove spill file"),
        }
    }
}
