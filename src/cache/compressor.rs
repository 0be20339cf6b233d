//! zstd compression for payloads leaving the process.
//!
//! Compressed payloads are recognised by the zstd frame magic, so readers can
//! accept both compressed and raw bytes regardless of the writer's settings.

use thiserror::Error;

use crate::config::CompressionConfig;

/// zstd frame magic (little-endian 0xFD2FB528).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    Compress(std::io::Error),

    #[error("Zstd decompression failed: {0}")]
    Decompress(std::io::Error),
}

/// The compression engine used by the SQLite, disk and spill paths.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// zstd level in use.
    pub fn level(&self) -> i32 {
        self.config.zstd_level
    }

    /// Compress `data` when it is large enough to be worth it.
    ///
    /// Returns the bytes to store and whether they are compressed.
    pub fn maybe_compress(&self, data: Vec<u8>) -> Result<(Vec<u8>, bool), CompressionError> {
        if data.len() < self.config.min_compress_bytes {
            return Ok((data, false));
        }
        let compressed = self.compress(&data)?;
        // Incompressible data is kept raw.
        if compressed.len() >= data.len() {
            return Ok((data, false));
        }
        Ok((compressed, true))
    }

    /// Compress data with zstd.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.config.zstd_level).map_err(CompressionError::Compress)
    }

    /// Decompress zstd data.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(CompressionError::Decompress)
    }

    /// Decompress if the payload carries the zstd magic, otherwise pass it through.
    pub fn decompress_if_needed(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressionError> {
        if is_compressed(&data) {
            self.decompress(&data)
        } else {
            Ok(data)
        }
    }
}

/// Check if data is zstd-compressed by checking magic bytes.
#[inline]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = vec![42u8; 4096];

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert!(is_compressed(&compressed));

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_small_payloads_stay_raw() {
        let compressor = Compressor::new(CompressionConfig::default());
        let (bytes, compressed) = compressor.maybe_compress(vec![1, 2, 3]).unwrap();
        assert!(!compressed);
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(compressor.decompress_if_needed(bytes).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_maybe_compress_roundtrip() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = b"abcabcabc".repeat(1000);
        let (bytes, compressed) = compressor.maybe_compress(data.clone()).unwrap();
        assert!(compressed);
        assert_eq!(compressor.decompress_if_needed(bytes).unwrap(), data);
    }
}
