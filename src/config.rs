//! Runtime configuration for session-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (capacities, size boundaries, promotion threshold),
//! memory limits and streaming defaults live here.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::cache::entry::Tier;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "session-cache", about = "Inspect and exercise a session cache directory")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the cache directory from the configuration.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print per-tier statistics and metrics for the cache directory.
    Stats,

    /// Print the process memory report.
    Memory,

    /// Remove every cached entry in all tiers.
    Clear,

    /// Stream a file line by line and report progress and throughput.
    Scan {
        /// File to scan.
        path: PathBuf,

        /// Lines per progress report.
        #[arg(long, default_value_t = 100_000)]
        chunk_size: usize,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory and lifecycle.
    pub cache: CacheConfig,

    /// Tier capacities and placement thresholds.
    pub tiers: TierConfig,

    /// Compression settings.
    pub compression: CompressionConfig,

    /// Memory monitoring and spill settings.
    pub memory: MemoryConfig,

    /// Streaming defaults.
    pub stream: StreamConfig,

    /// Session integration settings.
    pub session: SessionConfig,
}

/// Cache directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for all on-disk tiers and spill files.
    pub cache_dir: PathBuf,

    /// Empty the persistent tiers when the cache is opened.
    pub clear_on_open: bool,

    /// TTL applied to `put` calls that do not pass one (seconds).
    pub default_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/tmp/session-cache"),
            clear_on_open: true,
            default_ttl_secs: None,
        }
    }
}

impl CacheConfig {
    pub fn sqlite_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    pub fn columnar_dir(&self) -> PathBuf {
        self.cache_dir.join("parquet")
    }

    pub fn compressed_dir(&self) -> PathBuf {
        self.cache_dir.join("compressed")
    }

    pub fn spill_dir(&self) -> PathBuf {
        self.cache_dir.join("spill")
    }
}

/// Tier capacity and placement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Tier 1 (memory) budget in bytes.
    pub memory_budget: u64,

    /// Tier 2 (SQLite) budget in bytes.
    pub sqlite_budget: u64,

    /// Tier 3 (columnar files) budget in bytes.
    pub columnar_budget: u64,

    /// Tier 4 (compressed files) budget in bytes.
    pub compressed_budget: u64,

    /// Values smaller than this are placed in tier 1.
    pub memory_max_entry: u64,

    /// Values smaller than this (and not in tier 1) are placed in tier 2.
    pub sqlite_max_entry: u64,

    /// Values smaller than this (and not in tiers 1-2) are placed in tier 3.
    /// Anything larger goes to tier 4.
    pub columnar_max_entry: u64,

    /// Promote an entry one tier when accesses per second exceed this.
    pub promotion_threshold: f64,

    /// Store tables as Parquet in tier 3.
    pub columnar_parquet: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            memory_budget: 2 * GB,
            sqlite_budget: 10 * GB,
            columnar_budget: 50 * GB,
            compressed_budget: 200 * GB,
            memory_max_entry: 10 * MB,
            sqlite_max_entry: 100 * MB,
            columnar_max_entry: 1000 * MB,
            promotion_threshold: 10.0,
            columnar_parquet: true,
        }
    }
}

impl TierConfig {
    /// Byte budget for a tier.
    pub fn capacity(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Memory => self.memory_budget,
            Tier::Sqlite => self.sqlite_budget,
            Tier::Columnar => self.columnar_budget,
            Tier::Compressed => self.compressed_budget,
        }
    }

    /// Initial tier for a value of `size` bytes, chosen purely by size.
    pub fn tier_for_size(&self, size: u64) -> Tier {
        if size < self.memory_max_entry {
            Tier::Memory
        } else if size < self.sqlite_max_entry {
            Tier::Sqlite
        } else if size < self.columnar_max_entry {
            Tier::Columnar
        } else {
            Tier::Compressed
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress blobs stored in SQLite.
    pub sqlite_compression: bool,

    /// Compress non-columnar payloads in tier 3.
    pub columnar_tier_compression: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,

    /// Payloads below this size are stored raw.
    pub min_compress_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            sqlite_compression: true,
            columnar_tier_compression: false,
            zstd_level: 3,
            min_compress_bytes: 1024,
        }
    }
}

/// Memory monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Soft process memory limit in MB.
    pub memory_limit_mb: u64,

    /// RSS above which new large values are spilled (MB).
    pub spill_threshold_mb: u64,

    /// RSS above which a reclaim pass runs (MB).
    pub gc_threshold_mb: u64,

    /// Run a reclaim pass at least this often (seconds).
    pub gc_interval_secs: u64,

    /// Values larger than this are always spilled (MB).
    pub object_size_threshold_mb: u64,

    /// Values smaller than this are never spilled (bytes).
    pub spill_floor_bytes: u64,

    /// Fraction of `memory_limit_mb` that counts as pressure.
    pub pressure_ratio: f64,

    /// Rolling history length.
    pub history_len: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 2048,
            spill_threshold_mb: 1024,
            gc_threshold_mb: 512,
            gc_interval_secs: 60,
            object_size_threshold_mb: 100,
            spill_floor_bytes: MB,
            pressure_ratio: 0.75,
            history_len: 100,
        }
    }
}

/// Streaming defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Items per chunk for chunked sources.
    pub chunk_size: usize,

    /// Capacity of the producer buffer.
    pub buffer_size: usize,

    /// Sleep between polls when the producer buffer is full or empty (ms).
    pub poll_interval_ms: u64,

    /// Worker threads for parallel processing.
    pub max_workers: usize,

    /// Items per batch handed to a worker.
    pub parallel_batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            buffer_size: 100,
            poll_interval_ms: 1,
            max_workers: 4,
            parallel_batch_size: 1_000,
        }
    }
}

/// Session integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Code containing any of these is executed in streaming mode.
    pub streaming_keywords: Vec<String>,

    /// Quoted file paths larger than this switch to streaming mode (MB).
    pub streaming_file_threshold_mb: u64,

    /// Variables whose names start with one of these are never offloaded.
    pub skip_prefixes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            streaming_keywords: [
                "stream",
                "chunk",
                "chunksize",
                "read_lines",
                "iterrows",
                "itertuples",
                "for line in",
                "readlines",
                "scan_csv",
                "scan_parquet",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            streaming_file_threshold_mb: 100,
            skip_prefixes: vec!["_".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Configuration rooted at `cache_dir` with every other field defaulted.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.cache.cache_dir = cache_dir.into();
        config
    }
}
