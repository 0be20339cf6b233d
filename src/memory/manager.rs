//! Memory manager: pressure detection, reclaim passes and spill lifecycle.
//!
//! The manager samples process memory through a [`MemoryProbe`], decides when
//! values should leave process memory, and owns the spill directory. A
//! reclaim pass ("GC") sweeps spill records whose handles are gone and runs
//! every registered reclaimer hook (the tiered cache registers its expiry
//! sweep).

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::compressor::Compressor;
use crate::config::{Config, MemoryConfig};
use crate::memory::spill::{SpillFile, SpillHandle};
use crate::memory::stats::{MemoryProbe, MemoryStats, SysinfoProbe};
use crate::value::Value;

const MB: u64 = 1024 * 1024;

/// Reclaim pass generations.
pub const GEN_PERIODIC: usize = 0;
pub const GEN_PRESSURE: usize = 1;
pub const GEN_FORCED: usize = 2;

/// Hook run during a reclaim pass. Returns the bytes it released.
pub type Reclaimer = Box<dyn Fn() -> u64 + Send + Sync>;

struct SpillRecord {
    name: String,
    path: PathBuf,
    size_bytes: u64,
    created_at: SystemTime,
    handle: Weak<SpillFile>,
}

impl SpillRecord {
    fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

struct ManagerState {
    history: VecDeque<MemoryStats>,
    gc_counts: [u64; 3],
    last_gc: Instant,
    reclaimed_total: u64,
    spills: Vec<SpillRecord>,
}

/// Result of [`MemoryManager::optimize_memory`].
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub dead_spills_purged: usize,
    pub spill_bytes_freed: u64,
    pub reclaimed_bytes: u64,
    pub rss_before_mb: f64,
    pub rss_after_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryLimits {
    pub memory_limit_mb: u64,
    pub spill_threshold_mb: u64,
    pub gc_threshold_mb: u64,
    pub object_size_threshold_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GcState {
    pub counts: [u64; 3],
    pub seconds_since_last: f64,
    pub interval_secs: u64,
    pub reclaimed_bytes_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpillInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub alive: bool,
}

/// Result of [`MemoryManager::get_memory_report`].
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub current: MemoryStats,
    pub under_pressure: bool,
    pub limits: MemoryLimits,
    pub gc: GcState,
    pub spills: Vec<SpillInfo>,
    pub spill_bytes: u64,
    /// Mean RSS over the recorded history.
    pub average_rss_mb: Option<f64>,
    pub history_len: usize,
}

pub struct MemoryManager {
    config: MemoryConfig,
    spill_dir: PathBuf,
    compressor: Compressor,
    probe: Box<dyn MemoryProbe>,
    state: Mutex<ManagerState>,
    reclaimers: Mutex<Vec<(String, Reclaimer)>>,
}

impl MemoryManager {
    /// Manager sampling the current process through `sysinfo`.
    pub fn new(config: &Config) -> Self {
        Self::with_probe(config, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(config: &Config, probe: Box<dyn MemoryProbe>) -> Self {
        info!(
            memory_limit_mb = config.memory.memory_limit_mb,
            spill_threshold_mb = config.memory.spill_threshold_mb,
            gc_threshold_mb = config.memory.gc_threshold_mb,
            spill_dir = %config.cache.spill_dir().display(),
            "Memory manager initialized"
        );
        Self {
            config: config.memory.clone(),
            spill_dir: config.cache.spill_dir(),
            compressor: Compressor::new(config.compression.clone()),
            probe,
            state: Mutex::new(ManagerState {
                history: VecDeque::new(),
                gc_counts: [0; 3],
                last_gc: Instant::now(),
                reclaimed_total: 0,
                spills: Vec::new(),
            }),
            reclaimers: Mutex::new(Vec::new()),
        }
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Take a fresh memory snapshot.
    pub fn get_memory_stats(&self) -> MemoryStats {
        let gc_counts = self.state.lock().gc_counts;
        MemoryStats::from_reading(self.probe.sample(), gc_counts)
    }

    fn is_pressure(&self, stats: &MemoryStats) -> bool {
        stats.rss_mb > self.config.spill_threshold_mb as f64
            || stats.rss_mb > self.config.memory_limit_mb as f64 * self.config.pressure_ratio
    }

    /// Sample memory, record it in the history and report whether the
    /// process is under pressure.
    pub fn check_memory_pressure(&self) -> (bool, MemoryStats) {
        let stats = self.get_memory_stats();
        let pressure = self.is_pressure(&stats);

        let mut state = self.state.lock();
        state.history.push_back(stats.clone());
        while state.history.len() > self.config.history_len {
            state.history.pop_front();
        }
        drop(state);

        if pressure {
            debug!(rss_mb = stats.rss_mb, "Memory pressure detected");
        }
        (pressure, stats)
    }

    /// Run a reclaim pass if forced, due, over the GC threshold or under
    /// pressure. Returns whether a pass ran.
    pub fn trigger_gc_if_needed(&self, force: bool) -> bool {
        let (pressure, stats) = self.check_memory_pressure();
        let interval = Duration::from_secs(self.config.gc_interval_secs);
        let due = self.state.lock().last_gc.elapsed() >= interval;
        let over_threshold = stats.rss_mb > self.config.gc_threshold_mb as f64;

        let generation = if force {
            GEN_FORCED
        } else if pressure {
            GEN_PRESSURE
        } else if due || over_threshold {
            GEN_PERIODIC
        } else {
            return false;
        };

        let freed = self.reclaim(generation);
        let after = self.get_memory_stats();
        info!(
            generation,
            freed_bytes = freed,
            rss_before_mb = stats.rss_mb,
            rss_after_mb = after.rss_mb,
            "Reclaim pass complete"
        );
        true
    }

    /// Register a hook run on every reclaim pass.
    pub fn register_reclaimer<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "Registered reclaimer");
        self.reclaimers.lock().push((name, Box::new(hook)));
    }

    fn reclaim(&self, generation: usize) -> u64 {
        let (_, mut freed) = self.sweep_dead_spills();
        for (name, hook) in self.reclaimers.lock().iter() {
            let released = hook();
            if released > 0 {
                debug!(reclaimer = %name, released, "Reclaimer released memory");
            }
            freed += released;
        }

        let mut state = self.state.lock();
        state.gc_counts[generation] += 1;
        state.last_gc = Instant::now();
        state.reclaimed_total += freed;
        freed
    }

    /// Drop records whose handles are gone, deleting any file left behind.
    fn sweep_dead_spills(&self) -> (usize, u64) {
        let dead: Vec<SpillRecord> = {
            let mut state = self.state.lock();
            let (alive, dead) = std::mem::take(&mut state.spills)
                .into_iter()
                .partition(SpillRecord::is_alive);
            state.spills = alive;
            dead
        };

        let mut freed = 0;
        for record in &dead {
            match fs::remove_file(&record.path) {
                Ok(()) => freed += record.size_bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %record.path.display(), error = %e, "Failed to remove orphaned spill file"),
            }
        }
        (dead.len(), freed)
    }

    /// Whether `value` should leave process memory.
    pub fn should_spill(&self, value: &Value, name: &str) -> bool {
        let size = value.estimated_size();
        if size < self.config.spill_floor_bytes || !value.is_serializable() {
            return false;
        }
        if size > self.config.object_size_threshold_mb * MB {
            debug!(name, size, "Value exceeds object size threshold");
            return true;
        }

        let (pressure, stats) = self.check_memory_pressure();
        let projected_mb = stats.rss_mb + size as f64 / MB as f64;
        if projected_mb > self.config.spill_threshold_mb as f64 {
            debug!(name, size, projected_mb, "Value would push RSS past spill threshold");
            return true;
        }
        pressure
    }

    /// Write `value` to a new spill file. The returned handle owns the file.
    pub fn spill_to_disk(&self, value: &Value, name: &str) -> Option<SpillHandle> {
        let file_name = format!("{}_{}.spill", sanitize(name), Uuid::new_v4().simple());
        let path = self.spill_dir.join(file_name);

        let handle = match SpillFile::write(name, path, value, self.compressor.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(name, error = %e, "Spill to disk failed");
                return None;
            }
        };

        self.state.lock().spills.push(SpillRecord {
            name: name.to_string(),
            path: handle.path().to_path_buf(),
            size_bytes: handle.size_bytes(),
            created_at: handle.created_at(),
            handle: Arc::downgrade(&handle),
        });
        info!(name, size = handle.size_bytes(), "Spilled variable to disk");
        Some(handle)
    }

    /// Read the most recent live spill of `name`.
    pub fn load_from_disk(&self, name: &str) -> Option<Value> {
        let handle = {
            let state = self.state.lock();
            state
                .spills
                .iter()
                .filter(|r| r.name == name)
                .max_by_key(|r| r.created_at)
                .and_then(|r| r.handle.upgrade())
        }?;

        match handle.load() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(name, path = %handle.path().display(), error = %e, "Failed to load spilled value");
                None
            }
        }
    }

    /// Purge dead spill records and force a full reclaim pass.
    pub fn optimize_memory(&self) -> OptimizeReport {
        let before = self.get_memory_stats();
        let (dead_spills_purged, spill_bytes_freed) = self.sweep_dead_spills();
        let reclaimed_bytes = self.reclaim(GEN_FORCED);
        let after = self.get_memory_stats();

        let report = OptimizeReport {
            dead_spills_purged,
            spill_bytes_freed,
            reclaimed_bytes,
            rss_before_mb: before.rss_mb,
            rss_after_mb: after.rss_mb,
        };
        info!(
            dead_spills_purged,
            freed = spill_bytes_freed + reclaimed_bytes,
            "Memory optimized"
        );
        report
    }

    pub fn get_memory_report(&self) -> MemoryReport {
        let current = self.get_memory_stats();
        let under_pressure = self.is_pressure(&current);
        let state = self.state.lock();

        let spills: Vec<SpillInfo> = state
            .spills
            .iter()
            .map(|r| SpillInfo {
                name: r.name.clone(),
                path: r.path.clone(),
                size_bytes: r.size_bytes,
                alive: r.is_alive(),
            })
            .collect();
        let spill_bytes = spills.iter().filter(|s| s.alive).map(|s| s.size_bytes).sum();

        let average_rss_mb = if state.history.is_empty() {
            None
        } else {
            Some(state.history.iter().map(|s| s.rss_mb).sum::<f64>() / state.history.len() as f64)
        };

        MemoryReport {
            current,
            under_pressure,
            limits: MemoryLimits {
                memory_limit_mb: self.config.memory_limit_mb,
                spill_threshold_mb: self.config.spill_threshold_mb,
                gc_threshold_mb: self.config.gc_threshold_mb,
                object_size_threshold_mb: self.config.object_size_threshold_mb,
            },
            gc: GcState {
                counts: state.gc_counts,
                seconds_since_last: state.last_gc.elapsed().as_secs_f64(),
                interval_secs: self.config.gc_interval_secs,
                reclaimed_bytes_total: state.reclaimed_total,
            },
            spills,
            spill_bytes,
            average_rss_mb,
            history_len: state.history.len(),
        }
    }

    /// Remove files of dead spill records and drop registered reclaimers.
    pub fn shutdown(&self) {
        let (purged, freed) = self.sweep_dead_spills();
        let live = self.state.lock().spills.len();
        self.reclaimers.lock().clear();
        info!(purged, freed, live_spills = live, "Memory manager shut down");
    }
}

/// File-name-safe form of a variable name.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "value".to_string()
    } else {
        cleaned
    }
}
