//! Process memory sampling.

use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const MB: f64 = 1024.0 * 1024.0;

/// Raw reading from a [`MemoryProbe`], in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessMemory {
    pub rss_bytes: u64,
    pub vms_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Source of memory readings.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> ProcessMemory;
}

/// Reads the current process through `sysinfo`.
///
/// The `System` instance and pid are cached so each sample only refreshes
/// this process and the global memory counters.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot resolve current pid, process memory will read as zero");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample(&self) -> ProcessMemory {
        let mut system = self.system.lock();
        system.refresh_memory();

        let mut reading = ProcessMemory {
            total_bytes: system.total_memory(),
            available_bytes: system.available_memory(),
            ..Default::default()
        };

        if let Some(pid) = self.pid {
            let targets = [pid];
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&targets),
                false,
                ProcessRefreshKind::nothing().with_memory(),
            );
            if let Some(process) = system.process(pid) {
                reading.rss_bytes = process.memory();
                reading.vms_bytes = process.virtual_memory();
            }
        }
        reading
    }
}

/// A probe that always reports the same reading. Useful for driving pressure
/// decisions deterministically.
#[derive(Debug, Default)]
pub struct FixedProbe {
    reading: Mutex<ProcessMemory>,
}

impl FixedProbe {
    pub fn new(reading: ProcessMemory) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    /// Probe reporting `rss_mb` of resident memory on a 16 GB machine.
    pub fn with_rss_mb(rss_mb: u64) -> Self {
        let total = 16 * 1024 * 1024 * 1024u64;
        let rss = rss_mb * 1024 * 1024;
        Self::new(ProcessMemory {
            rss_bytes: rss,
            vms_bytes: rss * 2,
            total_bytes: total,
            available_bytes: total.saturating_sub(rss),
        })
    }

    pub fn set(&self, reading: ProcessMemory) {
        *self.reading.lock() = reading;
    }
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> ProcessMemory {
        *self.reading.lock()
    }
}

/// Immutable memory snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub rss_mb: f64,
    pub vms_mb: f64,
    /// RSS as a percentage of total physical memory.
    pub percent: f64,
    pub available_mb: f64,
    /// Reclaim passes run per generation (0 periodic, 1 pressure, 2 forced).
    pub gc_counts: [u64; 3],
    pub timestamp: SystemTime,
}

impl MemoryStats {
    pub fn from_reading(reading: ProcessMemory, gc_counts: [u64; 3]) -> Self {
        let percent = if reading.total_bytes == 0 {
            0.0
        } else {
            reading.rss_bytes as f64 / reading.total_bytes as f64 * 100.0
        };
        Self {
            rss_mb: reading.rss_bytes as f64 / MB,
            vms_mb: reading.vms_bytes as f64 / MB,
            percent,
            available_mb: reading.available_bytes as f64 / MB,
            gc_counts,
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe_conversion() {
        let probe = FixedProbe::with_rss_mb(1024);
        let stats = MemoryStats::from_reading(probe.sample(), [1, 0, 0]);
        assert_eq!(stats.rss_mb, 1024.0);
        assert!((stats.percent - 6.25).abs() < 1e-9);
        assert_eq!(stats.gc_counts, [1, 0, 0]);
    }

    #[test]
    fn test_sysinfo_probe_reports_this_process() {
        let reading = SysinfoProbe::new().sample();
        assert!(reading.total_bytes > 0);
        assert!(reading.rss_bytes > 0);
    }
}
