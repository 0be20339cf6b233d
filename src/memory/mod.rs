//! Process memory monitoring and spill-to-disk.
//!
//! - [`stats`]: Memory snapshots and the probe abstraction
//! - [`spill`]: Owned spill files
//! - [`manager`]: Pressure detection, reclaim passes and spill bookkeeping

pub mod manager;
pub mod spill;
pub mod stats;

pub use manager::{MemoryManager, MemoryReport, OptimizeReport};
pub use spill::{SpillError, SpillHandle};
pub use stats::{FixedProbe, MemoryProbe, MemoryStats, ProcessMemory, SysinfoProbe};
