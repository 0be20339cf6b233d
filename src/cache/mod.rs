//! Tiered value cache.
//!
//! This module contains the cache data structures and the tier backends:
//! - [`entry`]: Tier definitions and per-key metadata
//! - [`tiered`]: Tier manager that orchestrates placement, promotion and demotion
//! - [`evictor`]: LRU victim selection
//! - [`backend`]: The trait every tier implements
//! - [`memory`], [`sqlite`], [`disk`]: Tier 1, tier 2 and tiers 3-4 storage
//! - [`codec`], [`compressor`], [`columnar`]: Payload encoding

pub mod backend;
pub mod codec;
pub mod columnar;
pub mod compressor;
pub mod disk;
pub mod entry;
pub mod evictor;
pub mod memory;
pub mod sqlite;
pub mod tiered;

pub use backend::{BackendError, CacheBackend};
pub use entry::{CacheEntry, Tier};
pub use tiered::{new_shared_cache, CacheStats, SharedCache, TieredCache};
