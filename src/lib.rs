//! session-cache: size-aware tiered caching for long-running interactive
//! execution sessions.
//!
//! Values move through a hierarchy of storage tiers by size and access
//! frequency:
//!   Memory (hot) → SQLite (warm) → Parquet/columnar files (cool) → Compressed files (cold)
//!
//! Around the cache sit a memory manager (pressure detection, reclaim passes,
//! spill-to-disk), lazy cancellable data streams, and a session layer that
//! replaces large namespace variables with lazy proxies after each execution.

pub mod cache;
pub mod config;
pub mod memory;
pub mod metrics;
pub mod session;
pub mod stream;
pub mod value;

pub use cache::{new_shared_cache, CacheStats, SharedCache, Tier, TieredCache};
pub use config::Config;
pub use memory::MemoryManager;
pub use session::{CacheContext, Session};
pub use stream::{DataStream, StreamProcessor};
pub use value::{Table, Value};
