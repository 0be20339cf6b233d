//! Cache entry metadata and tier definitions.
//!
//! An entry is the unit of movement between tiers: it is placed, promoted,
//! demoted and evicted as a whole.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Identifies which storage tier an entry currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 1: in-process memory (hot).
    Memory,
    /// Tier 2: embedded SQLite blob store (warm).
    Sqlite,
    /// Tier 3: columnar files (cool).
    Columnar,
    /// Tier 4: compressed files (cold).
    Compressed,
}

impl Tier {
    /// All tiers, hottest first.
    pub const ALL: [Tier; 4] = [Tier::Memory, Tier::Sqlite, Tier::Columnar, Tier::Compressed];

    /// Returns the numeric tier level (1 = hottest).
    pub fn level(&self) -> u8 {
        match self {
            Tier::Memory => 1,
            Tier::Sqlite => 2,
            Tier::Columnar => 3,
            Tier::Compressed => 4,
        }
    }

    /// Returns the next colder tier for demotion, or None if already coldest.
    pub fn demote(&self) -> Option<Tier> {
        match self {
            Tier::Memory => Some(Tier::Sqlite),
            Tier::Sqlite => Some(Tier::Columnar),
            Tier::Columnar => Some(Tier::Compressed),
            Tier::Compressed => None,
        }
    }

    /// Returns the next hotter tier for promotion, or None if already hottest.
    pub fn promote(&self) -> Option<Tier> {
        match self {
            Tier::Memory => None,
            Tier::Sqlite => Some(Tier::Memory),
            Tier::Columnar => Some(Tier::Sqlite),
            Tier::Compressed => Some(Tier::Columnar),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory"),
            Tier::Sqlite => write!(f, "sqlite"),
            Tier::Columnar => write!(f, "columnar"),
            Tier::Compressed => write!(f, "compressed"),
        }
    }
}

/// Metadata for one cached value.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,

    /// Encoded size of the value in bytes. This is what tier budgets count.
    pub size_bytes: u64,

    /// Tier whose backend holds the value.
    pub tier: Tier,

    /// Number of successful reads.
    pub access_count: u64,

    /// Timestamp of last access (creation counts as an access).
    pub last_access: Instant,

    /// Logical clock value of the last access; breaks `last_access` ties.
    pub access_tick: u64,

    /// Creation timestamp.
    pub created_at: Instant,

    /// Optional time-to-live from creation.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, size_bytes: u64, tier: Tier, ttl: Option<Duration>, tick: u64) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            size_bytes,
            tier,
            access_count: 0,
            last_access: now,
            access_tick: tick,
            created_at: now,
            ttl,
        }
    }

    /// Record an access, updating timestamp and counter.
    pub fn touch(&mut self, tick: u64) {
        self.last_access = Instant::now();
        self.access_tick = tick;
        self.access_count += 1;
    }

    /// Whether the entry's TTL has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) >= ttl,
            None => false,
        }
    }

    /// Accesses per second since creation. Ages under one second count as one
    /// second so a fresh entry is not promoted on its first read.
    pub fn access_frequency(&self, now: Instant) -> f64 {
        let age = now.saturating_duration_since(self.created_at).as_secs_f64().max(1.0);
        self.access_count as f64 / age
    }

    /// LRU ordering key: older first.
    pub fn recency(&self) -> (Instant, u64) {
        (self.last_access, self.access_tick)
    }
}
