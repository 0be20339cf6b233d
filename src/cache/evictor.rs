//! Eviction policy: decides which entries leave a tier.
//!
//! Strict LRU within a tier: candidates are ordered by last access (logical
//! tick as tie-break), oldest first, and taken until enough bytes are freed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::cache::entry::{CacheEntry, Tier};

/// An eviction candidate.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub size_bytes: u64,
    pub last_access: Instant,
    pub access_tick: u64,
}

// Older access = higher eviction priority, so the max-heap pops it first.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.last_access, other.access_tick).cmp(&(self.last_access, self.access_tick))
    }
}

/// The eviction policy engine.
#[derive(Debug, Default, Clone)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Select least-recently-used entries of `tier` whose sizes add up to at
    /// least `bytes_needed`.
    ///
    /// Returns candidates oldest first. Keys in `protected` are never chosen.
    /// If the tier cannot free enough, every eligible entry is returned.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry>,
        tier: Tier,
        bytes_needed: u64,
        protected: &[String],
    ) -> Vec<EvictionCandidate> {
        if bytes_needed == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<EvictionCandidate> = entries
            .filter(|e| e.tier == tier && !protected.iter().any(|p| p == &e.key))
            .map(|e| EvictionCandidate {
                key: e.key.clone(),
                size_bytes: e.size_bytes,
                last_access: e.last_access,
                access_tick: e.access_tick,
            })
            .collect();

        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < bytes_needed {
            match heap.pop() {
                Some(candidate) => {
                    freed += candidate.size_bytes;
                    victims.push(candidate);
                }
                None => break,
            }
        }
        victims
    }
}
