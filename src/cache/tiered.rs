//! Tier manager: orchestrates value placement and movement between tiers.
//!
//! The tiered cache is the central coordinator. It:
//! - Places new values by encoded size
//! - Tracks every entry and per-tier usage against the tier budget
//! - Demotes (or, in the coldest tier, evicts) LRU entries before a write
//!   that would overflow a tier
//! - Promotes frequently read entries one tier hotter per access
//!
//! No operation returns an error: failures are logged and degrade to a miss
//! or a rejected write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::backend::{BackendError, CacheBackend};
use crate::cache::codec;
use crate::cache::compressor::Compressor;
use crate::cache::disk::{DiskCache, DiskOptions};
use crate::cache::entry::{CacheEntry, Tier};
use crate::cache::evictor::Evictor;
use crate::cache::memory::MemoryCache;
use crate::cache::sqlite::SqliteCache;
use crate::config::Config;
use crate::metrics::CacheMetrics;
use crate::value::Value;

/// Per-tier usage statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    /// Number of entries in this tier.
    pub entry_count: usize,
    /// Total encoded bytes in this tier.
    pub bytes_used: u64,
    /// Capacity budget in bytes.
    pub capacity: u64,
}

impl TierStats {
    /// Usage as a fraction of capacity (0.0 - 1.0).
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.bytes_used as f64 / self.capacity as f64
    }

    /// Bytes still available.
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.bytes_used)
    }
}

/// Operation counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub expirations: u64,
    pub write_failures: u64,
}

/// Snapshot returned by [`TieredCache::get_stats`]. Tier maps are keyed by level (1-4).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub tier_counts: BTreeMap<u8, usize>,
    pub tier_bytes: BTreeMap<u8, u64>,
    pub tier_capacity: BTreeMap<u8, u64>,
    pub hit_rate: f64,
    #[serde(flatten)]
    pub counters: CacheCounters,
}

/// The central tier manager.
pub struct TieredCache {
    /// All entries indexed by key.
    entries: HashMap<String, CacheEntry>,

    /// Per-tier statistics.
    tier_stats: HashMap<Tier, TierStats>,

    /// Tier -> backend table, built once.
    backends: HashMap<Tier, Box<dyn CacheBackend>>,

    /// Eviction policy.
    evictor: Evictor,

    counters: CacheCounters,
    metrics: CacheMetrics,

    /// Logical access clock.
    clock: u64,

    /// Configuration.
    config: Arc<Config>,
}

impl TieredCache {
    /// Open the standard four-tier layout under `config.cache.cache_dir`.
    pub fn open(config: Arc<Config>) -> Result<Self, BackendError> {
        let tiers = &config.tiers;
        let compressor = Compressor::new(config.compression.clone());
        let cache = &config.cache;

        let mut backends: HashMap<Tier, Box<dyn CacheBackend>> = HashMap::new();
        backends.insert(Tier::Memory, Box::new(MemoryCache::new(tiers.memory_budget)));
        backends.insert(
            Tier::Sqlite,
            Box::new(SqliteCache::open(
                &cache.sqlite_dir(),
                tiers.sqlite_budget,
                config.compression.sqlite_compression.then(|| compressor.clone()),
            )?),
        );
        backends.insert(
            Tier::Columnar,
            Box::new(DiskCache::open(
                cache.columnar_dir(),
                tiers.columnar_budget,
                DiskOptions {
                    columnar: tiers.columnar_parquet,
                    compress: config.compression.columnar_tier_compression,
                },
                compressor.clone(),
            )?),
        );
        backends.insert(
            Tier::Compressed,
            Box::new(DiskCache::open(
                cache.compressed_dir(),
                tiers.compressed_budget,
                DiskOptions {
                    columnar: false,
                    compress: true,
                },
                compressor,
            )?),
        );

        let mut cache = Self::with_backends(config.clone(), backends)?;
        if config.cache.clear_on_open {
            for tier in Tier::ALL {
                if let Err(e) = cache.backends[&tier].clear() {
                    warn!(tier = %tier, error = %e, "Failed to clear tier on open");
                }
            }
        } else {
            cache.restore_persisted();
        }

        info!(
            cache_dir = %config.cache.cache_dir.display(),
            memory = tiers.memory_budget,
            sqlite = tiers.sqlite_budget,
            columnar = tiers.columnar_budget,
            compressed = tiers.compressed_budget,
            "Tiered cache opened"
        );

        Ok(cache)
    }

    /// Build a cache over caller-supplied backends. Every tier must be present.
    pub fn with_backends(
        config: Arc<Config>,
        backends: HashMap<Tier, Box<dyn CacheBackend>>,
    ) -> Result<Self, BackendError> {
        let tier_stats = Tier::ALL
            .iter()
            .map(|&tier| {
                (
                    tier,
                    TierStats {
                        capacity: config.tiers.capacity(tier),
                        ..Default::default()
                    },
                )
            })
            .collect();

        Ok(Self {
            entries: HashMap::new(),
            tier_stats,
            backends,
            evictor: Evictor::new(),
            counters: CacheCounters::default(),
            metrics: CacheMetrics::new()?,
            clock: 0,
            config,
        })
    }

    /// Rebuild entry metadata from what the backends already hold.
    ///
    /// Each tier is read least recently used first so the restored LRU order
    /// matches the stored one. A key found in two tiers keeps its hotter copy.
    /// Returns the number of entries restored.
    pub fn restore_persisted(&mut self) -> usize {
        let ttl = self.config.cache.default_ttl_secs.map(Duration::from_secs);
        let mut restored = 0;
        for tier in Tier::ALL {
            let stored = match self.backend(tier).list_entries() {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Failed to list persisted entries");
                    continue;
                }
            };
            for (key, size) in stored {
                if self.entries.contains_key(&key) {
                    if let Err(e) = self.backend(tier).delete(&key) {
                        warn!(key = %key, tier = %tier, error = %e, "Failed to delete duplicate payload");
                    }
                    continue;
                }
                let tick = self.next_tick();
                self.entries
                    .insert(key.clone(), CacheEntry::new(key, size, tier, ttl, tick));
                self.account_add(tier, size);
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "Restored persisted cache entries");
        }
        restored
    }

    fn backend(&self, tier: Tier) -> &dyn CacheBackend {
        self.backends[&tier].as_ref()
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn account_add(&mut self, tier: Tier, size: u64) {
        if let Some(stats) = self.tier_stats.get_mut(&tier) {
            stats.entry_count += 1;
            stats.bytes_used += size;
            self.metrics.set_tier(tier, stats.entry_count, stats.bytes_used);
        }
    }

    fn account_remove(&mut self, tier: Tier, size: u64) {
        if let Some(stats) = self.tier_stats.get_mut(&tier) {
            stats.entry_count = stats.entry_count.saturating_sub(1);
            stats.bytes_used = stats.bytes_used.saturating_sub(size);
            self.metrics.set_tier(tier, stats.entry_count, stats.bytes_used);
        }
    }

    /// Look up a value.
    ///
    /// Expired entries and entries whose payload vanished or cannot be read
    /// are dropped and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let (tier, expired) = match self.entries.get(key) {
            Some(entry) => (entry.tier, entry.is_expired(now)),
            None => {
                self.counters.misses += 1;
                self.metrics.record("get", "miss");
                return None;
            }
        };

        if expired {
            self.remove_entry(key);
            self.counters.expirations += 1;
            self.counters.misses += 1;
            self.metrics.record("get", "expired");
            return None;
        }

        let value = match self.backend(tier).get(key) {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!(key, tier = %tier, "Payload missing from backend, dropping stale entry");
                self.drop_metadata(key);
                self.counters.misses += 1;
                self.metrics.record("get", "stale");
                return None;
            }
            Err(e) => {
                warn!(key, tier = %tier, error = %e, "Backend read failed, dropping entry");
                self.remove_entry(key);
                self.counters.misses += 1;
                self.metrics.record("get", "error");
                return None;
            }
        };

        let tick = self.next_tick();
        let frequency = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(tick);
                entry.access_frequency(now)
            }
            None => 0.0,
        };
        self.counters.hits += 1;
        self.metrics.record("get", "hit");

        if frequency > self.config.tiers.promotion_threshold {
            if let Some(hotter) = tier.promote() {
                self.promote_entry(key, tier, hotter, &value);
            }
        }

        Some(value)
    }

    /// Store a value. Returns false if it could not be serialized or stored
    /// anywhere; in that case the key's existing metadata is untouched.
    pub fn put(&mut self, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        let size = match codec::encoded_size(value) {
            Ok(size) => size,
            Err(e) => {
                warn!(key, error = %e, "Value is not serializable, not cached");
                self.metrics.record("put", "unserializable");
                return false;
            }
        };
        let ttl = ttl.or(self.config.cache.default_ttl_secs.map(Duration::from_secs));

        let initial = self.config.tiers.tier_for_size(size);
        let protected = vec![key.to_string()];

        let mut candidate = Some(initial);
        while let Some(tier) = candidate {
            candidate = tier.demote();

            if size > self.config.tiers.capacity(tier) {
                debug!(key, size, tier = %tier, "Value exceeds tier capacity, trying colder tier");
                continue;
            }

            // An overwrite in the same tier reuses the old entry's bytes.
            let reclaimable = match self.entries.get(key) {
                Some(old) if old.tier == tier => old.size_bytes,
                _ => 0,
            };
            if !self.ensure_capacity(tier, size.saturating_sub(reclaimable), &protected) {
                debug!(key, size, tier = %tier, "Could not free space, trying colder tier");
                continue;
            }

            if let Err(e) = self.backend(tier).put(key, value) {
                warn!(key, size, tier = %tier, error = %e, "Backend write failed");
                self.counters.write_failures += 1;
                self.metrics.record("put", "error");
                return false;
            }

            if let Some(old) = self.entries.remove(key) {
                self.account_remove(old.tier, old.size_bytes);
                if old.tier != tier {
                    if let Err(e) = self.backend(old.tier).delete(key) {
                        warn!(key, tier = %old.tier, error = %e, "Failed to delete replaced payload");
                    }
                }
            }

            let tick = self.next_tick();
            self.entries
                .insert(key.to_string(), CacheEntry::new(key, size, tier, ttl, tick));
            self.account_add(tier, size);
            self.metrics.record("put", "ok");

            debug!(key, size, tier = %tier, "Cached value");
            return true;
        }

        warn!(key, size, "Value fits in no tier, not cached");
        self.counters.write_failures += 1;
        self.metrics.record("put", "too_large");
        false
    }

    /// Remove a key from whichever tier holds it.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key).is_some();
        self.metrics.record("delete", if removed { "ok" } else { "missing" });
        removed
    }

    /// Whether a live (non-expired) entry exists.
    pub fn exists(&mut self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };
        if expired {
            self.remove_entry(key);
            self.counters.expirations += 1;
            return false;
        }
        true
    }

    /// Empty every tier.
    pub fn clear(&mut self) {
        for tier in Tier::ALL {
            if let Err(e) = self.backend(tier).clear() {
                warn!(tier = %tier, error = %e, "Failed to clear tier");
            }
            if let Some(stats) = self.tier_stats.get_mut(&tier) {
                stats.entry_count = 0;
                stats.bytes_used = 0;
            }
            self.metrics.set_tier(tier, 0, 0);
        }
        let removed = self.entries.len();
        self.entries.clear();
        info!(removed, "Cache cleared");
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.remove_entry(key);
        }
        self.counters.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!(count = expired.len(), "Removed expired entries");
        }
        expired.len()
    }

    /// Bytes freed by removing every expired entry.
    pub fn reclaim_expired(&mut self) -> u64 {
        let now = Instant::now();
        let bytes: u64 = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.size_bytes)
            .sum();
        self.cleanup_expired();
        bytes
    }

    /// Make room for `needed` bytes in `tier`.
    ///
    /// Demotes LRU entries to the next colder tier, or evicts them when the
    /// tier is the coldest or demotion fails. Returns whether the bytes fit.
    fn ensure_capacity(&mut self, tier: Tier, needed: u64, protected: &[String]) -> bool {
        let stats = self.tier_stats.get(&tier).cloned().unwrap_or_default();
        if needed > stats.capacity {
            return false;
        }
        if needed <= stats.available() {
            return true;
        }

        let to_free = needed - stats.available();
        let victims = self
            .evictor
            .select_victims(self.entries.values(), tier, to_free, protected);

        for victim in victims {
            let demoted = match tier.demote() {
                Some(colder) => self.demote_entry(&victim.key, tier, colder, protected),
                None => false,
            };
            if !demoted && self.remove_entry(&victim.key).is_some() {
                self.counters.evictions += 1;
                self.metrics.record("evict", "ok");
                debug!(key = %victim.key, tier = %tier, size = victim.size_bytes, "Evicted entry");
            }
        }

        let stats = &self.tier_stats[&tier];
        stats.bytes_used + needed <= stats.capacity
    }

    /// Move `key` from `from` into the colder tier `to`.
    fn demote_entry(&mut self, key: &str, from: Tier, to: Tier, protected: &[String]) -> bool {
        let size = match self.entries.get(key) {
            Some(entry) => entry.size_bytes,
            None => return false,
        };

        let value = match self.backend(from).get(key) {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => return false,
        };

        let mut protected = protected.to_vec();
        protected.push(key.to_string());
        if !self.ensure_capacity(to, size, &protected) {
            return false;
        }

        if let Err(e) = self.backend(to).put(key, &value) {
            warn!(key, from = %from, to = %to, error = %e, "Demotion write failed");
            return false;
        }
        self.relocate(key, from, to, size);
        self.counters.demotions += 1;
        self.metrics.record("demote", "ok");
        debug!(key, from = %from, to = %to, "Demoted entry");
        true
    }

    /// Move `key` from `from` into the hotter tier `to`.
    fn promote_entry(&mut self, key: &str, from: Tier, to: Tier, value: &Value) {
        let size = match self.entries.get(key) {
            Some(entry) => entry.size_bytes,
            None => return,
        };
        if !self.ensure_capacity(to, size, &[key.to_string()]) {
            debug!(key, from = %from, to = %to, "No room to promote entry");
            return;
        }
        // Making room may have demoted this entry's neighbours into `from`;
        // the entry itself was protected and is still there.
        if let Err(e) = self.backend(to).put(key, value) {
            warn!(key, from = %from, to = %to, error = %e, "Promotion write failed");
            return;
        }
        self.relocate(key, from, to, size);
        self.counters.promotions += 1;
        self.metrics.record("promote", "ok");
        debug!(key, from = %from, to = %to, "Promoted entry");
    }

    /// Bookkeeping after a value was copied from `from` to `to`.
    fn relocate(&mut self, key: &str, from: Tier, to: Tier, size: u64) {
        if let Err(e) = self.backend(from).delete(key) {
            warn!(key, tier = %from, error = %e, "Failed to delete moved payload");
        }
        self.account_remove(from, size);
        self.account_add(to, size);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.tier = to;
        }
    }

    /// Drop metadata and the payload.
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.drop_metadata(key)?;
        if let Err(e) = self.backend(entry.tier).delete(key) {
            warn!(key, tier = %entry.tier, error = %e, "Failed to delete payload");
        }
        Some(entry)
    }

    /// Drop metadata only.
    fn drop_metadata(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.account_remove(entry.tier, entry.size_bytes);
        Some(entry)
    }

    /// Snapshot of counters and per-tier usage.
    pub fn get_stats(&self) -> CacheStats {
        let mut tier_counts = BTreeMap::new();
        let mut tier_bytes = BTreeMap::new();
        let mut tier_capacity = BTreeMap::new();
        for tier in Tier::ALL {
            let stats = self.tier_stats.get(&tier).cloned().unwrap_or_default();
            tier_counts.insert(tier.level(), stats.entry_count);
            tier_bytes.insert(tier.level(), stats.bytes_used);
            tier_capacity.insert(tier.level(), stats.capacity);
        }

        let lookups = self.counters.hits + self.counters.misses;
        CacheStats {
            total_entries: self.entries.len(),
            tier_counts,
            tier_bytes,
            tier_capacity,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.counters.hits as f64 / lookups as f64
            },
            counters: self.counters.clone(),
        }
    }

    /// Get tier statistics for monitoring.
    pub fn tier_stats(&self) -> &HashMap<Tier, TierStats> {
        &self.tier_stats
    }

    /// Encoded bytes resident in `tier`.
    pub fn tier_size(&self, tier: Tier) -> u64 {
        self.tier_stats.get(&tier).map(|s| s.bytes_used).unwrap_or(0)
    }

    /// Metadata for a key.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Total number of entries across all tiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

/// Thread-safe wrapper around the tiered cache.
pub type SharedCache = Arc<Mutex<TieredCache>>;

/// Open a new thread-safe tiered cache.
pub fn new_shared_cache(config: Arc<Config>) -> Result<SharedCache, BackendError> {
    Ok(Arc::new(Mutex::new(TieredCache::open(config)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blob(len: usize) -> Value {
        Value::Bytes(vec![9u8; len])
    }

    fn encoded(len: usize) -> u64 {
        codec::encoded_size(&blob(len)).unwrap()
    }

    fn test_config(dir: &TempDir) -> Arc<Config> {
        let mut config = Config::with_cache_dir(dir.path());
        config.tiers.memory_max_entry = 1_000;
        config.tiers.sqlite_max_entry = 10_000;
        config.tiers.columnar_max_entry = 100_000;
        config.tiers.memory_budget = 10_000;
        config.tiers.sqlite_budget = 100_000;
        config.tiers.columnar_budget = 1_000_000;
        config.tiers.compressed_budget = 10_000_000;
        Arc::new(config)
    }

    #[test]
    fn test_put_places_by_size() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();

        assert!(cache.put("small", &blob(100), None));
        assert!(cache.put("medium", &blob(5_000), None));
        assert!(cache.put("large", &blob(50_000), None));
        assert!(cache.put("huge", &blob(500_000), None));

        assert_eq!(cache.entry("small").unwrap().tier, Tier::Memory);
        assert_eq!(cache.entry("medium").unwrap().tier, Tier::Sqlite);
        assert_eq!(cache.entry("large").unwrap().tier, Tier::Columnar);
        assert_eq!(cache.entry("huge").unwrap().tier, Tier::Compressed);
        assert_eq!(cache.get("huge"), Some(blob(500_000)));
    }

    #[test]
    fn test_unserializable_put_leaves_no_trace() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        assert!(cache.put("k", &Value::Int(1), None));

        let opaque = Value::Opaque(crate::value::Opaque::new("handle", 1u8));
        assert!(!cache.put("k", &opaque, None));
        assert_eq!(cache.get("k"), Some(Value::Int(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        assert!(cache.put("k", &Value::Int(1), Some(Duration::from_millis(20))));
        assert!(cache.exists("k"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.exists("k"));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.tier_size(Tier::Memory), 0);
    }

    #[test]
    fn test_cleanup_expired_reclaims_bytes() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        assert!(cache.put("short", &blob(100), Some(Duration::from_millis(10))));
        assert!(cache.put("long", &blob(100), None));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.reclaim_expired(), encoded(100));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_stats().counters.expirations, 1);
    }

    #[test]
    fn test_full_memory_tier_demotes_lru() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        let per_tier = 10_000 / encoded(900);

        for i in 0..per_tier {
            assert!(cache.put(&format!("k{i}"), &blob(900), None));
        }
        assert!(cache.put("overflow", &blob(900), None));

        assert_eq!(cache.entry("k0").unwrap().tier, Tier::Sqlite);
        assert_eq!(cache.entry("overflow").unwrap().tier, Tier::Memory);
        assert_eq!(cache.get_stats().counters.demotions, 1);
        assert_eq!(cache.get("k0"), Some(blob(900)));
    }

    #[test]
    fn test_missing_payload_self_heals() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        assert!(cache.put("k", &blob(5_000), None));
        // Remove the payload behind the cache's back.
        cache.backend(Tier::Sqlite).delete("k").unwrap();

        assert_eq!(cache.get("k"), None);
        assert!(cache.entry("k").is_none());
        assert_eq!(cache.tier_size(Tier::Sqlite), 0);
    }

    #[test]
    fn test_clear_resets_accounting() {
        let tmp = TempDir::new().unwrap();
        let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
        cache.put("a", &blob(10), None);
        cache.put("b", &blob(5_000), None);
        cache.clear();
        assert!(cache.is_empty());
        for tier in Tier::ALL {
            assert_eq!(cache.tier_size(tier), 0);
        }
    }

    #[test]
    fn test_clear_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let mut cache = TieredCache::open(test_config(&tmp)).unwrap();
            cache.put("persisted", &blob(5_000), None);
        }
        let cache = TieredCache::open(test_config(&tmp)).unwrap();
        assert_eq!(cache.backend(Tier::Sqlite).size().unwrap(), 0);
    }
}
