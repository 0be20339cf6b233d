//! Integration tests for the tiered cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use session_cache::cache::codec;
use session_cache::cache::memory::MemoryCache;
use session_cache::cache::{BackendError, CacheBackend, Tier, TieredCache};
use session_cache::config::Config;
use session_cache::value::{Column, ColumnData, Table, Value};

const KB: usize = 1024;

/// Tier boundaries scaled down by 1024: 10KB / 100KB / 1000KB.
fn scaled_config(dir: &TempDir) -> Config {
    let mut config = Config::with_cache_dir(dir.path());
    config.tiers.memory_max_entry = 10 * KB as u64;
    config.tiers.sqlite_max_entry = 100 * KB as u64;
    config.tiers.columnar_max_entry = 1000 * KB as u64;
    config.tiers.memory_budget = 2 * 1024 * KB as u64;
    config.tiers.sqlite_budget = 10 * 1024 * KB as u64;
    config.tiers.columnar_budget = 50 * 1024 * KB as u64;
    config.tiers.compressed_budget = 200 * 1024 * KB as u64;
    config
}

fn open(config: Config) -> TieredCache {
    TieredCache::open(Arc::new(config)).unwrap()
}

fn blob(len: usize) -> Value {
    Value::Bytes((0..len).map(|i| (i % 251) as u8).collect())
}

#[test]
fn test_size_based_placement_and_delete() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));

    assert!(cache.put("a", &blob(5 * KB), None));
    assert!(cache.put("b", &blob(50 * KB), None));
    assert!(cache.put("c", &blob(5 * 1024 * KB), None));

    let stats = cache.get_stats();
    let expected: BTreeMap<u8, usize> = [(1, 1), (2, 1), (3, 0), (4, 1)].into_iter().collect();
    assert_eq!(stats.tier_counts, expected);

    assert!(cache.delete("b"));
    assert_eq!(cache.tier_size(Tier::Sqlite), 0);
    assert!(!cache.exists("b"));
    assert_eq!(cache.get("c"), Some(blob(5 * 1024 * KB)));
}

#[test]
fn test_put_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));
    let value = blob(20 * KB);
    let size = codec::encoded_size(&value).unwrap();

    assert!(cache.put("k", &value, None));
    assert!(cache.put("k", &value, None));

    assert_eq!(cache.get("k"), Some(value));
    assert_eq!(cache.tier_size(Tier::Sqlite), size);
    assert_eq!(cache.get_stats().total_entries, 1);
}

#[test]
fn test_reput_with_new_size_moves_tier() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));

    assert!(cache.put("k", &blob(KB), None));
    assert!(cache.put("k", &blob(50 * KB), None));

    assert_eq!(cache.entry("k").unwrap().tier, Tier::Sqlite);
    assert_eq!(cache.tier_size(Tier::Memory), 0);
    assert_eq!(cache.get("k"), Some(blob(50 * KB)));
}

#[test]
fn test_roundtrip_value_shapes() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));

    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::Text("session".into()));
    map.insert("ratio".to_string(), Value::Float(0.25));
    map.insert("flags".to_string(), Value::List(vec![Value::Bool(true), Value::Null]));

    let rows = 20_000;
    let table = Table::new(vec![
        Column::new("id", ColumnData::Int64((0..rows as i64).collect())),
        Column::new("label", ColumnData::Utf8((0..rows).map(|i| format!("r{i}")).collect())),
    ])
    .unwrap();

    let values = vec![
        ("scalar", Value::Int(-7)),
        ("map", Value::Map(map)),
        // Large enough for the columnar tier, so it goes through Parquet.
        ("table", Value::Table(table)),
    ];

    for (key, value) in &values {
        assert!(cache.put(key, value, None));
    }
    assert_eq!(cache.entry("table").unwrap().tier, Tier::Columnar);
    for (key, value) in &values {
        assert_eq!(cache.get(key).as_ref(), Some(value), "key {key}");
    }
}

#[test]
fn test_lru_demotes_oldest_entry() {
    let tmp = TempDir::new().unwrap();
    let mut config = scaled_config(&tmp);
    let size = codec::encoded_size(&blob(KB)).unwrap();
    config.tiers.memory_budget = size * 3;
    let mut cache = open(config);

    for key in ["k0", "k1", "k2"] {
        assert!(cache.put(key, &blob(KB), None));
    }
    // Touch k0 so k1 becomes the least recently used.
    assert!(cache.get("k0").is_some());
    assert!(cache.put("k3", &blob(KB), None));

    assert_eq!(cache.entry("k1").unwrap().tier, Tier::Sqlite);
    for key in ["k0", "k2", "k3"] {
        assert_eq!(cache.entry(key).unwrap().tier, Tier::Memory, "{key}");
    }
}

#[test]
fn test_coldest_tier_only_evicts() {
    let tmp = TempDir::new().unwrap();
    let mut config = scaled_config(&tmp);
    let value = blob(2000 * KB);
    let size = codec::encoded_size(&value).unwrap();
    config.tiers.compressed_budget = size * 2;
    let mut cache = open(config);

    assert!(cache.put("c0", &value, None));
    assert!(cache.put("c1", &value, None));
    assert!(cache.put("c2", &value, None));

    assert!(cache.entry("c0").is_none());
    assert_eq!(cache.get_stats().counters.evictions, 1);
    assert_eq!(cache.tier_size(Tier::Compressed), size * 2);
}

#[test]
fn test_promotion_moves_one_tier_per_access() {
    let tmp = TempDir::new().unwrap();
    let mut config = scaled_config(&tmp);
    config.tiers.promotion_threshold = 0.5;
    let mut cache = open(config);

    let value = blob(2000 * KB);
    assert!(cache.put("hot", &value, None));
    assert_eq!(cache.entry("hot").unwrap().tier, Tier::Compressed);

    let mut seen = vec![];
    for _ in 0..4 {
        assert_eq!(cache.get("hot").as_ref(), Some(&value));
        seen.push(cache.entry("hot").unwrap().tier);
    }
    assert_eq!(seen, vec![Tier::Columnar, Tier::Sqlite, Tier::Memory, Tier::Memory]);
    assert_eq!(cache.get_stats().counters.promotions, 3);
}

#[test]
fn test_default_threshold_does_not_promote_on_first_read() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));
    assert!(cache.put("k", &blob(50 * KB), None));
    cache.get("k");
    assert_eq!(cache.entry("k").unwrap().tier, Tier::Sqlite);
}

#[test]
fn test_value_larger_than_any_tier_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut config = scaled_config(&tmp);
    config.tiers.compressed_budget = 1024;
    config.tiers.columnar_budget = 1024;
    let mut cache = open(config);

    assert!(!cache.put("big", &blob(2000 * KB), None));
    assert!(cache.is_empty());
    assert_eq!(cache.get_stats().counters.write_failures, 1);
}

#[test]
fn test_stats_hit_rate() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));
    cache.put("k", &Value::Int(1), None);
    cache.get("k");
    cache.get("missing");
    let stats = cache.get_stats();
    assert_eq!(stats.counters.hits, 1);
    assert_eq!(stats.counters.misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
}

#[test]
fn test_reopen_without_clear_restores_entries() {
    let tmp = TempDir::new().unwrap();
    let mut config = scaled_config(&tmp);
    {
        let mut cache = open(config.clone());
        assert!(cache.put("mid", &blob(50 * KB), None));
        assert!(cache.put("big", &blob(2000 * KB), None));
    }

    config.cache.clear_on_open = false;
    let mut cache = open(config);
    let stats = cache.get_stats();
    let expected: BTreeMap<u8, usize> = [(1, 0), (2, 1), (3, 0), (4, 1)].into_iter().collect();
    assert_eq!(stats.tier_counts, expected);
    assert_eq!(stats.tier_bytes[&2], codec::encoded_size(&blob(50 * KB)).unwrap());
    assert_eq!(cache.get("mid"), Some(blob(50 * KB)));
    assert_eq!(cache.get("big"), Some(blob(2000 * KB)));
}

#[test]
fn test_reopen_with_clear_starts_empty() {
    let tmp = TempDir::new().unwrap();
    {
        let mut cache = open(scaled_config(&tmp));
        assert!(cache.put("mid", &blob(50 * KB), None));
    }
    let mut cache = open(scaled_config(&tmp));
    assert!(cache.is_empty());
    assert_eq!(cache.get("mid"), None);
}

#[test]
fn test_corrupt_payload_is_dropped_as_miss() {
    let tmp = TempDir::new().unwrap();
    let mut cache = open(scaled_config(&tmp));
    assert!(cache.put("k", &blob(50 * KB), None));
    assert_eq!(cache.entry("k").unwrap().tier, Tier::Sqlite);

    let conn = rusqlite::Connection::open(tmp.path().join("cache.db")).unwrap();
    conn.execute("UPDATE cache_entries SET value = x'ffff', compressed = 0", [])
        .unwrap();

    assert_eq!(cache.get("k"), None);
    assert!(cache.entry("k").is_none());
    assert_eq!(cache.tier_size(Tier::Sqlite), 0);
    assert_eq!(cache.get_stats().counters.misses, 1);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
}

/// Memory backend whose writes can be switched to fail.
struct FlakyBackend {
    inner: MemoryCache,
    fail_puts: Arc<AtomicBool>,
}

impl CacheBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), BackendError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(key, value)
    }

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.inner.delete(key)
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.inner.clear()
    }

    fn size(&self) -> Result<u64, BackendError> {
        self.inner.size()
    }

    fn list_entries(&self) -> Result<Vec<(String, u64)>, BackendError> {
        self.inner.list_entries()
    }
}

fn flaky_cache(tmp: &TempDir) -> (TieredCache, Arc<AtomicBool>) {
    let config = scaled_config(tmp);
    let fail_puts = Arc::new(AtomicBool::new(false));
    let mut backends: HashMap<Tier, Box<dyn CacheBackend>> = HashMap::new();
    for tier in Tier::ALL {
        backends.insert(
            tier,
            Box::new(FlakyBackend {
                inner: MemoryCache::new(config.tiers.capacity(tier)),
                fail_puts: Arc::clone(&fail_puts),
            }),
        );
    }
    let cache = TieredCache::with_backends(Arc::new(config), backends).unwrap();
    (cache, fail_puts)
}

#[test]
fn test_failed_write_keeps_existing_entry() {
    let tmp = TempDir::new().unwrap();
    let (mut cache, fail_puts) = flaky_cache(&tmp);
    let old = blob(KB);
    let old_size = codec::encoded_size(&old).unwrap();
    assert!(cache.put("k", &old, None));

    fail_puts.store(true, Ordering::SeqCst);
    assert!(!cache.put("k", &blob(2 * KB), None));
    assert!(!cache.put("other", &blob(KB), None));

    let entry = cache.entry("k").unwrap();
    assert_eq!(entry.tier, Tier::Memory);
    assert_eq!(entry.size_bytes, old_size);
    assert_eq!(cache.tier_size(Tier::Memory), old_size);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_stats().counters.write_failures, 2);
    assert_eq!(cache.get("k"), Some(old));
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, usize),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..8, 0usize..3000).prop_map(|(k, len)| Op::Put(k, len)),
        1 => (0u8..8).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_tier_budgets_hold(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_cache_dir(tmp.path());
        config.tiers.memory_max_entry = 1000;
        config.tiers.sqlite_max_entry = 2000;
        config.tiers.columnar_max_entry = 2500;
        config.tiers.memory_budget = 4000;
        config.tiers.sqlite_budget = 6000;
        config.tiers.columnar_budget = 8000;
        config.tiers.compressed_budget = 10_000;
        let mut cache = open(config);

        for op in ops {
            match op {
                Op::Put(k, len) => { cache.put(&format!("k{k}"), &blob(len), None); }
                Op::Delete(k) => { cache.delete(&format!("k{k}")); }
            }

            let stats = cache.get_stats();
            let mut summed: BTreeMap<u8, u64> = BTreeMap::new();
            for k in 0u8..8 {
                if let Some(entry) = cache.entry(&format!("k{k}")) {
                    *summed.entry(entry.tier.level()).or_default() += entry.size_bytes;
                }
            }
            for tier in Tier::ALL {
                let level = tier.level();
                prop_assert!(stats.tier_bytes[&level] <= stats.tier_capacity[&level]);
                prop_assert_eq!(stats.tier_bytes[&level], summed.get(&level).copied().unwrap_or(0));
            }
        }
    }
}
