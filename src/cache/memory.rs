//! Tier 1: in-process LRU map bounded by a byte budget.

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::backend::{BackendError, CacheBackend};
use crate::cache::codec;
use crate::value::Value;

struct MemoryState {
    entries: LruCache<String, (Value, u64)>,
    bytes_used: u64,
}

/// Byte-bounded LRU cache of live values.
pub struct MemoryCache {
    budget: u64,
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                bytes_used: 0,
            }),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let mut state = self.state.lock();
        Ok(state.entries.get(key).map(|(value, _)| value.clone()))
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), BackendError> {
        let size = codec::encoded_size(value)?;
        if size > self.budget {
            return Err(BackendError::TooLarge {
                size,
                budget: self.budget,
            });
        }

        let mut state = self.state.lock();
        if let Some((_, old_size)) = state.entries.pop(key) {
            state.bytes_used -= old_size;
        }

        while state.bytes_used + size > self.budget {
            match state.entries.pop_lru() {
                Some((evicted, (_, evicted_size))) => {
                    state.bytes_used -= evicted_size;
                    debug!(key = %evicted, size = evicted_size, "Memory tier evicted entry");
                }
                None => break,
            }
        }

        state.entries.put(key.to_string(), (value.clone(), size));
        state.bytes_used += size;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.state.lock().entries.contains(key))
    }

    fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut state = self.state.lock();
        match state.entries.pop(key) {
            Some((_, size)) => {
                state.bytes_used -= size;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.bytes_used = 0;
        Ok(())
    }

    fn size(&self) -> Result<u64, BackendError> {
        Ok(self.state.lock().bytes_used)
    }

    fn list_entries(&self) -> Result<Vec<(String, u64)>, BackendError> {
        // LruCache iterates most recent first.
        let state = self.state.lock();
        let mut entries: Vec<(String, u64)> = state
            .entries
            .iter()
            .map(|(k, (_, size))| (k.clone(), *size))
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Value {
        Value::Bytes(vec![7u8; len])
    }

    fn encoded(len: usize) -> u64 {
        codec::encoded_size(&blob(len)).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = MemoryCache::new(1 << 20);
        cache.put("a", &Value::Text("hello".into())).unwrap();
        assert_eq!(cache.get("a").unwrap(), Some(Value::Text("hello".into())));
        assert!(cache.exists("a").unwrap());
        assert_eq!(cache.get("missing").unwrap(), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = MemoryCache::new(encoded(100) * 2);
        cache.put("a", &blob(100)).unwrap();
        cache.put("b", &blob(100)).unwrap();
        // Touch "a" so "b" becomes the LRU entry.
        cache.get("a").unwrap();
        cache.put("c", &blob(100)).unwrap();

        assert!(cache.exists("a").unwrap());
        assert!(!cache.exists("b").unwrap());
        assert!(cache.exists("c").unwrap());
        assert_eq!(cache.size().unwrap(), encoded(100) * 2);
        assert_eq!(cache.list_keys().unwrap(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_rejects_value_larger_than_budget() {
        let cache = MemoryCache::new(64);
        let err = cache.put("big", &blob(1000)).unwrap_err();
        assert!(matches!(err, BackendError::TooLarge { budget: 64, .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let cache = MemoryCache::new(1 << 20);
        cache.put("a", &blob(100)).unwrap();
        cache.put("a", &blob(100)).unwrap();
        assert_eq!(cache.size().unwrap(), encoded(100));
        assert!(cache.delete("a").unwrap());
        assert_eq!(cache.size().unwrap(), 0);
        assert!(!cache.delete("a").unwrap());
    }
}
