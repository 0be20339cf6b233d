//! Lazy proxies for offloaded namespace variables.
//!
//! A [`LazyVariable`] owns no data up front. The first access loads the value
//! from its cache entry or spill file and memoizes it for the lifetime of the
//! handle. Dropping the last clone releases the backing storage.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::tiered::TieredCache;
use crate::memory::spill::SpillHandle;
use crate::value::Value;

/// Ownership of one cache key; deletes the key when dropped.
struct CacheLease {
    key: String,
    cache: Weak<Mutex<TieredCache>>,
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.lock().delete(&self.key);
            debug!(key = %self.key, "Released cached variable");
        }
    }
}

enum Backing {
    Cached(CacheLease),
    Spilled(SpillHandle),
}

struct LazyInner {
    name: String,
    backing: Backing,
    value: OnceLock<Value>,
}

#[derive(Clone)]
pub struct LazyVariable {
    inner: Arc<LazyInner>,
}

impl LazyVariable {
    /// Proxy for a value stored in the cache under `key`.
    pub fn cached(name: impl Into<String>, key: impl Into<String>, cache: Weak<Mutex<TieredCache>>) -> Self {
        Self::with_backing(
            name.into(),
            Backing::Cached(CacheLease {
                key: key.into(),
                cache,
            }),
        )
    }

    /// Proxy for a spilled value.
    pub fn spilled(name: impl Into<String>, handle: SpillHandle) -> Self {
        Self::with_backing(name.into(), Backing::Spilled(handle))
    }

    fn with_backing(name: String, backing: Backing) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                name,
                backing,
                value: OnceLock::new(),
            }),
        }
    }

    /// The value, loading it on first use. `None` if the backing entry is gone.
    pub fn get(&self) -> Option<&Value> {
        if let Some(value) = self.inner.value.get() {
            return Some(value);
        }
        let loaded = self.load()?;
        // A concurrent loader may have won; either copy is the same value.
        let _ = self.inner.value.set(loaded);
        self.inner.value.get()
    }

    fn load(&self) -> Option<Value> {
        let name = &self.inner.name;
        match &self.inner.backing {
            Backing::Cached(lease) => {
                let cache = lease.cache.upgrade()?;
                let value = cache.lock().get(&lease.key);
                if value.is_none() {
                    warn!(name = %name, key = %lease.key, "Cached variable is no longer in the cache");
                }
                value
            }
            Backing::Spilled(handle) => match handle.load() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(name = %name, path = %handle.path().display(), error = %e, "Failed to load spilled variable");
                    None
                }
            },
        }
    }

    pub fn len(&self) -> Option<usize> {
        self.get()?.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn item(&self, index: usize) -> Option<&Value> {
        self.get()?.item(index)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.get()?.field(name)
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self.get() {
            Some(value) => value.iter(),
            None => Box::new(std::iter::empty()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.value.get().is_some()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cache key, for cache-backed proxies.
    pub fn key(&self) -> Option<&str> {
        match &self.inner.backing {
            Backing::Cached(lease) => Some(&lease.key),
            Backing::Spilled(_) => None,
        }
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.inner.backing, Backing::Spilled(_))
    }
}

impl fmt::Debug for LazyVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyVariable")
            .field("name", &self.inner.name)
            .field("key", &self.key())
            .field("spilled", &self.is_spilled())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
