//! The explicit context object tying the cache and the memory manager
//! together for one session.

use std::fs;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use crate::cache::tiered::{new_shared_cache, SharedCache};
use crate::config::Config;
use crate::memory::manager::MemoryManager;
use crate::memory::stats::{MemoryProbe, SysinfoProbe};
use crate::stream::processor::StreamProcessor;

pub struct CacheContext {
    config: Arc<Config>,
    cache: SharedCache,
    memory: Arc<MemoryManager>,
    processor: StreamProcessor,
}

impl CacheContext {
    /// Open the cache and memory manager for `config`, sampling this process.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        Self::open_with_probe(config, Box::new(SysinfoProbe::new()))
    }

    pub fn open_with_probe(config: Config, probe: Box<dyn MemoryProbe>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        fs::create_dir_all(&config.cache.cache_dir)
            .with_context(|| format!("creating cache directory {}", config.cache.cache_dir.display()))?;

        let cache = new_shared_cache(config.clone()).context("opening tiered cache")?;
        let memory = Arc::new(MemoryManager::with_probe(&config, probe));

        let weak = Arc::downgrade(&cache);
        memory.register_reclaimer("tiered-cache-expiry", move || match weak.upgrade() {
            Some(cache) => cache.lock().reclaim_expired(),
            None => 0,
        });

        info!(cache_dir = %config.cache.cache_dir.display(), "Cache context opened");
        Ok(Self {
            processor: StreamProcessor::new(&config.stream),
            config,
            cache,
            memory,
        })
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn stream_processor(&self) -> &StreamProcessor {
        &self.processor
    }

    /// Tear down: sweep expired entries and dead spills, then log final stats.
    pub fn shutdown(self) {
        let expired = self.cache.lock().cleanup_expired();
        self.memory.shutdown();
        let stats = self.cache.lock().get_stats();
        info!(
            expired,
            entries = stats.total_entries,
            hit_rate = stats.hit_rate,
            "Cache context shut down"
        );
    }
}
