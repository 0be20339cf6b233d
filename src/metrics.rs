//! Prometheus metrics for the tiered cache.
//!
//! Each cache owns its registry so several caches (and tests) can coexist in
//! one process without duplicate-registration errors.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::entry::Tier;

#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    operations: IntCounterVec,
    tier_bytes: IntGaugeVec,
    tier_entries: IntGaugeVec,
}

impl CacheMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("session_cache".to_string()), None)?;

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Cache operations by kind and outcome"),
            &["op", "result"],
        )?;
        let tier_bytes = IntGaugeVec::new(
            Opts::new("tier_bytes", "Encoded bytes resident per tier"),
            &["tier"],
        )?;
        let tier_entries = IntGaugeVec::new(
            Opts::new("tier_entries", "Entries resident per tier"),
            &["tier"],
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(tier_bytes.clone()))?;
        registry.register(Box::new(tier_entries.clone()))?;

        Ok(Self {
            registry,
            operations,
            tier_bytes,
            tier_entries,
        })
    }

    /// Count one operation outcome, e.g. `("get", "hit")`.
    pub fn record(&self, op: &str, result: &str) {
        self.operations.with_label_values(&[op, result]).inc();
    }

    pub fn operation_count(&self, op: &str, result: &str) -> u64 {
        self.operations.with_label_values(&[op, result]).get()
    }

    pub fn set_tier(&self, tier: Tier, entries: usize, bytes: u64) {
        let label = tier.to_string();
        self.tier_entries.with_label_values(&[label.as_str()]).set(entries as i64);
        self.tier_bytes.with_label_values(&[label.as_str()]).set(bytes as i64);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
