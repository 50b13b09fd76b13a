// Export statistics — selection counts, cache hit rate, conversion outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub selections: u64,
    pub cache_hits: u64,
    pub conversions: u64,
    pub failures: u64,
    pub downloads: u64,
    pub cache_hit_rate: f64,
}

#[derive(Default)]
pub struct ExportStats {
    selections: AtomicU64,
    cache_hits: AtomicU64,
    conversions: AtomicU64,
    failures: AtomicU64,
    downloads: AtomicU64,
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_selection(&self) {
        self.selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversion(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversions(&self) -> u64 {
        self.conversions.load(Ordering::Relaxed)
    }

    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let selections = self.selections.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_hit_rate = if selections > 0 {
            cache_hits as f64 / selections as f64
        } else {
            0.0
        };

        StatsSnapshot {
            selections,
            cache_hits,
            conversions: self.conversions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }
}
