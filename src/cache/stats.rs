//! Cache Statistics Module
//!
//! Tracks per-instance activity: lookups, evictions and file traffic.

use serde::Serialize;

// == Cache Stats ==
/// Counters for one cache instance (not shared between processes).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that returned an entry
    pub hits: u64,
    /// Lookups that found no entry
    pub misses: u64,
    /// Lookups that found only an expired entry
    pub expirations: u64,
    /// Entries removed by shrink, flush, purge or expired lookups
    pub evictions: u64,
    /// Times the table was re-read from disk
    pub reloads: u64,
    /// Times the table was written to disk
    pub saves: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses + expirations), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.expirations;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub(crate) fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub(crate) fn record_reload(&mut self) {
        self.reloads += 1;
    }

    pub(crate) fn record_save(&mut self) {
        self.saves += 1;
    }
}
