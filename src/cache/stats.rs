//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    /// Number of fresh cache retrievals
    pub hits: u64,
    /// Number of lookups that found nothing usable
    pub misses: u64,
    /// Entries dropped because their origin changed
    pub stale: u64,
    /// Entries evicted due to LRU policy
    pub evictions: u64,
    /// Writes skipped because the cache medium failed
    pub degraded_writes: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Current aggregate payload size in bytes
    pub total_bytes: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters updated from concurrent requests.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    evictions: AtomicU64,
    degraded_writes: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_degraded_write(&self) {
        self.degraded_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters; entry count and size come from the store.
    pub fn snapshot(&self, total_entries: usize, total_bytes: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            degraded_writes: self.degraded_writes.load(Ordering::Relaxed),
            total_entries,
            total_bytes,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsRecorder::new().snapshot(0, 0);
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let recorder = StatsRecorder::new();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();
        assert_eq!(recorder.snapshot(0, 0).hit_rate(), 0.75);
    }

    #[test]
    fn test_counters() {
        let recorder = StatsRecorder::new();
        recorder.record_stale();
        recorder.record_evictions(3);
        recorder.record_degraded_write();

        let stats = recorder.snapshot(7, 1024);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.evictions, 3);
        assert_eq!(stats.degraded_writes, 1);
        assert_eq!(stats.total_entries, 7);
        assert_eq!(stats.total_bytes, 1024);
    }
}
