//! Cache Module
//!
//! Response cache keyed by route, with fingerprint-based freshness and LRU
//! eviction under an aggregate size bound.

mod entry;
mod fingerprint;
mod lru;
mod medium;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, EntryMeta};
pub use fingerprint::{http_date, Fingerprint};
pub use lru::{select_victims, Candidate, LruClock};
pub use medium::{blob_name, CacheMedium, DiskMedium, MemoryMedium};
pub use stats::{CacheStats, StatsRecorder};
pub use store::CacheStore;
