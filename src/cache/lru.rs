//! LRU Module
//!
//! Least Recently Used bookkeeping for cache eviction.
//!
//! Every index slot stamps itself with a tick from a shared [`LruClock`] when
//! it is inserted or read. Readers only do an atomic store, so recency
//! tracking never serializes unrelated keys. Eviction order is computed from
//! a snapshot of the stamps when the size bound is exceeded.

use std::sync::atomic::{AtomicU64, Ordering};

// == LRU Clock ==
/// Monotonic access counter shared by all slots of one store.
#[derive(Debug, Default)]
pub struct LruClock {
    tick: AtomicU64,
}

impl LruClock {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            tick: AtomicU64::new(0),
        }
    }

    // == Tick ==
    /// Returns a tick greater than every tick handed out before.
    pub fn tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// == Eviction Candidate ==
/// Snapshot of one slot taken for eviction planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<K> {
    pub key: K,
    pub last_used: u64,
    pub size: u64,
}

// == Select Victims ==
/// Picks least recently used candidates until `total` fits within `bound`.
///
/// Returns the victims oldest first. An empty result means nothing needs to go.
pub fn select_victims<K>(mut candidates: Vec<Candidate<K>>, total: u64, bound: u64) -> Vec<Candidate<K>> {
    if total <= bound {
        return Vec::new();
    }

    candidates.sort_by_key(|c| c.last_used);

    let mut remaining = total;
    let mut victims = Vec::new();
    for candidate in candidates {
        if remaining <= bound {
            break;
        }
        remaining = remaining.saturating_sub(candidate.size);
        victims.push(candidate);
    }
    victims
}
