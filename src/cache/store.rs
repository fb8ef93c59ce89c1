//! Cache Store Module
//!
//! Main cache engine: a sharded in-memory index of entry metadata, payloads
//! in a [`CacheMedium`], fingerprint freshness checks and LRU eviction under
//! an aggregate size bound.
//!
//! Lookups never take a lock wider than one index shard. Writes for the same
//! key serialize on a striped mutex; writes for unrelated keys do not wait on
//! each other. Eviction runs at most once at a time and callers that find it
//! busy simply skip it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::lru::{select_victims, Candidate, LruClock};
use crate::cache::medium::blob_name;
use crate::cache::{
    CacheEntry, CacheMedium, CacheStats, DiskMedium, EntryMeta, Fingerprint, MemoryMedium,
    StatsRecorder,
};
use crate::config::Config;
use crate::error::{Result, TigerError};
use crate::routing::RouteKey;

/// Number of write-lock stripes.
const WRITE_STRIPES: usize = 64;

// == Index Slot ==
#[derive(Debug)]
struct Slot {
    meta: Arc<EntryMeta>,
    blob: String,
    size: u64,
    last_used: AtomicU64,
}

// == Cache Store ==
/// Response cache with fingerprint invalidation and LRU eviction.
#[derive(Debug)]
pub struct CacheStore {
    /// Entry metadata by key
    index: DashMap<RouteKey, Slot>,
    /// Payload storage
    medium: Arc<dyn CacheMedium>,
    /// Per-key write serialization
    write_locks: Vec<Mutex<()>>,
    /// Held while an eviction pass runs
    eviction: Mutex<()>,
    /// LRU access clock
    clock: LruClock,
    /// Blob generation counter
    generation: AtomicU64,
    /// Aggregate payload bytes in the index
    total_bytes: AtomicU64,
    /// Performance statistics
    stats: StatsRecorder,
    /// Aggregate size bound in bytes
    max_size: u64,
    /// Bound on each medium operation
    io_timeout: Duration,
    /// When false, every get misses and every put is skipped
    enabled: bool,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore over a medium.
    ///
    /// # Arguments
    /// * `medium` - Payload storage
    /// * `max_size` - Aggregate payload bound in bytes
    /// * `io_timeout` - Bound on every medium read, write and freshness probe
    pub fn new(medium: Arc<dyn CacheMedium>, max_size: u64, io_timeout: Duration) -> Self {
        Self {
            index: DashMap::new(),
            medium,
            write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
            eviction: Mutex::new(()),
            clock: LruClock::new(),
            generation: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            stats: StatsRecorder::new(),
            max_size,
            io_timeout,
            enabled: true,
        }
    }

    /// In-memory store, mostly for tests and sites without a `cache` directory.
    pub fn in_memory(max_size: u64) -> Self {
        Self::new(Arc::new(MemoryMedium::new()), max_size, Duration::from_secs(1))
    }

    /// Creates the store described by the configuration. Falls back to an
    /// in-memory medium when the `cache` directory is missing.
    pub fn from_config(config: &Config) -> Self {
        let medium: Arc<dyn CacheMedium> = match DiskMedium::open(config.cache_dir()) {
            Ok(disk) => Arc::new(disk),
            Err(e) => {
                warn!("{}; caching in process memory instead", e);
                Arc::new(MemoryMedium::new())
            }
        };
        Self::new(medium, config.cache_max_size, config.cache_io_timeout)
            .with_enabled(config.cache_enabled)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    // == Get ==
    /// Returns the entry for `key` if present and fresh.
    ///
    /// An entry whose origin fingerprint changed (or whose origin vanished)
    /// is removed and reported as a miss, as is an entry whose payload can
    /// no longer be read from the medium.
    pub async fn get(&self, key: &RouteKey) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let (meta, blob) = match self.index.get(key) {
            Some(slot) => {
                slot.last_used.store(self.clock.tick(), Ordering::Relaxed);
                (Arc::clone(&slot.meta), slot.blob.clone())
            }
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        let current = match timeout(self.io_timeout, Fingerprint::probe(&meta.origin)).await {
            Ok(current) => current,
            Err(_) => {
                warn!("Freshness probe for {} timed out", key);
                self.stats.record_miss();
                return None;
            }
        };
        if meta.is_stale(current) {
            debug!("Cache entry for {} is stale", key);
            self.remove_slot(key, &blob).await;
            self.stats.record_stale();
            self.stats.record_miss();
            return None;
        }

        let payload = match timeout(self.io_timeout, self.medium.read(&blob)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!("Cache medium lost payload for {}: {}", key, e);
                self.remove_slot(key, &blob).await;
                self.stats.record_miss();
                return None;
            }
            Err(_) => {
                warn!("Cache medium read for {} timed out", key);
                self.stats.record_miss();
                return None;
            }
        };

        self.stats.record_hit();
        Some(CacheEntry {
            payload,
            meta: (*meta).clone(),
        })
    }

    // == Put ==
    /// Stores an entry, replacing any entry for the same key.
    ///
    /// Returns `Ok(true)` when stored and `Ok(false)` when skipped (cache
    /// disabled, entry not cacheable, or larger than the whole bound). A
    /// medium failure leaves the index untouched and returns
    /// [`TigerError::CacheMediumUnavailable`]; callers treat it as a warning.
    pub async fn put(&self, key: RouteKey, entry: CacheEntry) -> Result<bool> {
        if !self.enabled || !entry.meta.cacheable {
            return Ok(false);
        }
        let size = entry.size();
        if size > self.max_size {
            debug!("Not caching {}: {} bytes exceeds the cache bound", key, size);
            return Ok(false);
        }

        let Ok(_guard) = timeout(self.io_timeout, self.lock_for(&key).lock()).await else {
            debug!("Not caching {}: write lock busy", key);
            return Ok(false);
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let blob = blob_name(&key, generation);
        let medium = Arc::clone(&self.medium);
        let (name, payload) = (blob.clone(), entry.payload.clone());
        let mut write = tokio::spawn(async move { medium.write(&name, &payload).await });
        let failure = match timeout(self.io_timeout, &mut write).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join)) => Some(join.to_string()),
            Err(_) => {
                // The write is still running; remove what it leaves once it lands.
                let medium = Arc::clone(&self.medium);
                let name = blob.clone();
                tokio::spawn(async move {
                    let _ = write.await;
                    if let Err(e) = medium.remove(&name).await {
                        warn!("Could not remove abandoned cache blob {}: {}", name, e);
                    }
                });
                Some("write timed out".to_string())
            }
        };
        if let Some(reason) = failure {
            self.stats.record_degraded_write();
            warn!(
                "Cache medium {} unavailable, serving {} uncached: {}",
                self.medium.describe(),
                key,
                reason
            );
            let _ = timeout(self.io_timeout, self.medium.remove(&blob)).await;
            return Err(TigerError::CacheMediumUnavailable(reason));
        }

        let slot = Slot {
            meta: Arc::new(entry.meta),
            blob,
            size,
            last_used: AtomicU64::new(self.clock.tick()),
        };
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(previous) = self.index.insert(key, slot) {
            self.total_bytes.fetch_sub(previous.size, Ordering::Relaxed);
            self.discard_blob(&previous.blob).await;
        }
        drop(_guard);

        self.evict_if_needed().await;
        Ok(true)
    }

    // == Invalidate ==
    /// Removes the entry for `key`. Returns whether one existed.
    pub async fn invalidate(&self, key: &RouteKey) -> bool {
        let _guard = self.lock_for(key).lock().await;
        match self.index.remove(key) {
            Some((_, slot)) => {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                self.discard_blob(&slot.blob).await;
                true
            }
            None => false,
        }
    }

    // == Evict If Needed ==
    /// Evicts least recently used entries until the aggregate size fits the
    /// bound. Returns how many entries went. Never blocks: when another pass
    /// is already running this one is skipped.
    pub async fn evict_if_needed(&self) -> usize {
        if self.total_bytes() <= self.max_size {
            return 0;
        }
        let Ok(_guard) = self.eviction.try_lock() else {
            return 0;
        };

        let candidates: Vec<Candidate<RouteKey>> = self
            .index
            .iter()
            .map(|slot| Candidate {
                key: slot.key().clone(),
                last_used: slot.value().last_used.load(Ordering::Relaxed),
                size: slot.value().size,
            })
            .collect();

        let victims = select_victims(candidates, self.total_bytes(), self.max_size);
        let mut evicted = 0;
        for victim in victims {
            // Skip entries read since the snapshot; they are no longer least recent.
            let removed = self.index.remove_if(&victim.key, |_, slot| {
                slot.last_used.load(Ordering::Relaxed) == victim.last_used
            });
            if let Some((_, slot)) = removed {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                self.discard_blob(&slot.blob).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
            debug!(
                "Evicted {} cache entries, {} bytes remain",
                evicted,
                self.total_bytes()
            );
        }
        evicted
    }

    // == Sweep Stale ==
    /// Removes every entry whose origin changed. Returns how many were removed.
    pub async fn sweep_stale(&self) -> usize {
        let snapshot: Vec<(RouteKey, Arc<EntryMeta>, String)> = self
            .index
            .iter()
            .map(|slot| {
                (
                    slot.key().clone(),
                    Arc::clone(&slot.value().meta),
                    slot.value().blob.clone(),
                )
            })
            .collect();

        let mut removed = 0;
        for (key, meta, blob) in snapshot {
            let Ok(current) = timeout(self.io_timeout, Fingerprint::probe(&meta.origin)).await
            else {
                continue;
            };
            if meta.is_stale(current) && self.remove_slot(&key, &blob).await {
                self.stats.record_stale();
                removed += 1;
            }
        }
        removed
    }

    // == Purge ==
    /// Drops every entry and clears the medium. Returns the number of entries dropped.
    pub async fn purge(&self) -> usize {
        let count = self.index.len();
        self.index.clear();
        let remaining: u64 = self.index.iter().map(|slot| slot.value().size).sum();
        self.total_bytes.store(remaining, Ordering::Relaxed);

        match timeout(self.io_timeout, self.medium.clear()).await {
            Ok(Ok(blobs)) => debug!("Purged {} entries, {} blobs", count, blobs),
            Ok(Err(e)) => warn!("Clearing cache medium failed: {}", e),
            Err(_) => warn!("Clearing cache medium timed out"),
        }
        count
    }

    /// Releases the medium at server shutdown.
    pub async fn shutdown(&self) {
        let dropped = self.purge().await;
        info!("Cache store closed, {} entries dropped", dropped);
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.index.len(), self.total_bytes())
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    // == Is Empty ==
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn medium_description(&self) -> String {
        self.medium.describe()
    }

    // == Internals ==
    fn lock_for(&self, key: &RouteKey) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.write_locks[(hasher.finish() as usize) % WRITE_STRIPES]
    }

    /// Removes the slot only if it still refers to `blob`, so a concurrent
    /// replacement is never dropped by a reader holding an older view.
    async fn remove_slot(&self, key: &RouteKey, blob: &str) -> bool {
        match self.index.remove_if(key, |_, slot| slot.blob == blob) {
            Some((_, slot)) => {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                self.discard_blob(&slot.blob).await;
                true
            }
            None => false,
        }
    }

    async fn discard_blob(&self, blob: &str) {
        match timeout(self.io_timeout, self.medium.remove(blob)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Leaving orphan blob {}: {}", blob, e),
            Err(_) => debug!("Leaving orphan blob {}: remove timed out", blob),
        }
    }
}
