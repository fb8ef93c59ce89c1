//! Cache Entry Module
//!
//! Defines a cached response: payload plus the metadata needed to replay it
//! and to decide whether it is still fresh.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::cache::Fingerprint;

// == Cache Entry ==
/// A single cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Response body
    pub payload: Bytes,
    /// Replay metadata
    pub meta: EntryMeta,
}

/// Everything about a cached response except its body.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
    /// `Content-Type` to replay
    pub content_type: String,
    /// Status code to replay
    pub status: u16,
    /// Extra headers to replay
    pub headers: Vec<(String, String)>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// File whose fingerprint decides freshness
    pub origin: PathBuf,
    /// Fingerprint of `origin` when the payload was produced
    pub fingerprint: Fingerprint,
    /// Whether the producer allowed caching at all
    pub cacheable: bool,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a cacheable 200 entry.
    ///
    /// # Arguments
    /// * `payload` - Response body
    /// * `content_type` - MIME type of the body
    /// * `origin` - File the body was produced from
    /// * `fingerprint` - Fingerprint of `origin` taken before producing the body
    pub fn new(
        payload: impl Into<Bytes>,
        content_type: impl Into<String>,
        origin: impl Into<PathBuf>,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            payload: payload.into(),
            meta: EntryMeta {
                content_type: content_type.into(),
                status: 200,
                headers: Vec::new(),
                created_at: current_timestamp_ms(),
                origin: origin.into(),
                fingerprint,
                cacheable: true,
            },
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.meta.status = status;
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.meta.headers = headers;
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.meta.cacheable = cacheable;
        self
    }

    /// Payload size in bytes; this is what counts against the cache bound.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    // == Freshness ==
    /// True when `current` no longer matches the recorded fingerprint.
    /// A missing origin is always stale.
    pub fn is_stale(&self, current: Option<Fingerprint>) -> bool {
        self.meta.is_stale(current)
    }

    /// Milliseconds since the entry was created.
    pub fn age_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.meta.created_at)
    }
}

impl EntryMeta {
    pub fn is_stale(&self, current: Option<Fingerprint>) -> bool {
        current != Some(self.fingerprint)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
