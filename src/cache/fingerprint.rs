//! Source Fingerprints
//!
//! A cached payload is fresh only while the file it came from still has the
//! fingerprint recorded at insertion time.

use std::fs::Metadata;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Length and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// File size in bytes
    pub len: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub modified_ns: u128,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            len: metadata.len(),
            modified_ns,
        }
    }

    /// Current fingerprint of a regular file, `None` if it is missing or not a file.
    pub async fn probe(path: &Path) -> Option<Self> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        metadata.is_file().then(|| Self::from_metadata(&metadata))
    }

    /// Weak validator for conditional requests.
    pub fn etag(&self) -> String {
        format!("\"{:x}-{:x}\"", self.len, self.modified_ns / 1_000_000)
    }

    /// Modification time formatted for the `Last-Modified` header.
    pub fn last_modified(&self) -> Option<String> {
        let secs = u64::try_from(self.modified_ns / 1_000_000_000).ok()?;
        let time = UNIX_EPOCH.checked_add(std::time::Duration::from_secs(secs))?;
        Some(http_date(time))
    }
}

/// Formats a time as an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
