//! Static files under `public`.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::cache::{CacheEntry, Fingerprint};
use crate::config::Config;
use crate::error::{Result, TigerError};
use crate::routing::RouteKey;

/// A located file, with the metadata taken when it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticFile {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub content_type: String,
}

impl StaticFile {
    /// Cache entry for the file contents, with validator headers.
    pub fn entry(&self, payload: Bytes) -> CacheEntry {
        let mut headers = vec![("etag".to_string(), self.fingerprint.etag())];
        if let Some(modified) = self.fingerprint.last_modified() {
            headers.push(("last-modified".to_string(), modified));
        }
        CacheEntry::new(payload, self.content_type.clone(), self.path.clone(), self.fingerprint)
            .with_headers(headers)
    }
}

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.public_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key. Normalized keys never contain `..`, so
    /// the result stays under the root.
    pub fn file_path(&self, key: &RouteKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Finds the regular file a key names. Directory keys never match.
    pub async fn locate(&self, key: &RouteKey) -> Option<StaticFile> {
        if key.is_directory() {
            return None;
        }
        let path = self.file_path(key);
        let fingerprint = Fingerprint::probe(&path).await?;
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Some(StaticFile {
            path,
            fingerprint,
            content_type,
        })
    }

    pub async fn exists(&self, key: &RouteKey) -> bool {
        self.locate(key).await.is_some()
    }

    pub async fn read(&self, file: &StaticFile) -> Result<Bytes> {
        match tokio::fs::read(&file.path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TigerError::NotFound(
                format!("{} vanished", file.path.display()),
            )),
            Err(e) => Err(TigerError::Internal(format!(
                "reading {}: {}",
                file.path.display(),
                e
            ))),
        }
    }
}
