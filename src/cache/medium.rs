//! Cache Medium
//!
//! Backing storage for cached payloads. The store keeps metadata in memory
//! and puts payload bytes in a medium: a directory (ideally a ramfs mount)
//! or plain process memory.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::routing::RouteKey;

/// Storage for payload blobs addressed by name.
#[async_trait]
pub trait CacheMedium: Send + Sync + fmt::Debug {
    async fn read(&self, blob: &str) -> io::Result<Bytes>;

    async fn write(&self, blob: &str, payload: &Bytes) -> io::Result<()>;

    async fn remove(&self, blob: &str) -> io::Result<()>;

    /// Removes every blob this medium owns. Returns how many were removed.
    async fn clear(&self) -> io::Result<usize>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Blob name for one generation of a key: SHA-256 of the path, then the generation.
pub fn blob_name(key: &RouteKey, generation: u64) -> String {
    let digest = Sha256::digest(key.path().as_bytes());
    format!("{:x}-{}", digest, generation)
}

fn is_blob_name(name: &str) -> bool {
    match name.split_once('-') {
        Some((hash, generation)) => {
            hash.len() == 64
                && hash.chars().all(|c| c.is_ascii_hexdigit())
                && !generation.is_empty()
                && generation.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

// == Disk Medium ==
/// One file per blob inside the `cache` directory.
#[derive(Debug, Clone)]
pub struct DiskMedium {
    dir: PathBuf,
}

impl DiskMedium {
    /// Opens an existing directory. The directory is not created: a missing
    /// `cache` directory is a deployment decision, not something to paper over.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cache directory {} does not exist", dir.display()),
            ));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, blob: &str) -> PathBuf {
        self.dir.join(blob)
    }

    fn staging_path(&self, blob: &str) -> PathBuf {
        self.dir.join(format!("{}.partial", blob))
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl CacheMedium for DiskMedium {
    async fn read(&self, blob: &str) -> io::Result<Bytes> {
        tokio::fs::read(self.path(blob)).await.map(Bytes::from)
    }

    async fn write(&self, blob: &str, payload: &Bytes) -> io::Result<()> {
        let target = self.path(blob);
        let staging = self.staging_path(blob);
        let result = match tokio::fs::write(&staging, payload).await {
            Ok(()) => tokio::fs::rename(&staging, &target).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = remove_if_present(&staging).await;
        }
        result
    }

    /// Removes the blob and any staging file left by an interrupted write.
    async fn remove(&self, blob: &str) -> io::Result<()> {
        remove_if_present(&self.staging_path(blob)).await?;
        remove_if_present(&self.path(blob)).await
    }

    async fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let owned = is_blob_name(name)
                || name.strip_suffix(".partial").is_some_and(is_blob_name);
            if owned && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn describe(&self) -> String {
        format!("disk:{}", self.dir.display())
    }
}

// == Memory Medium ==
/// Blobs held in process memory.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    blobs: DashMap<String, Bytes>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }
}

#[async_trait]
impl CacheMedium for MemoryMedium {
    async fn read(&self, blob: &str) -> io::Result<Bytes> {
        self.blobs
            .get(blob)
            .map(|b| b.value().clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, blob.to_string()))
    }

    async fn write(&self, blob: &str, payload: &Bytes) -> io::Result<()> {
        self.blobs.insert(blob.to_string(), payload.clone());
        Ok(())
    }

    async fn remove(&self, blob: &str) -> io::Result<()> {
        self.blobs.remove(blob);
        Ok(())
    }

    async fn clear(&self) -> io::Result<usize> {
        let count = self.blobs.len();
        self.blobs.clear();
        Ok(count)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn key(path: &str) -> RouteKey {
        RouteKey::new(path, &HashMap::new())
    }

    #[test]
    fn test_blob_name_shape() {
        let name = blob_name(&key("/index.html"), 7);
        assert!(is_blob_name(&name), "{name}");
        assert!(name.ends_with("-7"));
        assert_ne!(name, blob_name(&key("/index.html"), 8));
        assert_ne!(name, blob_name(&key("/other.html"), 7));
        assert!(!is_blob_name("notes.txt"));
    }

    #[tokio::test]
    async fn test_disk_medium_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let medium = DiskMedium::open(dir.path()).unwrap();
        let blob = blob_name(&key("/a.html"), 1);

        medium.write(&blob, &Bytes::from("payload")).await.unwrap();
        assert_eq!(medium.read(&blob).await.unwrap(), Bytes::from("payload"));

        medium.remove(&blob).await.unwrap();
        assert!(medium.read(&blob).await.is_err());
        // Removing twice is fine
        medium.remove(&blob).await.unwrap();
    }

    #[tokio::test]
    async fn test_disk_medium_remove_drops_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let medium = DiskMedium::open(dir.path()).unwrap();
        let blob = blob_name(&key("/a.html"), 3);
        let staging = dir.path().join(format!("{}.partial", blob));
        std::fs::write(&staging, b"half").unwrap();

        medium.remove(&blob).await.unwrap();

        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_disk_medium_clear_only_touches_blobs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"mine").unwrap();
        let medium = DiskMedium::open(dir.path()).unwrap();
        medium
            .write(&blob_name(&key("/a"), 1), &Bytes::from("x"))
            .await
            .unwrap();
        medium
            .write(&blob_name(&key("/b"), 2), &Bytes::from("y"))
            .await
            .unwrap();

        assert_eq!(medium.clear().await.unwrap(), 2);
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn test_disk_medium_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DiskMedium::open(dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_memory_medium() {
        let medium = MemoryMedium::new();
        medium.write("a", &Bytes::from("1")).await.unwrap();
        assert_eq!(medium.read("a").await.unwrap(), Bytes::from("1"));
        assert_eq!(medium.len(), 1);
        assert_eq!(medium.clear().await.unwrap(), 1);
        assert!(medium.read("a").await.is_err());
    }
}
