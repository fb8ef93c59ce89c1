//! Script Loader
//!
//! Finds compiled artifacts in the scripts directory, keeps loaded handles
//! in memory and owns the trigger table that maps routes to artifacts.
//!
//! The table holds the configured rules first (in configuration order),
//! then the rules each artifact declares, artifacts taken in file name
//! order. A rescan builds a fresh table and swaps it in whole, so a request
//! always resolves against one consistent table.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::Fingerprint;
use crate::config::Config;
use crate::error::{Result, TigerError};
use crate::routing::{
    is_valid_artifact_id, RouteKey, RuleOrigin, TriggerRule, TriggerSpec, TriggerTable,
};
use crate::scripts::artifact::{decode, CompiledScript, ARTIFACT_EXTENSION};

/// Outcome of a scan of the scripts directory.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScanReport {
    /// Artifacts loaded successfully
    pub artifacts: usize,
    /// Rules in the new trigger table
    pub rules: usize,
    /// Artifact ids that failed to load
    pub rejected: Vec<String>,
    /// The new table routes differently from the one it replaced
    pub routes_changed: bool,
}

// == Script Loader ==
#[derive(Debug)]
pub struct ScriptLoader {
    dir: PathBuf,
    config_rules: Vec<TriggerSpec>,
    table: RwLock<Arc<TriggerTable>>,
    handles: DashMap<String, Arc<CompiledScript>>,
    load_locks: DashMap<String, Arc<Mutex<()>>>,
    load_timeout: Duration,
}

impl ScriptLoader {
    /// Creates a loader over `dir`. Until the first [`rescan`](Self::rescan)
    /// only the configured rules are active.
    pub fn new(dir: impl Into<PathBuf>, config_rules: Vec<TriggerSpec>, load_timeout: Duration) -> Self {
        let table = build_table(&config_rules, Vec::new());
        Self {
            dir: dir.into(),
            config_rules,
            table: RwLock::new(Arc::new(table)),
            handles: DashMap::new(),
            load_locks: DashMap::new(),
            load_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.scripts_dir(),
            config.trigger_rules.clone(),
            config.load_timeout,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an artifact id is loaded from.
    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, ARTIFACT_EXTENSION))
    }

    // == Resolve ==
    /// Artifact id of the most specific rule matching `key`.
    pub fn resolve(&self, key: &RouteKey) -> Result<String> {
        self.table()
            .resolve(key)
            .map(|rule| rule.artifact.clone())
            .ok_or_else(|| TigerError::NotFound(format!("no trigger for {}", key)))
    }

    /// Current trigger table.
    pub fn table(&self) -> Arc<TriggerTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    // == Load ==
    /// Returns the handle for `id`, reading the artifact again if its file
    /// changed since the cached handle was built.
    ///
    /// # Errors
    /// - `ArtifactLoad` when the file is missing, unreadable or too slow to read
    /// - `InvalidArtifact` when the file is not a compiled artifact
    pub async fn load(&self, id: &str) -> Result<Arc<CompiledScript>> {
        if !is_valid_artifact_id(id) {
            return Err(TigerError::ArtifactLoad(format!("bad artifact id '{}'", id)));
        }
        let path = self.artifact_path(id);

        let current = self.probe(&path).await?;
        if let Some(handle) = self.cached(id, current) {
            return Ok(handle);
        }

        let lock = Arc::clone(self.load_locks.entry(id.to_string()).or_default().value());
        let _guard = timeout(self.load_timeout, lock.lock())
            .await
            .map_err(|_| TigerError::ArtifactLoad(format!("timed out waiting to load '{}'", id)))?;

        // Another request may have finished the reload while we waited.
        let current = self.probe(&path).await?;
        if let Some(handle) = self.cached(id, current) {
            return Ok(handle);
        }

        let bytes = match timeout(self.load_timeout, tokio::fs::read(&path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                return Err(TigerError::ArtifactLoad(format!("reading {}: {}", path.display(), e)))
            }
            Err(_) => {
                return Err(TigerError::ArtifactLoad(format!(
                    "reading {} timed out",
                    path.display()
                )))
            }
        };

        let manifest = match decode(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                // Fail closed: a replaced artifact must not keep serving the old program.
                self.handles.remove(id);
                warn!("Rejected artifact {}: {}", path.display(), e);
                return Err(e);
            }
        };

        let replaced = self.handles.contains_key(id);
        let handle = Arc::new(CompiledScript::new(id, path, current, manifest));
        self.handles.insert(id.to_string(), Arc::clone(&handle));
        if replaced {
            info!("Reloaded artifact {}", id);
        } else {
            debug!("Loaded artifact {}", id);
        }
        Ok(handle)
    }

    fn cached(&self, id: &str, current: Fingerprint) -> Option<Arc<CompiledScript>> {
        self.handles
            .get(id)
            .filter(|handle| handle.fingerprint == current)
            .map(|handle| Arc::clone(handle.value()))
    }

    async fn probe(&self, path: &Path) -> Result<Fingerprint> {
        match timeout(self.load_timeout, Fingerprint::probe(path)).await {
            Ok(Some(fingerprint)) => Ok(fingerprint),
            Ok(None) => Err(TigerError::ArtifactLoad(format!(
                "{} does not exist",
                path.display()
            ))),
            Err(_) => Err(TigerError::ArtifactLoad(format!(
                "probing {} timed out",
                path.display()
            ))),
        }
    }

    // == Rescan ==
    /// Loads every artifact in the scripts directory and swaps in a trigger
    /// table built from configuration plus their declared rules. Handles for
    /// artifacts that disappeared are dropped. A missing directory is
    /// treated as empty.
    pub async fn rescan(&self) -> Result<ScanReport> {
        let ids = self.list_artifacts().await?;

        let mut report = ScanReport::default();
        let mut declared = Vec::new();
        for id in &ids {
            match self.load(id).await {
                Ok(handle) => {
                    report.artifacts += 1;
                    declared.extend(handle.manifest.trigger_specs(id));
                }
                Err(e) => {
                    warn!("Skipping artifact {}: {}", id, e);
                    report.rejected.push(id.clone());
                }
            }
        }

        self.handles.retain(|id, _| ids.contains(id));
        self.load_locks.retain(|id, _| ids.contains(id));

        let table = build_table(&self.config_rules, declared);
        report.rules = table.len();
        {
            let mut current = self.table.write().unwrap_or_else(|e| e.into_inner());
            report.routes_changed = **current != table;
            *current = Arc::new(table);
        }

        info!(
            "Scanned {}: {} artifacts, {} rules, {} rejected",
            self.dir.display(),
            report.artifacts,
            report.rules,
            report.rejected.len()
        );
        Ok(report)
    }

    async fn list_artifacts(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Scripts directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(TigerError::ArtifactLoad(format!(
                    "listing {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut ids = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(TigerError::ArtifactLoad(e.to_string())),
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(id) if is_valid_artifact_id(id) => ids.push(id.to_string()),
                _ => debug!("Ignoring {}", path.display()),
            }
        }
        ids.sort();
        Ok(ids)
    }

    // == Introspection ==
    pub fn loaded_count(&self) -> usize {
        self.handles.len()
    }

    pub fn rule_count(&self) -> usize {
        self.table().len()
    }
}

fn build_table(config_rules: &[TriggerSpec], declared: Vec<TriggerSpec>) -> TriggerTable {
    let mut table = TriggerTable::new();
    let ordered = config_rules
        .iter()
        .map(|spec| (spec, RuleOrigin::Config))
        .chain(declared.iter().map(|spec| (spec, RuleOrigin::Artifact)));
    for (spec, origin) in ordered {
        match TriggerRule::compile(spec, origin) {
            Ok(rule) => table.register(rule),
            Err(e) => warn!("Ignoring trigger rule for {}: {}", spec.artifact, e),
        }
    }
    table
}
