//! Configuration Module
//!
//! Handles loading and managing server configuration from environment
//! variables, optionally layered over a TOML file named by `TIGER_CONFIG`.

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TigerError};
use crate::routing::TriggerSpec;
use crate::scripts::ResourceLimits;

/// Order in which the dispatcher classifies a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifyOrder {
    /// A matching trigger rule wins; static files are the fallback.
    #[default]
    ScriptFirst,
    /// An existing static file wins over trigger rules.
    StaticFirst,
}

impl FromStr for ClassifyOrder {
    type Err = TigerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "script-first" | "script" => Ok(ClassifyOrder::ScriptFirst),
            "static-first" | "static" => Ok(ClassifyOrder::StaticFirst),
            other => Err(TigerError::Config(format!(
                "unknown classification order '{}'",
                other
            ))),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tiger root holding `public`, `scripts`, `bin` and `cache`
    pub root: PathBuf,
    /// Address to bind
    pub bind_addr: IpAddr,
    /// HTTP server port
    pub server_port: u16,
    /// Upper bound on the aggregate size of cached payloads, in bytes
    pub cache_max_size: u64,
    /// Wall-clock budget for one script execution
    pub exec_timeout: Duration,
    /// Instruction budget for one script execution
    pub max_steps: u64,
    /// Largest body a script may produce, in bytes
    pub max_output: usize,
    /// Scripts allowed to run at the same time
    pub max_concurrent_scripts: usize,
    /// Bound on reading one artifact from disk
    pub load_timeout: Duration,
    /// Bound on one cache medium read or write
    pub cache_io_timeout: Duration,
    /// Background sweeper interval in seconds
    pub sweep_interval: u64,
    /// Ordered trigger rules; earlier rules win ties
    pub trigger_rules: Vec<TriggerSpec>,
    /// Static-vs-script precedence
    pub classify_order: ClassifyOrder,
    /// Files tried, in order, for directory requests
    pub index_files: Vec<String>,
    /// Extension remapping applied when classifying file types
    pub type_aliases: HashMap<String, String>,
    /// Serve through the cache store
    pub cache_enabled: bool,
    /// Rewrite directory requests to an index file
    pub index_redirect: bool,
    /// Use `public/<status>.html` for error responses when present
    pub custom_error_pages: bool,
    /// Include diagnostics in error bodies
    pub debug: bool,
    /// Path prefix of the admin endpoints
    pub admin_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server_port: 8080,
            cache_max_size: 64 * 1024 * 1024,
            exec_timeout: Duration::from_millis(5000),
            max_steps: 1_000_000,
            max_output: 8 * 1024 * 1024,
            max_concurrent_scripts: 64,
            load_timeout: Duration::from_millis(2000),
            cache_io_timeout: Duration::from_millis(1000),
            sweep_interval: 30,
            trigger_rules: Vec::new(),
            classify_order: ClassifyOrder::ScriptFirst,
            index_files: vec!["index.html".to_string()],
            type_aliases: HashMap::from([("htm".to_string(), "html".to_string())]),
            cache_enabled: true,
            index_redirect: true,
            custom_error_pages: true,
            debug: false,
            admin_prefix: "/_tiger".to_string(),
        }
    }
}

/// Optional TOML layer. Every field is optional; absent fields keep defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    root: Option<PathBuf>,
    bind: Option<IpAddr>,
    port: Option<u16>,
    cache_max_size: Option<u64>,
    exec_timeout_ms: Option<u64>,
    max_steps: Option<u64>,
    max_output: Option<usize>,
    max_concurrent_scripts: Option<usize>,
    load_timeout_ms: Option<u64>,
    cache_io_timeout_ms: Option<u64>,
    sweep_interval: Option<u64>,
    trigger_rules: Option<Vec<TriggerSpec>>,
    classify: Option<ClassifyOrder>,
    index_files: Option<Vec<String>>,
    type_aliases: Option<HashMap<String, String>>,
    disable_cache: Option<bool>,
    disable_redirect: Option<bool>,
    disable_error_pages: Option<bool>,
    debug: Option<bool>,
    admin_prefix: Option<String>,
}

impl Config {
    /// Loads the full configuration: TOML file (if `TIGER_CONFIG` is set),
    /// then environment variables, then validation.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = env::var("TIGER_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_vars(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a new Config from environment variables only.
    ///
    /// # Environment Variables
    /// - `TIGER_PATH` - Tiger root (default: `.`)
    /// - `TIGER_BIND` / `TIGER_PORT` - listen address (default: `0.0.0.0:8080`)
    /// - `TIGER_CACHE_MAX_SIZE` - cache bound in bytes (default: 64 MiB)
    /// - `TIGER_EXEC_TIMEOUT_MS` - script wall budget (default: 5000)
    /// - `TIGER_TRIGGERS` - rules as `[pattern][:type]=artifact`, comma separated
    /// - `TIGER_CLASSIFY` - `script-first` or `static-first`
    /// - `TIGER_DISABLE_CACHE`, `TIGER_DISABLE_REDIRECT`,
    ///   `TIGER_DISABLE_ERROR_PAGES`, `TIGER_DEBUG` - flags
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_vars(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Overlays values from a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TigerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.apply_toml(&text)
    }

    /// Overlays values from TOML text.
    pub fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| TigerError::Config(e.to_string()))?;

        if let Some(v) = file.root {
            self.root = v;
        }
        if let Some(v) = file.bind {
            self.bind_addr = v;
        }
        if let Some(v) = file.port {
            self.server_port = v;
        }
        if let Some(v) = file.cache_max_size {
            self.cache_max_size = v;
        }
        if let Some(v) = file.exec_timeout_ms {
            self.exec_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = file.max_output {
            self.max_output = v;
        }
        if let Some(v) = file.max_concurrent_scripts {
            self.max_concurrent_scripts = v;
        }
        if let Some(v) = file.load_timeout_ms {
            self.load_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.cache_io_timeout_ms {
            self.cache_io_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.sweep_interval {
            self.sweep_interval = v;
        }
        if let Some(v) = file.trigger_rules {
            self.trigger_rules = v;
        }
        if let Some(v) = file.classify {
            self.classify_order = v;
        }
        if let Some(v) = file.index_files {
            self.index_files = v;
        }
        if let Some(v) = file.type_aliases {
            self.type_aliases = v;
        }
        if let Some(v) = file.disable_cache {
            self.cache_enabled = !v;
        }
        if let Some(v) = file.disable_redirect {
            self.index_redirect = !v;
        }
        if let Some(v) = file.disable_error_pages {
            self.custom_error_pages = !v;
        }
        if let Some(v) = file.debug {
            self.debug = v;
        }
        if let Some(v) = file.admin_prefix {
            self.admin_prefix = v;
        }
        Ok(())
    }

    /// Overlays values from a variable lookup. Unparseable numbers keep the
    /// current value; malformed trigger rules are an error.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |name: &str| lookup(name).map(|v| is_truthy(&v));

        if let Some(v) = lookup("TIGER_PATH") {
            self.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("TIGER_BIND").and_then(|v| v.trim().parse().ok()) {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("TIGER_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server_port = v;
        }
        if let Some(v) = parsed("TIGER_CACHE_MAX_SIZE") {
            self.cache_max_size = v;
        }
        if let Some(v) = parsed("TIGER_EXEC_TIMEOUT_MS") {
            self.exec_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parsed("TIGER_MAX_STEPS") {
            self.max_steps = v;
        }
        if let Some(v) = parsed("TIGER_MAX_OUTPUT") {
            self.max_output = v as usize;
        }
        if let Some(v) = parsed("TIGER_MAX_CONCURRENT_SCRIPTS") {
            self.max_concurrent_scripts = v as usize;
        }
        if let Some(v) = parsed("TIGER_LOAD_TIMEOUT_MS") {
            self.load_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parsed("TIGER_CACHE_IO_TIMEOUT_MS") {
            self.cache_io_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parsed("TIGER_SWEEP_INTERVAL") {
            self.sweep_interval = v;
        }
        if let Some(v) = lookup("TIGER_TRIGGERS") {
            self.trigger_rules = split_list(&v)
                .map(|item| item.parse::<TriggerSpec>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = lookup("TIGER_CLASSIFY") {
            self.classify_order = v.parse()?;
        }
        if let Some(v) = lookup("TIGER_INDEX_FILES") {
            self.index_files = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = lookup("TIGER_TYPE_ALIASES") {
            self.type_aliases = split_list(&v)
                .filter_map(|pair| pair.split_once('='))
                .map(|(from, to)| {
                    (
                        from.trim().to_ascii_lowercase(),
                        to.trim().to_ascii_lowercase(),
                    )
                })
                .collect();
        }
        if let Some(v) = flag("TIGER_DISABLE_CACHE") {
            self.cache_enabled = !v;
        }
        if let Some(v) = flag("TIGER_DISABLE_REDIRECT") {
            self.index_redirect = !v;
        }
        if let Some(v) = flag("TIGER_DISABLE_ERROR_PAGES") {
            self.custom_error_pages = !v;
        }
        if let Some(v) = flag("TIGER_DEBUG") {
            self.debug = v;
        }
        if let Some(v) = lookup("TIGER_ADMIN_PREFIX") {
            self.admin_prefix = v;
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_max_size == 0 {
            return Err(TigerError::Config(
                "cache_max_size must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("exec_timeout", self.exec_timeout),
            ("load_timeout", self.load_timeout),
            ("cache_io_timeout", self.cache_io_timeout),
        ] {
            if value.is_zero() {
                return Err(TigerError::Config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        ResourceLimits::from_config(self)
            .validate()
            .map_err(TigerError::Config)?;
        if self.max_concurrent_scripts == 0 {
            return Err(TigerError::Config(
                "max_concurrent_scripts must be greater than zero".to_string(),
            ));
        }
        if !self.admin_prefix.starts_with('/') || self.admin_prefix.len() < 2 {
            return Err(TigerError::Config(format!(
                "admin prefix '{}' must start with '/' and name a segment",
                self.admin_prefix
            )));
        }
        for rule in &self.trigger_rules {
            rule.validate()?;
        }
        Ok(())
    }

    // == Directory Layout ==
    pub fn public_dir(&self) -> PathBuf {
        self.root.join("public")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
