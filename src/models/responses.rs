//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing admin response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::scripts::{ExecutionStats, ScanReport};

/// Response body for the stats endpoint (GET {prefix}/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Entries dropped because their origin changed
    pub stale: u64,
    /// Number of evictions
    pub evictions: u64,
    /// Cache writes skipped because the medium failed
    pub degraded_writes: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Current payload bytes in cache
    pub total_bytes: u64,
    /// Cache size bound in bytes
    pub max_bytes: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Loaded script artifacts
    pub artifacts: usize,
    /// Active trigger rules
    pub rules: usize,
    /// Script execution counters
    pub executions: ExecutionStats,
}

impl StatsResponse {
    /// Creates a new StatsResponse from the component statistics
    pub fn new(
        cache: CacheStats,
        max_bytes: u64,
        artifacts: usize,
        rules: usize,
        executions: ExecutionStats,
    ) -> Self {
        Self {
            hit_rate: cache.hit_rate(),
            hits: cache.hits,
            misses: cache.misses,
            stale: cache.stale,
            evictions: cache.evictions,
            degraded_writes: cache.degraded_writes,
            total_entries: cache.total_entries,
            total_bytes: cache.total_bytes,
            max_bytes,
            artifacts,
            rules,
            executions,
        }
    }
}

/// Response body for the health endpoint (GET {prefix}/health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Server name and version
    pub server: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            server: crate::dispatch::SERVER_HEADER.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for the reload endpoint (POST {prefix}/reload)
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    /// Success message
    pub message: String,
    /// Artifacts loaded
    pub artifacts: usize,
    /// Trigger rules now active
    pub rules: usize,
    /// Artifacts that failed to load
    pub rejected: Vec<String>,
    /// Whether the trigger table changed, which drops every cached response
    pub routes_changed: bool,
}

impl ReloadResponse {
    /// Creates a new ReloadResponse from a scan report
    pub fn new(report: ScanReport) -> Self {
        Self {
            message: format!(
                "Loaded {} artifacts with {} rules",
                report.artifacts, report.rules
            ),
            artifacts: report.artifacts,
            rules: report.rules,
            rejected: report.rejected,
            routes_changed: report.routes_changed,
        }
    }
}

/// Response body for the invalidate endpoint (POST {prefix}/invalidate)
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// Entries removed
    pub removed: usize,
}

impl InvalidateResponse {
    /// Creates a new InvalidateResponse for a single key
    pub fn key(key: impl Into<String>, existed: bool) -> Self {
        let key = key.into();
        Self {
            message: if existed {
                format!("Entry '{}' invalidated", key)
            } else {
                format!("No entry for '{}'", key)
            },
            removed: usize::from(existed),
        }
    }

    /// Creates a new InvalidateResponse for a full purge
    pub fn purged(removed: usize) -> Self {
        Self {
            message: format!("Purged {} entries", removed),
            removed,
        }
    }
}

/// Error response body for all admin error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
