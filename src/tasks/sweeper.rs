//! Background Sweeper Task
//!
//! Periodically drops cache entries whose origin changed, trims the cache
//! back under its size bound, and rescans the scripts directory so new or
//! removed artifacts show up without a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

/// Spawns the sweeper.
///
/// # Arguments
/// * `dispatcher` - shared dispatcher, owning the cache and script loader
/// * `interval_secs` - seconds between passes
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_sweeper_task(state.dispatcher.clone(), 30);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_sweeper_task(dispatcher: Arc<Dispatcher>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting sweeper task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;
            sweep_once(&dispatcher).await;
        }
    })
}

/// One sweeper pass.
pub async fn sweep_once(dispatcher: &Dispatcher) {
    let cache = dispatcher.cache();
    let stale = cache.sweep_stale().await;
    let evicted = cache.evict_if_needed().await;
    if stale > 0 || evicted > 0 {
        info!("Sweep: removed {} stale, evicted {}", stale, evicted);
    } else {
        debug!("Sweep: cache clean");
    }

    match dispatcher.reload_scripts().await {
        Ok(report) if !report.rejected.is_empty() => {
            warn!("Sweep: rejected artifacts {:?}", report.rejected)
        }
        Ok(report) => debug!(
            "Sweep: {} artifacts, {} rules",
            report.artifacts, report.rules
        ),
        Err(e) => warn!("Sweep: rescan failed: {}", e),
    }
}
