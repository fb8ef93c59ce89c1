//! API Handlers
//!
//! The site handler that feeds every request into the dispatcher, plus the
//! admin endpoints.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::dispatch::{Dispatcher, IncomingRequest};
use crate::error::{Result, TigerError};
use crate::models::{
    HealthResponse, InvalidateRequest, InvalidateResponse, ReloadResponse, StatsResponse,
};
use crate::scripts::{ScriptExecutor, ScriptLoader};

/// Application state shared across all handlers.
///
/// Every component is shared behind an `Arc` and synchronizes internally,
/// so handlers never take a lock around a whole component.
#[derive(Clone)]
pub struct AppState {
    /// Request state machine
    pub dispatcher: Arc<Dispatcher>,
    /// Response cache
    pub cache: Arc<CacheStore>,
    /// Artifact handles and trigger table
    pub loader: Arc<ScriptLoader>,
    /// Script runner
    pub executor: Arc<ScriptExecutor>,
}

impl AppState {
    /// Creates a new AppState from existing components.
    pub fn new(
        config: &Config,
        cache: Arc<CacheStore>,
        loader: Arc<ScriptLoader>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            Arc::clone(&cache),
            Arc::clone(&loader),
            Arc::clone(&executor),
        ));
        Self {
            dispatcher,
            cache,
            loader,
            executor,
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The trigger table only holds configured rules until
    /// [`ScriptLoader::rescan`] runs.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config,
            Arc::new(CacheStore::from_config(config)),
            Arc::new(ScriptLoader::from_config(config)),
            Arc::new(ScriptExecutor::from_config(config)),
        )
    }
}

/// Fallback handler: every site request.
pub async fn dispatch_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let reply = match IncomingRequest::from_parts(method, &uri, &headers, body) {
        Ok(request) => state.dispatcher.dispatch(request).await,
        Err(e) => state.dispatcher.reject(e).await,
    };
    reply.into_response()
}

/// Handler for GET {prefix}/health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET {prefix}/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(
        state.cache.stats(),
        state.cache.max_size(),
        state.loader.loaded_count(),
        state.loader.rule_count(),
        state.executor.stats(),
    ))
}

/// Handler for POST {prefix}/reload
///
/// Rescans the scripts directory and swaps in the new trigger table,
/// dropping cached responses when routing changed.
pub async fn reload_handler(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    let report = state.dispatcher.reload_scripts().await?;
    info!(
        "Reload requested: {} artifacts, {} rules",
        report.artifacts, report.rules
    );
    Ok(Json(ReloadResponse::new(report)))
}

/// Handler for POST {prefix}/invalidate
///
/// Drops one cached path, or everything with `{"all": true}`.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(TigerError::BadRequest(error_msg));
    }

    if req.all {
        let removed = state.cache.purge().await;
        info!("Cache purged: {} entries", removed);
        return Ok(Json(InvalidateResponse::purged(removed)));
    }

    let path = req.path.unwrap_or_default();
    let key = state.dispatcher.route_key(&path);
    let existed = state.cache.invalidate(&key).await;
    Ok(Json(InvalidateResponse::key(key.path(), existed)))
}
