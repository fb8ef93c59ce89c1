//! API Routes
//!
//! Configures the Axum router: admin endpoints under a prefix, everything
//! else through the dispatcher.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    dispatch_handler, health_handler, invalidate_handler, reload_handler, stats_handler, AppState,
};

/// Creates the main router.
///
/// # Endpoints
/// - `GET {prefix}/health` - Health check endpoint
/// - `GET {prefix}/stats` - Cache, loader and executor statistics
/// - `POST {prefix}/reload` - Rescan the scripts directory
/// - `POST {prefix}/invalidate` - Drop one cached path or purge the cache
/// - anything else - served by the dispatcher
///
/// # Middleware
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState, admin_prefix: &str) -> Router {
    let admin = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/reload", post(reload_handler))
        .route("/invalidate", post(invalidate_handler));

    Router::new()
        .nest(admin_prefix.trim_end_matches('/'), admin)
        .fallback(dispatch_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
