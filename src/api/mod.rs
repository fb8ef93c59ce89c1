//! API Module
//!
//! HTTP edge of the server: axum handlers and routing.
//!
//! # Endpoints
//! - `GET {prefix}/health` - Health check endpoint
//! - `GET {prefix}/stats` - Server statistics
//! - `POST {prefix}/reload` - Rescan compiled scripts
//! - `POST {prefix}/invalidate` - Invalidate cached paths
//! - everything else - the site, through the dispatcher

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
