//! Tiger - a self-contained web server
//!
//! Serves static files from `public/`, runs compiled scripts from
//! `scripts/` when a trigger rule matches, and keeps responses in a
//! size-bounded file cache that notices when their origin changes.

pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod routing;
pub mod scripts;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use tasks::spawn_sweeper_task;
