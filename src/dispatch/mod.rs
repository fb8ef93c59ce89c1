//! Dispatch Module
//!
//! Framework-independent request handling: the dispatcher state machine,
//! static file lookup, error pages and the request/reply types it works on.

mod dispatcher;
mod error_pages;
mod request;
mod static_files;

pub use dispatcher::{Dispatcher, Target, STATIC_ALLOW};
pub use error_pages::ErrorPages;
pub use request::{
    CacheStatus, IncomingRequest, Reply, CACHE_STATUS_HEADER, SERVER_HEADER, SUPPORTED_METHODS,
};
pub use static_files::{StaticFile, StaticFiles};
