//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Sweeper: drops stale cache entries, enforces the size bound and
//!   rescans compiled scripts

mod sweeper;

pub use sweeper::{spawn_sweeper_task, sweep_once};
