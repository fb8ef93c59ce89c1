//! Scripts Module
//!
//! Compiled script artifacts: the on-disk format, the loader that resolves
//! routes to artifacts and keeps handles warm, and the executor that runs
//! them under a resource budget.

pub mod artifact;
mod context;
mod executor;
mod limits;
mod loader;

pub use artifact::{decode, encode, has_marker, CompiledScript, DeclaredTrigger, Manifest, Op};
pub use context::{parse_query, ExecutionContext};
pub use executor::{ExecutionStats, ScriptExecutor, ScriptOutput};
pub use limits::ResourceLimits;
pub use loader::{ScanReport, ScriptLoader};
