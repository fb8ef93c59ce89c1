//! Routing Module
//!
//! Route key normalization and trigger rule matching.

mod key;
mod trigger;


pub use key::{classify, normalize, RouteKey};
pub use trigger::{
    is_valid_artifact_id, RuleOrigin, TriggerPattern, TriggerRule, TriggerSpec, TriggerTable,
};
