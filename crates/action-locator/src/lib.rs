//! Self-healing element resolution
//!
//! Resolves a recorded step's target on the current page through a chain of
//! independent strategies:
//! - Identity matching on accessibility and stable attributes
//! - The recorded primary candidate selector
//! - Ranked fallback candidates, with a healing record on use
//! - Enhanced fallback bundles, text patterns and structural position
//! - The element rendered at the recorded coordinates
//!
//! The [`SelfHealingEngine`] runs them in priority order and keeps usage
//! statistics.

pub mod engine;
pub mod errors;
pub mod strategies;
pub mod types;

pub use engine::*;
pub use errors::*;
pub use strategies::*;
pub use types::*;
