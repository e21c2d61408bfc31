//! Step verification gate
//!
//! Checks that a step's effect actually happened:
//! - Structural checks (selector, URL substring, visible text) first
//! - Perceptual judgment on a screenshot as a budgeted fallback
//! - Manual confirmation once the perceptual budget is spent

pub mod errors;
pub mod judge;
pub mod types;
pub mod verifier;

pub use errors::*;
pub use judge::*;
pub use types::*;
pub use verifier::*;
