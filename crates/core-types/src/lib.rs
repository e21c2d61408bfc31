//! Shared document model for replaybook.
//!
//! A [`Playbook`] is an authored or recorded sequence of [`Step`]s plus the
//! variable definitions the run needs. Steps optionally carry the resolution
//! metadata captured at record time ([`SmartSelector`], [`ElementIdentity`]
//! and the enhanced fallback bundles) which the locator consumes read-only.

mod playbook;
mod selector;

pub use playbook::*;
pub use selector::*;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one execution of a playbook.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
