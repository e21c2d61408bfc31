//! Page automation contract for replaybook.
//!
//! This crate defines what the replay core needs from a browser page:
//! - [`PageDriver`]: count, locate, act and evaluate primitives
//! - [`Query`]: structured target descriptions rendered to selector strings
//! - [`FixturePage`]: a declarative in-memory driver for dry runs and tests

mod driver;
pub mod errors;
mod fixture;
pub mod types;

pub use driver::*;
pub use errors::*;
pub use fixture::*;
pub use types::*;
