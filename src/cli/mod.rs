pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod resolve;
pub mod run;
pub mod runtime;
pub mod validate;

pub use resolve::{cmd_resolve, ResolveArgs};
pub use run::{cmd_run, RunArgs};
pub use validate::{cmd_validate, ValidateArgs};
