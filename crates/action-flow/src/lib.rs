//! Playbook orchestration
//!
//! This crate turns a parsed [`Playbook`](replaybook_core_types::Playbook)
//! into a running, observable execution:
//! - `{{path}}` interpolation and a sandboxed condition language
//! - Document parsing and semantic validation with per-path issues
//! - The [`PlaybookEngine`] state machine, driven through an injected
//!   [`StepExecutor`] and publishing [`PlaybookEvent`]s

pub mod condition;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod interpolator;
pub mod parser;
pub mod types;
pub mod validator;

pub use engine::PlaybookEngine;
pub use errors::PlaybookError;
pub use executor::{SimulatedExecutor, StepExecutor};
pub use interpolator::{
    evaluate_condition, extract_variables, has_variables, interpolate, interpolate_step,
    interpolate_value,
};
pub use parser::{load_playbook_file, parse_playbook_json, parse_playbook_yaml};
pub use types::*;
pub use validator::{
    missing_variables, validate_variables, PlaybookValidator, ValidationIssue, ValidationReport,
};
