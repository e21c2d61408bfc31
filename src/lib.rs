//! Replaybook library
//!
//! Exposes modules for integration testing

pub mod cli;
pub mod config;
pub mod executor;

pub use config::{load_config, AppConfig, ConfigError, LoadedConfig, LogFormat};
pub use executor::PageStepExecutor;
