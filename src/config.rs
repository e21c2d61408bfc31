//! Application configuration
//!
//! Values resolve in three layers: built-in defaults, the YAML file, then
//! `REPLAYBOOK__<SECTION>__<KEY>` environment overlays.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use action_gate::VerifierConfig;
use action_locator::EngineOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "REPLAYBOOK__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Strategy switches for the self-healing engine
    pub resolution: EngineOptions,
    pub verifier: VerifierSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    pub structural_timeout_ms: u64,
    pub failure_threshold: u32,
    pub judge_timeout_ms: u64,
    pub perceptual_enabled: bool,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        let defaults = VerifierConfig::default();
        Self {
            structural_timeout_ms: defaults.structural_timeout.as_millis() as u64,
            failure_threshold: defaults.failure_threshold,
            judge_timeout_ms: defaults.judge_timeout.as_millis() as u64,
            perceptual_enabled: defaults.perceptual_enabled,
        }
    }
}

impl VerifierSettings {
    pub fn to_verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            structural_timeout: Duration::from_millis(self.structural_timeout_ms),
            failure_threshold: self.failure_threshold,
            judge_timeout: Duration::from_millis(self.judge_timeout_ms),
            perceptual_enabled: self.perceptual_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Events buffered per subscriber
    pub event_capacity: usize,
    /// Sleep used by `wait` steps that name nothing to wait for
    pub default_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            default_wait_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
        }
    }
}

/// Configuration plus the file it was (or would have been) read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub from_file: bool,
}

/// `<config_dir>/replaybook/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("replaybook").join("config.yaml"))
}

/// Resolves the configuration. An explicit path must exist; the default
/// location is optional.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (
            default_config_path().unwrap_or_else(|| PathBuf::from("config.yaml")),
            false,
        ),
    };

    let mut merged = serde_json::to_value(AppConfig::default())
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    let from_file = path.exists();
    if from_file {
        let overlay = read_overlay(&path)?;
        merge(&mut merged, overlay);
        debug!("loaded configuration from {}", path.display());
    } else if required {
        return Err(ConfigError::Io {
            path: path.display().to_string(),
            reason: "file not found".to_string(),
        });
    }

    for (key, raw) in env::vars() {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        debug!("config override from {}", key);
        set_path(&mut merged, &segments, parse_env_value(&raw));
    }

    let config =
        serde_json::from_value(merged).map_err(|err| ConfigError::Invalid(err.to_string()))?;
    Ok(LoadedConfig {
        config,
        path,
        from_file,
    })
}

fn read_overlay(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|err| ConfigError::Invalid(format!("{}: {}", path.display(), err)))?;
    serde_json::to_value(yaml).map_err(|err| ConfigError::Invalid(err.to_string()))
}

/// Objects merge key by key; anything else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    let mut current = root;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            _ => return,
        };
    }
    *current = value;
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    if let Ok(int_val) = raw.parse::<i64>() {
        return Value::Number(int_val.into());
    }
    Value::String(raw.to_string())
}
