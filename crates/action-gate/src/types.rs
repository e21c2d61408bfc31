//! Core types for step verification

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Consecutive perceptual failures before the fallback switches itself off
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Shown when verification fails and no perceptual guidance is available
pub const MANUAL_CONFIRMATION_MESSAGE: &str =
    "Please check the screen yourself and confirm when the step is done.";

/// Which tier produced the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMethod {
    Structural,
    Perceptual,
}

/// Verdict returned to the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub success: bool,
    pub method: VerifyMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Corrective hint for the human, present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    /// Perceptual failures counted so far
    pub retry_count: u32,
}

impl VerifyResult {
    pub fn passed(method: VerifyMethod, message: impl Into<String>) -> Self {
        Self {
            success: true,
            method,
            message: Some(message.into()),
            guidance: None,
            retry_count: 0,
        }
    }

    pub fn failed(method: VerifyMethod, message: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            success: false,
            method,
            message: Some(message.into()),
            guidance: Some(guidance.into()),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Verifier tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierConfig {
    /// Wait per success selector
    pub structural_timeout: Duration,
    pub failure_threshold: u32,
    /// Upper bound on a single judgment or guidance call
    pub judge_timeout: Duration,
    /// Initial state of the perceptual fallback
    pub perceptual_enabled: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            structural_timeout: Duration::from_millis(3000),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            judge_timeout: Duration::from_secs(30),
            perceptual_enabled: true,
        }
    }
}

/// Snapshot of the perceptual budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierStatus {
    pub enabled: bool,
    pub fail_count: u32,
    pub max_retries: u32,
}
