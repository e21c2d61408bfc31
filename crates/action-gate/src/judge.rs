//! Perceptual judgment collaborator contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GateError;

/// Asks whether an instructed action visibly succeeded.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    /// Encoded image of the current view
    pub screenshot: &'a [u8],
    pub instruction: &'a str,
    pub success_condition: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub passed: bool,
    pub reason: String,
}

impl JudgeVerdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Asks for a short corrective hint after a negative verdict.
#[derive(Debug, Clone, Copy)]
pub struct GuidanceRequest<'a> {
    pub screenshot: &'a [u8],
    pub instruction: &'a str,
    pub failure_reason: &'a str,
}

/// Image-based judgment service. Calls are assumed to be slow and billed, so
/// the verifier only reaches for it after structural checks fail.
#[async_trait]
pub trait PerceptualJudge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<JudgeVerdict, GateError>;

    async fn guidance(&self, request: &GuidanceRequest<'_>) -> Result<String, GateError>;
}
