//! Error types for step verification

use action_primitives::ActionError;
use thiserror::Error;

/// Verification error enumeration
#[derive(Debug, Error, Clone)]
pub enum GateError {
    /// The page driver failed while checking or capturing
    #[error("Page error: {0}")]
    Page(#[from] ActionError),

    /// Perceptual judgment did not answer in time
    #[error("Perceptual judgment timeout after {0}ms")]
    JudgeTimeout(u64),

    /// Perceptual judgment service failed
    #[error("Perceptual judgment failed: {0}")]
    Judge(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::JudgeTimeout(_) => true,
            GateError::Page(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            GateError::Internal(_) => 3,
            GateError::Page(err) => err.severity(),
            GateError::Judge(_) => 2,
            GateError::JudgeTimeout(_) => 1,
        }
    }
}
