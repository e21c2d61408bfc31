//! Error types for the locator

use action_primitives::ActionError;
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// Strategy execution failed
    #[error("Strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    /// The page driver rejected a query or action
    #[error("Page error: {0}")]
    Page(#[from] ActionError),

    /// Step lacks the metadata a strategy was asked to use
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LocatorError::Page(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) => 3,
            LocatorError::Page(err) => err.severity(),
            LocatorError::StrategyFailed { .. } => 1,
            LocatorError::InvalidStep(_) => 0,
        }
    }
}
