//! Error types for page automation

use thiserror::Error;

/// Errors raised by a [`PageDriver`](crate::PageDriver).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// Navigation timed out waiting for page load
    #[error("Navigation timeout: {0}")]
    NavTimeout(String),

    /// Wait operation timed out
    #[error("Wait timeout: {0}")]
    WaitTimeout(String),

    /// Target query matched nothing
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element is not clickable (obscured, disabled, or not interactable)
    #[error("Element not clickable: {0}")]
    NotClickable(String),

    /// Element does not accept text input
    #[error("Element not editable: {0}")]
    NotEditable(String),

    /// Dropdown option was not found
    #[error("Option not found in dropdown: {0}")]
    OptionNotFound(String),

    /// Script evaluation failed inside the page
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// The driver could not parse or does not support the query
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Transport or protocol failure talking to the browser
    #[error("Driver I/O error: {0}")]
    DriverIo(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::WaitTimeout(_) | ActionError::NotClickable(_) | ActionError::DriverIo(_)
        )
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            ActionError::Internal(_) => 3,
            ActionError::NavTimeout(_) | ActionError::DriverIo(_) => 2,
            ActionError::WaitTimeout(_)
            | ActionError::ElementNotFound(_)
            | ActionError::NotEditable(_) => 1,
            _ => 0,
        }
    }
}
