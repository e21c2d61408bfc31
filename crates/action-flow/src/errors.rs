//! Playbook execution error types

use action_gate::GateError;
use action_locator::LocatorError;
use action_primitives::ActionError;
use thiserror::Error;

use crate::validator::ValidationIssue;

/// Playbook loading and execution errors
#[derive(Debug, Error, Clone)]
pub enum PlaybookError {
    /// Document failed schema or semantic validation
    #[error("Invalid playbook: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Document could not be parsed
    #[error("Failed to parse playbook: {0}")]
    Parse(String),

    /// Document could not be read
    #[error("Failed to read playbook: {0}")]
    Io(String),

    #[error("No playbook loaded")]
    NotLoaded,

    /// Another step loop holds the single-flight guard
    #[error("Playbook execution already in progress")]
    AlreadyRunning,

    /// Operation not allowed from the current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// A `block` precondition evaluated false
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Step executor reported a failure
    #[error("Step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    #[error("Variable {0} is not an array")]
    NotAnArray(String),

    /// Step lacks fields its action needs at run time
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("Verification error: {0}")]
    Gate(#[from] GateError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybookError {
    pub fn step_failed(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        PlaybookError::StepFailed {
            step_id: step_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            PlaybookError::Action(err) => err.is_retryable(),
            PlaybookError::Locator(err) => err.is_retryable(),
            PlaybookError::Gate(err) => err.is_retryable(),
            PlaybookError::StepFailed { .. } => true,
            _ => false,
        }
    }

    /// Errors raised before the step loop starts
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PlaybookError::Validation(_)
                | PlaybookError::Parse(_)
                | PlaybookError::MissingVariables(_)
                | PlaybookError::PreconditionFailed(_)
        )
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            PlaybookError::Internal(_) => 3,
            PlaybookError::Action(err) => err.severity(),
            PlaybookError::Locator(err) => err.severity(),
            PlaybookError::Gate(err) => err.severity(),
            PlaybookError::StepFailed { .. }
            | PlaybookError::NotAnArray(_)
            | PlaybookError::InvalidStep(_) => 2,
            PlaybookError::Validation(_)
            | PlaybookError::Parse(_)
            | PlaybookError::Io(_)
            | PlaybookError::MissingVariables(_)
            | PlaybookError::PreconditionFailed(_) => 1,
            PlaybookError::NotLoaded
            | PlaybookError::AlreadyRunning
            | PlaybookError::InvalidState(_) => 0,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ValidationIssue::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_issue() {
        let err = PlaybookError::Validation(vec![
            ValidationIssue::new("steps[0].selector", "click requires a selector"),
            ValidationIssue::new("metadata.id", "must not be empty"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid playbook: steps[0].selector: click requires a selector, metadata.id: must not be empty"
        );
        assert!(err.is_validation());
    }

    #[test]
    fn test_wrapped_errors_keep_retryability() {
        let err: PlaybookError = ActionError::WaitTimeout("#a".into()).into();
        assert!(err.is_retryable());
        assert!(!PlaybookError::AlreadyRunning.is_retryable());
    }
}
