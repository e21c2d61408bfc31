//! Execution state and event types

use std::fmt;

use action_gate::VerifyResult;
use action_locator::HealingResult;
use chrono::{DateTime, Utc};
use replaybook_core_types::{ActionType, RunId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Runtime variables, keyed by name.
pub type Variables = Map<String, Value>;

/// Loop-local variable holding the current element
pub const LOOP_ITEM: &str = "_item";
/// Loop-local variable holding the current position
pub const LOOP_INDEX: &str = "_index";

/// Execution state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Executing,
    /// Suspended until the user confirms or skips
    WaitingUser,
    /// Checking a user-confirmed step
    Verifying,
    Paused,
    Completed,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::WaitingUser => "waiting_user",
            ExecutionStatus::Verifying => "verifying",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Error => "error",
        }
    }

    /// Finished for this run; only `load()` or `stop()` leave it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded step failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub step_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionError {
    pub fn new(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Mutable state of one execution, owned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub variables: Variables,
    pub current_step_index: usize,
    pub status: ExecutionStatus,
    /// Append-only
    pub errors: Vec<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            variables: Variables::new(),
            current_step_index: 0,
            status: ExecutionStatus::Idle,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn last_error(&self) -> Option<&ExecutionError> {
        self.errors.last()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one step as reported by a step executor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    /// Suspend in `waiting_user` after this step
    #[serde(default)]
    pub wait_for_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extracted payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// How the target was resolved, when the step had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healing: Option<HealingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn waiting() -> Self {
        Self {
            success: true,
            wait_for_user: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_healing(mut self, healing: HealingResult) -> Self {
        self.healing = Some(healing);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_wait_for_user(mut self, wait: bool) -> Self {
        self.wait_for_user = wait;
        self
    }

    /// Stops a nested branch or loop body early
    pub fn interrupts(&self) -> bool {
        !self.success || self.wait_for_user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    /// Rounded, `0` for an empty playbook
    pub percentage: u32,
}

impl Progress {
    pub fn new(current: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((current as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            current,
            total,
            percentage,
        }
    }
}

/// Discriminated event stream of the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybookEvent {
    Loaded {
        playbook_id: String,
        name: String,
        step_count: usize,
    },
    Started {
        run_id: RunId,
    },
    StepStarted {
        step_index: usize,
        step_id: String,
        action: ActionType,
    },
    StepCompleted {
        step_index: usize,
        step_id: String,
        result: StepResult,
    },
    WaitingUser {
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Verifying {
        step_index: usize,
    },
    #[serde(rename = "verify_success")]
    VerifySucceeded {
        step_index: usize,
        result: VerifyResult,
    },
    VerifyFailed {
        step_index: usize,
        result: VerifyResult,
    },
    Paused,
    Resumed,
    Stopped,
    Completed,
    Error {
        error: ExecutionError,
    },
}

impl PlaybookEvent {
    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybookEvent::Loaded { .. } => "loaded",
            PlaybookEvent::Started { .. } => "started",
            PlaybookEvent::StepStarted { .. } => "step_started",
            PlaybookEvent::StepCompleted { .. } => "step_completed",
            PlaybookEvent::WaitingUser { .. } => "waiting_user",
            PlaybookEvent::Verifying { .. } => "verifying",
            PlaybookEvent::VerifySucceeded { .. } => "verify_success",
            PlaybookEvent::VerifyFailed { .. } => "verify_failed",
            PlaybookEvent::Paused => "paused",
            PlaybookEvent::Resumed => "resumed",
            PlaybookEvent::Stopped => "stopped",
            PlaybookEvent::Completed => "completed",
            PlaybookEvent::Error { .. } => "error",
        }
    }
}
