//! Step executor seam

use async_trait::async_trait;
use replaybook_core_types::{ActionType, Step};
use tracing::debug;

use crate::errors::PlaybookError;
use crate::types::{ExecutionContext, StepResult};

/// Performs one leaf step against the outside world.
///
/// The engine hands over a step with every placeholder already interpolated,
/// plus a snapshot of the execution context. Condition and loop steps never
/// reach an executor; the engine expands them itself.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &Step,
        context: &ExecutionContext,
    ) -> Result<StepResult, PlaybookError>;
}

/// Executor that touches nothing and reports every step as done.
///
/// Steps that wait for the user still suspend the run, so a dry run walks
/// through the same states a live one would.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedExecutor;

#[async_trait]
impl StepExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        step: &Step,
        _context: &ExecutionContext,
    ) -> Result<StepResult, PlaybookError> {
        debug!("simulating {} step {}", step.action, step.id);
        let result = if step.waits_for_user() {
            StepResult::waiting()
        } else {
            StepResult::ok()
        };
        Ok(match (step.action, &step.message) {
            (ActionType::Guide, Some(message)) => result.with_message(message.clone()),
            _ => result,
        })
    }
}
