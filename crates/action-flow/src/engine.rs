//! Playbook execution state machine

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use action_gate::{StepVerifier, VerifierStatus};
use action_primitives::PageDriver;
use async_recursion::async_recursion;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use replaybook_core_types::{
    ActionType, ErrorAction, OnError, Playbook, PreconditionAction, RunId, Step,
};
use replaybook_event_bus::{EventBus, InMemoryBus};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::errors::PlaybookError;
use crate::executor::{SimulatedExecutor, StepExecutor};
use crate::interpolator::{evaluate_condition, interpolate_step, lookup};
use crate::types::*;
use crate::validator::{missing_variables, validate_variables, PlaybookValidator};

const DEFAULT_EVENT_CAPACITY: usize = 256;

struct EngineState {
    playbook: Option<Arc<Playbook>>,
    context: ExecutionContext,
}

/// Marks a step loop as active for as long as it is alive.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How a failed step is resolved.
#[derive(Debug, Clone, PartialEq)]
enum FailurePolicy {
    Skip,
    Retry,
    Guide(Option<String>),
    Abort,
}

/// Sequences the steps of one loaded playbook.
///
/// Every operation takes `&self`, so the engine is shared behind an `Arc`
/// between the task driving the run and whoever answers confirmation
/// prompts. At most one step loop runs at a time: `start`, `resume`,
/// `user_action` and `skip_verification` all enter the loop through the same
/// single-flight guard, and the guard is released only when that loop exits.
///
/// `stop` and `load` never wait for an in-flight step. They bump a run
/// generation instead; a loop that finds its generation superseded after a
/// step returns without touching the new state.
pub struct PlaybookEngine {
    state: Mutex<EngineState>,
    executor: RwLock<Arc<dyn StepExecutor>>,
    verifier: Arc<StepVerifier>,
    page: RwLock<Option<Arc<dyn PageDriver>>>,
    events: Arc<InMemoryBus<PlaybookEvent>>,
    executing: AtomicBool,
    generation: AtomicU64,
    skip_requested: AtomicBool,
}

impl PlaybookEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Engine whose event stream buffers `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(EngineState {
                playbook: None,
                context: ExecutionContext::new(),
            }),
            executor: RwLock::new(Arc::new(SimulatedExecutor)),
            verifier: Arc::new(StepVerifier::default()),
            page: RwLock::new(None),
            events: InMemoryBus::new(capacity),
            executing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            skip_requested: AtomicBool::new(false),
        }
    }

    pub fn with_executor(self, executor: Arc<dyn StepExecutor>) -> Self {
        *self.executor.write() = executor;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<StepVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Page used to verify steps after user confirmation.
    pub fn with_page(self, page: Arc<dyn PageDriver>) -> Self {
        *self.page.write() = Some(page);
        self
    }

    pub fn set_executor(&self, executor: Arc<dyn StepExecutor>) {
        *self.executor.write() = executor;
    }

    pub fn set_page(&self, page: Option<Arc<dyn PageDriver>>) {
        *self.page.write() = page;
    }

    /// Validates and installs a playbook, discarding any previous run.
    pub fn load(&self, playbook: Playbook) -> Result<(), PlaybookError> {
        let warnings = PlaybookValidator::new()
            .validate(&playbook)
            .into_result()
            .map_err(|err| {
                warn!("rejected playbook {}: {}", playbook.metadata.id, err);
                err
            })?;
        for issue in &warnings {
            warn!("playbook {}: {}", playbook.metadata.id, issue);
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.skip_requested.store(false, Ordering::SeqCst);
        let event = PlaybookEvent::Loaded {
            playbook_id: playbook.metadata.id.clone(),
            name: playbook.metadata.name.clone(),
            step_count: playbook.steps.len(),
        };
        info!(
            "loaded playbook {} ({} steps)",
            playbook.metadata.id,
            playbook.steps.len()
        );
        {
            let mut state = self.state.lock();
            state.playbook = Some(Arc::new(playbook));
            state.context = ExecutionContext::new();
        }
        self.events.emit(event);
        Ok(())
    }

    /// Shallow-merges into the run variables.
    pub fn set_variables(&self, variables: Variables) {
        let mut state = self.state.lock();
        state.context.variables.extend(variables);
    }

    /// Runs the loaded playbook from the current index.
    ///
    /// Returns once the loop stops: on completion, on an unrecovered error,
    /// when a step waits for the user, or after `pause`/`stop`.
    pub async fn start(&self) -> Result<(), PlaybookError> {
        let Some(_flight) = FlightGuard::acquire(&self.executing) else {
            return Err(PlaybookError::AlreadyRunning);
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let run_id = {
            let mut state = self.state.lock();
            let playbook = state.playbook.clone().ok_or(PlaybookError::NotLoaded)?;
            match state.context.status {
                ExecutionStatus::Idle => {}
                ExecutionStatus::Paused => {
                    return Err(PlaybookError::InvalidState(
                        "execution is paused, use resume".into(),
                    ))
                }
                ExecutionStatus::Completed | ExecutionStatus::Error => {
                    return Err(PlaybookError::InvalidState(format!(
                        "run already {}, load the playbook again",
                        state.context.status
                    )))
                }
                ExecutionStatus::Executing
                | ExecutionStatus::WaitingUser
                | ExecutionStatus::Verifying => return Err(PlaybookError::AlreadyRunning),
            }

            let variables = &mut state.context.variables;
            for (name, definition) in &playbook.variables {
                let unset = variables
                    .get(name)
                    .map_or(true, |value| value.is_null() || value.as_str() == Some(""));
                if unset {
                    if let Some(default) = &definition.default {
                        variables.insert(name.clone(), default.clone());
                    }
                }
            }

            let missing = missing_variables(&playbook, &state.context.variables);
            if !missing.is_empty() {
                return Err(PlaybookError::MissingVariables(missing));
            }
            let issues = validate_variables(&playbook, &state.context.variables);
            if !issues.is_empty() {
                return Err(PlaybookError::Validation(issues));
            }

            for precondition in &playbook.preconditions {
                if evaluate_condition(&precondition.check, &state.context.variables) {
                    continue;
                }
                match precondition.action {
                    PreconditionAction::Block => {
                        return Err(PlaybookError::PreconditionFailed(
                            precondition.message.clone(),
                        ))
                    }
                    PreconditionAction::Warn => {
                        warn!("precondition not met: {}", precondition.message)
                    }
                }
            }

            let context = &mut state.context;
            context.run_id = RunId::new();
            context.status = ExecutionStatus::Executing;
            context.errors.clear();
            context.started_at = Some(Utc::now());
            context.completed_at = None;
            info!(
                "starting playbook {} (run {})",
                playbook.metadata.id, context.run_id
            );
            context.run_id.clone()
        };

        self.events.emit(PlaybookEvent::Started { run_id });
        self.run_loop(generation).await;
        Ok(())
    }

    /// Suspends at the next step boundary. Only effective while executing.
    pub fn pause(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.context.status != ExecutionStatus::Executing {
                return false;
            }
            state.context.status = ExecutionStatus::Paused;
        }
        info!("execution paused");
        self.events.emit(PlaybookEvent::Paused);
        true
    }

    /// Re-enters the step loop at the current index. No-op unless paused.
    pub async fn resume(&self) -> Result<(), PlaybookError> {
        if self.status() != ExecutionStatus::Paused {
            return Ok(());
        }
        let Some(_flight) = FlightGuard::acquire(&self.executing) else {
            return Err(PlaybookError::AlreadyRunning);
        };
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if state.context.status != ExecutionStatus::Paused {
                return Ok(());
            }
            state.context.status = ExecutionStatus::Executing;
        }
        info!("execution resumed");
        self.events.emit(PlaybookEvent::Resumed);
        self.run_loop(generation).await;
        Ok(())
    }

    /// Forces `idle` at index 0. An in-flight step finishes but its outcome
    /// is discarded.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.skip_requested.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            state.context.status = ExecutionStatus::Idle;
            state.context.current_step_index = 0;
        }
        info!("execution stopped");
        self.events.emit(PlaybookEvent::Stopped);
    }

    /// Confirms the step the run is waiting on.
    ///
    /// Object `data` is merged into the variables first. When the step
    /// declares `verify` and a page is attached, the step is verified before
    /// the run advances; a failed verification returns to `waiting_user` with
    /// guidance, and a verifier error advances anyway.
    pub async fn user_action(&self, data: Option<Value>) -> Result<(), PlaybookError> {
        if self.status() != ExecutionStatus::WaitingUser {
            debug!("user action ignored in state {}", self.status());
            return Ok(());
        }
        let Some(_flight) = FlightGuard::acquire(&self.executing) else {
            return Err(PlaybookError::AlreadyRunning);
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let (index, step, variables) = {
            let mut state = self.state.lock();
            if state.context.status != ExecutionStatus::WaitingUser {
                return Ok(());
            }
            if let Some(Value::Object(fields)) = data {
                state.context.variables.extend(fields);
            }
            let index = state.context.current_step_index;
            let step = state
                .playbook
                .as_ref()
                .and_then(|playbook| playbook.steps.get(index).cloned());
            (index, step, state.context.variables.clone())
        };

        let page = self.page.read().clone();
        let target = step.filter(|step| step.verify.is_some()).zip(page);
        if let Some((step, page)) = target {
            self.skip_requested.store(false, Ordering::SeqCst);
            self.state.lock().context.status = ExecutionStatus::Verifying;
            self.events.emit(PlaybookEvent::Verifying { step_index: index });

            let interpolated = interpolate_step(&step, &variables);
            let outcome = self.verifier.verify(&interpolated, page.as_ref()).await;
            if self.superseded(generation) {
                return Ok(());
            }

            if self.skip_requested.swap(false, Ordering::SeqCst) {
                info!("verification of step {} skipped by user", step.id);
            } else {
                match outcome {
                    Ok(result) if result.success => {
                        self.events.emit(PlaybookEvent::VerifySucceeded {
                            step_index: index,
                            result,
                        });
                    }
                    Ok(result) => {
                        info!("verification of step {} failed", step.id);
                        let message = result.guidance.clone().or_else(|| result.message.clone());
                        self.events.emit(PlaybookEvent::VerifyFailed {
                            step_index: index,
                            result,
                        });
                        self.state.lock().context.status = ExecutionStatus::WaitingUser;
                        self.events.emit(PlaybookEvent::WaitingUser {
                            step_index: index,
                            message,
                        });
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(
                            "verifier error on step {}, continuing: {}",
                            step.id, err
                        );
                    }
                }
            }
        }

        if self.advance_from_wait(index) {
            self.run_loop(generation).await;
        }
        Ok(())
    }

    /// Advances past the awaited step without verifying it.
    pub async fn skip_verification(&self) -> Result<(), PlaybookError> {
        match self.status() {
            ExecutionStatus::Verifying => {
                self.skip_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
            ExecutionStatus::WaitingUser => {
                let Some(_flight) = FlightGuard::acquire(&self.executing) else {
                    return Err(PlaybookError::AlreadyRunning);
                };
                let generation = self.generation.load(Ordering::SeqCst);
                let index = self.state.lock().context.current_step_index;
                info!("step {} confirmed without verification", index);
                if self.advance_from_wait(index) {
                    self.run_loop(generation).await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.state.lock().context.status
    }

    pub fn context(&self) -> ExecutionContext {
        self.state.lock().context.clone()
    }

    pub fn progress(&self) -> Progress {
        let state = self.state.lock();
        let total = state.playbook.as_ref().map_or(0, |pb| pb.steps.len());
        Progress::new(state.context.current_step_index.min(total), total)
    }

    pub fn current_step(&self) -> Option<Step> {
        let state = self.state.lock();
        let index = state.context.current_step_index;
        state
            .playbook
            .as_ref()
            .and_then(|playbook| playbook.steps.get(index).cloned())
    }

    pub fn playbook(&self) -> Option<Arc<Playbook>> {
        self.state.lock().playbook.clone()
    }

    /// True while a step loop holds the single-flight guard.
    pub fn is_running(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybookEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> Arc<InMemoryBus<PlaybookEvent>> {
        Arc::clone(&self.events)
    }

    pub fn verifier(&self) -> &Arc<StepVerifier> {
        &self.verifier
    }

    pub fn verifier_status(&self) -> VerifierStatus {
        self.verifier.status()
    }

    pub fn reset_verifier(&self) {
        self.verifier.reset();
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn advance_from_wait(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        match state.context.status {
            ExecutionStatus::WaitingUser | ExecutionStatus::Verifying
                if state.context.current_step_index == index =>
            {
                state.context.current_step_index = index + 1;
                state.context.status = ExecutionStatus::Executing;
                true
            }
            _ => false,
        }
    }

    async fn run_loop(&self, generation: u64) {
        loop {
            let (index, step) = {
                let state = self.state.lock();
                if self.superseded(generation)
                    || state.context.status != ExecutionStatus::Executing
                {
                    return;
                }
                let index = state.context.current_step_index;
                match state.playbook.as_ref().and_then(|pb| pb.steps.get(index)) {
                    Some(step) => (index, step.clone()),
                    None => break,
                }
            };

            debug!("step {} ({}) started", step.id, step.action);
            self.events.emit(PlaybookEvent::StepStarted {
                step_index: index,
                step_id: step.id.clone(),
                action: step.action,
            });

            let outcome = self.execute_step(&step, generation).await;
            if self.superseded(generation) {
                debug!("discarding outcome of step {} from a stopped run", step.id);
                return;
            }

            let proceed = match outcome {
                Ok(result) => self.complete_step(&step, index, result),
                Err(err) => self.handle_step_error(&step, index, err, generation).await,
            };
            if !proceed {
                return;
            }
            // let event subscribers drain between steps
            tokio::task::yield_now().await;
        }

        let finished = {
            let mut state = self.state.lock();
            if !self.superseded(generation) && state.context.status == ExecutionStatus::Executing
            {
                state.context.status = ExecutionStatus::Completed;
                state.context.completed_at = Some(Utc::now());
                true
            } else {
                false
            }
        };
        if finished {
            info!("playbook completed");
            self.events.emit(PlaybookEvent::Completed);
        }
    }

    /// Publishes the result and moves on. `false` when the run suspends.
    fn complete_step(&self, step: &Step, index: usize, result: StepResult) -> bool {
        let waits = result.wait_for_user;
        let message = result.message.clone().or_else(|| step.message.clone());
        if !result.success {
            warn!(
                "step {} reported failure: {}",
                step.id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.events.emit(PlaybookEvent::StepCompleted {
            step_index: index,
            step_id: step.id.clone(),
            result,
        });

        let mut state = self.state.lock();
        if waits {
            state.context.status = ExecutionStatus::WaitingUser;
            drop(state);
            info!("waiting for user on step {}", step.id);
            self.events.emit(PlaybookEvent::WaitingUser {
                step_index: index,
                message,
            });
            return false;
        }
        state.context.current_step_index = index + 1;
        true
    }

    async fn handle_step_error(
        &self,
        step: &Step,
        index: usize,
        err: PlaybookError,
        generation: u64,
    ) -> bool {
        let message = err.to_string();
        warn!("step {} failed: {}", step.id, message);
        self.record_error(&step.id, &message);

        match self.failure_policy(step, &message) {
            FailurePolicy::Skip => {
                info!("skipping failed step {}", step.id);
                self.state.lock().context.current_step_index = index + 1;
                true
            }
            FailurePolicy::Retry => {
                info!("retrying step {}", step.id);
                let retried = self.execute_step(step, generation).await;
                if self.superseded(generation) {
                    return false;
                }
                match retried {
                    Ok(result) => self.complete_step(step, index, result),
                    Err(err) => {
                        warn!("step {} failed again: {}", step.id, err);
                        self.record_error(&step.id, &err.to_string());
                        self.abort();
                        false
                    }
                }
            }
            FailurePolicy::Guide(guidance) => {
                self.state.lock().context.status = ExecutionStatus::WaitingUser;
                self.events.emit(PlaybookEvent::WaitingUser {
                    step_index: index,
                    message: guidance.or_else(|| step.message.clone()),
                });
                false
            }
            FailurePolicy::Abort => {
                self.abort();
                false
            }
        }
    }

    fn failure_policy(&self, step: &Step, message: &str) -> FailurePolicy {
        if let Some(on_error) = step.on_error {
            return match on_error {
                OnError::Skip => FailurePolicy::Skip,
                OnError::Retry => FailurePolicy::Retry,
                OnError::Abort => FailurePolicy::Abort,
            };
        }
        let Some(playbook) = self.playbook() else {
            return FailurePolicy::Abort;
        };
        let handler = playbook.error_handlers.iter().find(|handler| {
            match Regex::new(&handler.pattern) {
                Ok(re) => re.is_match(message),
                Err(_) => message.contains(&handler.pattern),
            }
        });
        match handler {
            Some(handler) => {
                debug!("error handler '{}' matched step {}", handler.pattern, step.id);
                match handler.action {
                    ErrorAction::Skip => FailurePolicy::Skip,
                    ErrorAction::Retry => FailurePolicy::Retry,
                    ErrorAction::Abort => FailurePolicy::Abort,
                    ErrorAction::Guide => FailurePolicy::Guide(handler.message.clone()),
                }
            }
            None => FailurePolicy::Abort,
        }
    }

    fn record_error(&self, step_id: &str, message: &str) {
        self.state
            .lock()
            .context
            .errors
            .push(ExecutionError::new(step_id, message));
    }

    fn abort(&self) {
        let error = {
            let mut state = self.state.lock();
            state.context.status = ExecutionStatus::Error;
            state.context.completed_at = Some(Utc::now());
            state.context.last_error().cloned()
        };
        if let Some(error) = error {
            self.events.emit(PlaybookEvent::Error { error });
        }
    }

    /// Runs one step, expanding condition and loop steps in place.
    #[async_recursion]
    async fn execute_step(&self, step: &Step, generation: u64) -> Result<StepResult, PlaybookError> {
        let (interpolated, context) = {
            let state = self.state.lock();
            (
                interpolate_step(step, &state.context.variables),
                state.context.clone(),
            )
        };

        match step.action {
            ActionType::Condition => {
                let expression = step.condition.as_deref().ok_or_else(|| {
                    PlaybookError::InvalidStep(format!(
                        "Condition step {} missing condition expression",
                        step.id
                    ))
                })?;
                let passed = evaluate_condition(expression, &context.variables);
                debug!("condition of step {} evaluated to {}", step.id, passed);
                let branch = if passed { &step.then } else { &step.else_steps };
                self.execute_nested(branch.as_deref().unwrap_or(&[]), generation)
                    .await
            }
            ActionType::Loop => {
                let variable = step.variable.as_deref().ok_or_else(|| {
                    PlaybookError::InvalidStep(format!("Loop step {} missing variable", step.id))
                })?;
                let body = step.steps.as_deref().filter(|body| !body.is_empty()).ok_or_else(
                    || PlaybookError::InvalidStep(format!("Loop step {} has no steps", step.id)),
                )?;
                let items = match lookup(&context.variables, variable) {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return Err(PlaybookError::NotAnArray(variable.to_string())),
                };

                debug!("loop step {} over {} items", step.id, items.len());
                let mut outcome = Ok(StepResult::ok());
                for (position, item) in items.into_iter().enumerate() {
                    {
                        let mut state = self.state.lock();
                        let variables = &mut state.context.variables;
                        variables.insert(LOOP_ITEM.to_string(), item);
                        variables.insert(LOOP_INDEX.to_string(), json!(position));
                    }
                    outcome = self.execute_nested(body, generation).await;
                    let interrupted = match &outcome {
                        Ok(result) => result.interrupts(),
                        Err(_) => true,
                    };
                    if interrupted || self.superseded(generation) {
                        break;
                    }
                }
                {
                    let mut state = self.state.lock();
                    state.context.variables.remove(LOOP_ITEM);
                    state.context.variables.remove(LOOP_INDEX);
                }
                outcome
            }
            _ => {
                let executor = self.executor.read().clone();
                let started = Instant::now();
                let mut result = executor.execute(&interpolated, &context).await?;
                if result.duration_ms.is_none() {
                    result.duration_ms = Some(started.elapsed().as_millis() as u64);
                }
                if step.action == ActionType::Extract {
                    if let (Some(variable), Some(data)) = (&interpolated.variable, &result.data) {
                        debug!("storing extracted data in {}", variable);
                        self.state
                            .lock()
                            .context
                            .variables
                            .insert(variable.clone(), data.clone());
                    }
                }
                Ok(result)
            }
        }
    }

    /// Runs a nested list in order, stopping at the first interruption.
    #[async_recursion]
    async fn execute_nested(
        &self,
        steps: &[Step],
        generation: u64,
    ) -> Result<StepResult, PlaybookError> {
        let mut last = StepResult::ok();
        for step in steps {
            if self.superseded(generation) {
                break;
            }
            debug!("nested step {} ({})", step.id, step.action);
            last = self.execute_step(step, generation).await?;
            if last.interrupts() {
                break;
            }
        }
        Ok(last)
    }
}

impl Default for PlaybookEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaybook_core_types::{PlaybookMetadata, WaitFor};

    fn playbook(steps: Vec<Step>) -> Playbook {
        Playbook::new(PlaybookMetadata::new("pb", "Test", "1.0"), steps)
    }

    fn waits(id: &str) -> Step {
        Step::new(id, ActionType::Guide)
            .with_message(format!("confirm {id}"))
            .with_wait_for(WaitFor::User)
    }

    #[test]
    fn test_start_requires_playbook() {
        let engine = PlaybookEngine::new();
        let result = tokio_test::block_on(engine.start());
        assert!(matches!(result, Err(PlaybookError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_playbook() {
        let engine = PlaybookEngine::new();
        let err = engine
            .load(playbook(vec![Step::new("a", ActionType::Click)]))
            .unwrap_err();
        assert!(matches!(err, PlaybookError::Validation(ref issues) if issues.len() == 1));
        assert!(engine.playbook().is_none());
    }

    #[tokio::test]
    async fn test_pause_and_resume_ignored_while_waiting() {
        let engine = PlaybookEngine::new();
        engine
            .load(playbook(vec![
                Step::new("a", ActionType::Wait),
                waits("b"),
                Step::new("c", ActionType::Wait),
            ]))
            .unwrap();

        engine.start().await.unwrap();
        assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
        assert_eq!(engine.context().current_step_index, 1);
        assert_eq!(engine.current_step().map(|s| s.id), Some("b".to_string()));

        assert!(!engine.pause());
        engine.resume().await.unwrap();
        assert_eq!(engine.status(), ExecutionStatus::WaitingUser);

        engine.user_action(None).await.unwrap();
        assert_eq!(engine.status(), ExecutionStatus::Completed);
        assert_eq!(engine.progress(), Progress::new(3, 3));
    }

    #[tokio::test]
    async fn test_start_rejected_after_completion() {
        let engine = PlaybookEngine::new();
        engine
            .load(playbook(vec![Step::new("a", ActionType::Wait)]))
            .unwrap();
        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(PlaybookError::InvalidState(_))
        ));

        engine
            .load(playbook(vec![Step::new("a", ActionType::Wait)]))
            .unwrap();
        assert_eq!(engine.status(), ExecutionStatus::Idle);
        engine.start().await.unwrap();
        assert_eq!(engine.status(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_skip_verification_advances_from_waiting() {
        let engine = PlaybookEngine::new();
        engine.load(playbook(vec![waits("a")])).unwrap();
        engine.start().await.unwrap();
        engine.skip_verification().await.unwrap();
        assert_eq!(engine.status(), ExecutionStatus::Completed);
        assert_eq!(engine.context().current_step_index, 1);
    }

    #[tokio::test]
    async fn test_user_action_merges_object_data() {
        let engine = PlaybookEngine::new();
        engine.load(playbook(vec![waits("a")])).unwrap();
        engine.start().await.unwrap();
        engine
            .user_action(Some(json!({"otp": "1234"})))
            .await
            .unwrap();
        assert_eq!(engine.context().variable("otp"), Some(&json!("1234")));
    }

    #[test]
    fn test_failure_policy_prefers_step_then_handlers() {
        let engine = PlaybookEngine::new();
        let mut pb = playbook(vec![Step::new("a", ActionType::Wait)]);
        pb.error_handlers = vec![
            replaybook_core_types::ErrorHandler {
                pattern: "time(d)? ?out".into(),
                action: ErrorAction::Retry,
                message: None,
            },
            replaybook_core_types::ErrorHandler {
                pattern: "[captcha".into(),
                action: ErrorAction::Guide,
                message: Some("Solve the captcha".into()),
            },
        ];
        engine.load(pb).unwrap();

        let plain = Step::new("x", ActionType::Click).with_selector("#x");
        assert_eq!(engine.failure_policy(&plain, "wait timeout"), FailurePolicy::Retry);
        assert_eq!(
            engine.failure_policy(&plain, "blocked by [captcha]"),
            FailurePolicy::Guide(Some("Solve the captcha".into()))
        );
        assert_eq!(engine.failure_policy(&plain, "boom"), FailurePolicy::Abort);

        let skipping = plain.clone().with_on_error(OnError::Skip);
        assert_eq!(engine.failure_policy(&skipping, "wait timeout"), FailurePolicy::Skip);
    }
}
