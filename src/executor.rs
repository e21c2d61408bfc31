//! Page-backed step executor
//!
//! Executes atomic playbook actions against a [`PageDriver`], resolving
//! targets through the recorded selector first and the self-healing engine
//! second.

use std::sync::Arc;
use std::time::{Duration, Instant};

use action_flow::interpolator::{evaluate_condition, lookup, stringify};
use action_flow::{ExecutionContext, PlaybookError, StepExecutor, StepResult};
use action_locator::{
    coordinates_of, CoordinatesStrategy, EngineOptions, HealingResult, HealingStats,
    ResolvedTarget, SelfHealingEngine, StrategyKind,
};
use action_primitives::{ActionError, LoadState, PageDriver, Query};
use async_trait::async_trait;
use replaybook_core_types::{ActionType, Step, WaitFor};
use serde_json::Value;
use tracing::{debug, info, warn};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PageStepExecutor {
    page: Arc<dyn PageDriver>,
    healer: SelfHealingEngine,
    coordinates: CoordinatesStrategy,
    default_wait: Duration,
}

impl PageStepExecutor {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self::with_options(page, EngineOptions::default(), Duration::from_millis(1000))
    }

    pub fn with_options(
        page: Arc<dyn PageDriver>,
        options: EngineOptions,
        default_wait: Duration,
    ) -> Self {
        Self {
            healer: SelfHealingEngine::with_options(page.clone(), options),
            coordinates: CoordinatesStrategy::new(page.clone()),
            page,
            default_wait,
        }
    }

    pub fn healing_stats(&self) -> HealingStats {
        self.healer.stats()
    }

    pub fn healer(&self) -> &SelfHealingEngine {
        &self.healer
    }

    /// Recorded selector as-is, then the healing chain.
    pub async fn resolve(&self, step: &Step) -> HealingResult {
        if let Some(selector) = step.selector.as_deref().filter(|s| !s.trim().is_empty()) {
            let query = Query::css(selector);
            match self.page.count(&query).await {
                Ok(count) if count > 0 => {
                    debug!("step {} matched recorded selector {}", step.id, selector);
                    self.healer.record_direct_hit(StrategyKind::Candidate);
                    return HealingResult::found(StrategyKind::Candidate, selector, query);
                }
                Ok(_) => debug!("recorded selector {} no longer matches", selector),
                Err(err) => warn!("recorded selector {} failed: {}", selector, err),
            }
        }
        self.healer.find_element(step).await
    }

    async fn act(&self, step: &Step, context: &ExecutionContext) -> Result<StepResult, PlaybookError> {
        let timeout = step
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STEP_TIMEOUT);

        match step.action {
            ActionType::Navigate => {
                let url = required_value(step)?;
                self.page.navigate(url).await?;
                self.page.wait_for_load(LoadState::Load, timeout).await?;
                Ok(StepResult::ok())
            }
            ActionType::Click => {
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                match healing.target.clone() {
                    Some(ResolvedTarget::Element { query }) => self.page.click(&query).await?,
                    Some(ResolvedTarget::Point { x, y }) => match coordinates_of(step) {
                        Some(bounds) => self.coordinates.click_at_coordinates(&bounds).await?,
                        None => self.page.click_at(x, y).await?,
                    },
                    None => return Err(unresolved(step, &healing)),
                }
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Type => {
                let text = text_to_type(step, context)?;
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let query = element_query(step, &healing)?;
                self.page.fill(&query, &text).await?;
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Select => {
                let value = required_value(step)?.to_string();
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let query = element_query(step, &healing)?;
                self.page.select_option(&query, &value).await?;
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Hover => {
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let query = element_query(step, &healing)?;
                self.page.hover(&query).await?;
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Scroll => {
                if !step.has_target() {
                    self.page
                        .evaluate("window.scrollBy(0, window.innerHeight)", Value::Null)
                        .await?;
                    return Ok(StepResult::ok());
                }
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let query = element_query(step, &healing)?;
                self.page.scroll_into_view(&query).await?;
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Highlight => {
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                if let Some(ResolvedTarget::Element { query }) = &healing.target {
                    self.page.scroll_into_view(query).await?;
                }
                Ok(with_guidance(StepResult::waiting().with_healing(healing), step))
            }
            ActionType::Guide => Ok(with_guidance(StepResult::waiting(), step)),
            ActionType::Wait => self.wait(step, timeout).await,
            ActionType::Assert => {
                let expected = step.value.clone().unwrap_or_default();
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let text = self.element_text(step, &healing).await?;
                if !text.contains(expected.as_str()) {
                    return Err(PlaybookError::step_failed(
                        &step.id,
                        format!("assertion failed: expected text containing \"{}\"", expected),
                    ));
                }
                Ok(StepResult::ok().with_healing(healing))
            }
            ActionType::Extract => {
                let Some(healing) = self.target(step).await? else {
                    return Ok(skipped(step));
                };
                let text = self.element_text(step, &healing).await?;
                Ok(StepResult::ok()
                    .with_data(Value::String(text))
                    .with_healing(healing))
            }
            ActionType::Validate => {
                let condition = step.condition.as_deref().unwrap_or("true");
                if evaluate_condition(condition, &context.variables) {
                    Ok(StepResult::ok())
                } else {
                    Err(PlaybookError::step_failed(
                        &step.id,
                        step.message
                            .clone()
                            .unwrap_or_else(|| format!("validation failed: {}", condition)),
                    ))
                }
            }
            ActionType::Condition | ActionType::Loop => Err(PlaybookError::InvalidStep(format!(
                "{} step {} must be expanded by the engine",
                step.action, step.id
            ))),
        }
    }

    /// Resolved target, `None` when an optional step's target is missing.
    async fn target(&self, step: &Step) -> Result<Option<HealingResult>, PlaybookError> {
        let healing = self.resolve(step).await;
        if healing.success {
            if healing.is_healed() {
                info!(
                    "step {} healed via {}",
                    step.id,
                    healing.strategy.map(|s| s.name()).unwrap_or("unknown")
                );
            }
            return Ok(Some(healing));
        }
        if step.optional {
            info!("optional step {} has no target, skipping", step.id);
            return Ok(None);
        }
        Err(unresolved(step, &healing))
    }

    async fn wait(&self, step: &Step, timeout: Duration) -> Result<StepResult, PlaybookError> {
        match step.wait_for {
            Some(WaitFor::Element) => {
                let selector = step.selector.as_deref().unwrap_or_default();
                let visible = self.page.wait_visible(&Query::css(selector), timeout).await?;
                if !visible {
                    return Err(ActionError::WaitTimeout(selector.to_string()).into());
                }
                Ok(StepResult::ok())
            }
            Some(WaitFor::Navigation) => {
                self.page.wait_for_load(LoadState::Load, timeout).await?;
                Ok(StepResult::ok())
            }
            Some(WaitFor::Network) => {
                self.page.wait_for_load(LoadState::NetworkIdle, timeout).await?;
                Ok(StepResult::ok())
            }
            Some(WaitFor::User) | Some(WaitFor::UserInput) => {
                Ok(with_guidance(StepResult::waiting(), step))
            }
            None => {
                let duration = step
                    .timeout
                    .or_else(|| step.value.as_deref().and_then(|v| v.trim().parse().ok()))
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_wait);
                debug!("step {} sleeping {}ms", step.id, duration.as_millis());
                tokio::time::sleep(duration).await;
                Ok(StepResult::ok())
            }
        }
    }

    async fn element_text(&self, step: &Step, healing: &HealingResult) -> Result<String, PlaybookError> {
        let query = element_query(step, healing)?;
        let snapshot = self
            .page
            .locate(&query)
            .await?
            .ok_or_else(|| ActionError::ElementNotFound(query.to_selector()))?;
        Ok(snapshot
            .text
            .or_else(|| snapshot.attributes.get("value").cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl StepExecutor for PageStepExecutor {
    async fn execute(
        &self,
        step: &Step,
        context: &ExecutionContext,
    ) -> Result<StepResult, PlaybookError> {
        let started = Instant::now();
        let mut result = self.act(step, context).await?;
        if step.waits_for_user() {
            result = with_guidance(result.with_wait_for_user(true), step);
        }
        if let Some(wait_after) = step.wait_after.filter(|ms| *ms > 0) {
            tokio::time::sleep(Duration::from_millis(wait_after)).await;
        }
        Ok(result.with_duration(started.elapsed().as_millis() as u64))
    }
}

fn required_value(step: &Step) -> Result<&str, PlaybookError> {
    step.value
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PlaybookError::InvalidStep(format!("{} step {} has no value", step.action, step.id)))
}

/// Literal value, else the named variable.
fn text_to_type(step: &Step, context: &ExecutionContext) -> Result<String, PlaybookError> {
    if let Some(value) = &step.value {
        return Ok(value.clone());
    }
    let name = step.variable.as_deref().unwrap_or_default();
    lookup(&context.variables, name)
        .map(stringify)
        .ok_or_else(|| PlaybookError::step_failed(&step.id, format!("variable {} has no value", name)))
}

fn element_query(step: &Step, healing: &HealingResult) -> Result<Query, PlaybookError> {
    match &healing.target {
        Some(ResolvedTarget::Element { query }) => Ok(query.clone()),
        Some(ResolvedTarget::Point { .. }) => Err(PlaybookError::step_failed(
            &step.id,
            format!("{} needs an element, target was only located by coordinates", step.action),
        )),
        None => Err(unresolved(step, healing)),
    }
}

fn unresolved(step: &Step, healing: &HealingResult) -> PlaybookError {
    PlaybookError::step_failed(
        &step.id,
        format!(
            "target not found: {}",
            healing.error.as_deref().unwrap_or("no strategy matched")
        ),
    )
}

fn skipped(step: &Step) -> StepResult {
    StepResult::ok()
        .with_message(format!("optional step {} skipped", step.id))
}

fn with_guidance(result: StepResult, step: &Step) -> StepResult {
    match &step.message {
        Some(message) if result.message.is_none() => result.with_message(message.clone()),
        _ => result,
    }
}
