use std::sync::Arc;

use action_primitives::PageDriver;
use async_trait::async_trait;
use replaybook_core_types::Step;
use tracing::{debug, warn};

use super::{candidate_query, HealingStrategy};
use crate::errors::LocatorError;
use crate::types::{HealingResult, StrategyKind};

/// Resolves the recorded primary candidate directly.
pub struct CandidateStrategy {
    page: Arc<dyn PageDriver>,
}

impl CandidateStrategy {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl HealingStrategy for CandidateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Candidate
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.smart_selector.is_some()
    }

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError> {
        let smart = step
            .smart_selector
            .as_ref()
            .ok_or_else(|| LocatorError::InvalidStep("No smart selector in step".into()))?;
        let primary = &smart.primary;

        if step.action.is_text_entry() && primary.strategy.is_presentational() {
            debug!(
                "skipping {} candidate for {}: {}",
                primary.strategy, step.action, primary.value
            );
            return Ok(HealingResult::failed(
                Some(StrategyKind::Candidate),
                "Strategy not suitable for input action",
            ));
        }

        let query = candidate_query(primary);
        let count = self.page.count(&query).await?;
        match count {
            0 => Ok(HealingResult::failed(
                Some(StrategyKind::Candidate),
                "Primary selector not found",
            )),
            1 => Ok(HealingResult::found(
                StrategyKind::Candidate,
                primary.value.clone(),
                query,
            )),
            n => {
                warn!("primary selector matched {} elements, using first: {}", n, primary.value);
                Ok(HealingResult::found(
                    StrategyKind::Candidate,
                    primary.value.clone(),
                    query,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{FixtureElement, FixturePage};
    use replaybook_core_types::{ActionType, SelectorCandidate, SelectorStrategy, SmartSelector};

    fn page() -> Arc<FixturePage> {
        Arc::new(FixturePage::new(
            "https://example.test",
            vec![
                FixtureElement::new("a").with_text("Next"),
                FixtureElement::new("a").with_text("Next page"),
                FixtureElement::new("input").with_id("q"),
            ],
        ))
    }

    #[tokio::test]
    async fn test_multi_match_takes_first() {
        let strategy = CandidateStrategy::new(page());
        let step = Step::new("s", ActionType::Click).with_smart_selector(SmartSelector::new(
            SelectorCandidate::new(SelectorStrategy::Text, "Next", 0.6),
        ));
        let result = strategy.find(&step).await.unwrap();
        assert!(result.success);
        assert_eq!(result.selector.as_deref(), Some("Next"));
    }

    #[tokio::test]
    async fn test_rejects_text_candidate_for_typing() {
        let strategy = CandidateStrategy::new(page());
        let step = Step::new("s", ActionType::Type).with_smart_selector(SmartSelector::new(
            SelectorCandidate::new(SelectorStrategy::Text, "Next", 0.6),
        ));
        let result = strategy.find(&step).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_primary() {
        let strategy = CandidateStrategy::new(page());
        let step = Step::new("s", ActionType::Click).with_smart_selector(SmartSelector::new(
            SelectorCandidate::new(SelectorStrategy::Css, "#gone", 0.9),
        ));
        assert!(!strategy.find(&step).await.unwrap().success);
    }
}
