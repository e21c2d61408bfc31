use std::sync::Arc;

use action_primitives::PageDriver;
use async_trait::async_trait;
use chrono::Utc;
use replaybook_core_types::Step;
use tracing::{debug, info, warn};

use super::{candidate_query, HealingStrategy};
use crate::errors::LocatorError;
use crate::types::{HealingRecord, HealingResult, StrategyKind};

/// Walks the recorded fallback candidates by descending confidence.
pub struct FallbackStrategy {
    page: Arc<dyn PageDriver>,
}

impl FallbackStrategy {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl HealingStrategy for FallbackStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fallback
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.smart_selector
            .as_ref()
            .map(|smart| !smart.fallbacks.is_empty())
            .unwrap_or(false)
    }

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError> {
        let smart = step
            .smart_selector
            .as_ref()
            .ok_or_else(|| LocatorError::InvalidStep("No fallbacks in step".into()))?;
        let text_entry = step.action.is_text_entry();

        for fallback in smart.ranked_fallbacks() {
            if text_entry && fallback.strategy.is_presentational() {
                debug!(
                    "skipping {} fallback for {}: {}",
                    fallback.strategy, step.action, fallback.value
                );
                continue;
            }

            let query = candidate_query(fallback);
            let count = match self.page.count(&query).await {
                Ok(count) => count,
                Err(err) => {
                    debug!("fallback selector failed: {}: {}", fallback.value, err);
                    continue;
                }
            };
            if count == 0 {
                continue;
            }
            if count > 1 {
                warn!(
                    "fallback matched {} elements, using first: {}",
                    count, fallback.value
                );
            }

            info!(
                "healed with fallback {} = {}",
                fallback.strategy, fallback.value
            );
            let record = HealingRecord {
                timestamp: Utc::now().timestamp_millis(),
                original_selector: smart.primary.value.clone(),
                healed_selector: fallback.value.clone(),
                strategy: fallback.strategy,
                success: true,
            };
            return Ok(
                HealingResult::found(StrategyKind::Fallback, fallback.value.clone(), query)
                    .with_record(record),
            );
        }

        Ok(HealingResult::failed(
            Some(StrategyKind::Fallback),
            "All fallback selectors failed",
        ))
    }
}
