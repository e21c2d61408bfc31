//! Self-healing resolution engine

use std::sync::Arc;

use action_primitives::PageDriver;
use parking_lot::Mutex;
use replaybook_core_types::Step;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::strategies::{
    CandidateStrategy, CoordinatesStrategy, FallbackStrategy, HealingStrategy, IdentityStrategy,
    StructuralStrategy,
};
use crate::types::{HealingResult, HealingStats, StrategyKind};

fn default_true() -> bool {
    true
}

/// Switches for the individual strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default = "default_true")]
    pub enable_identity: bool,
    #[serde(default = "default_true")]
    pub enable_candidate: bool,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    #[serde(default = "default_true")]
    pub enable_structural: bool,
    #[serde(default = "default_true")]
    pub enable_coordinates: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enable_identity: true,
            enable_candidate: true,
            enable_fallback: true,
            enable_structural: true,
            enable_coordinates: true,
        }
    }
}

/// Runs the strategy chain in priority order and keeps usage statistics.
///
/// The first strategy whose `find` reports success wins. Strategies that
/// cannot handle the step are skipped, and a strategy that errors is logged
/// and treated like a miss so later strategies still get their turn.
pub struct SelfHealingEngine {
    page: Arc<dyn PageDriver>,
    strategies: Vec<Arc<dyn HealingStrategy>>,
    stats: Mutex<HealingStats>,
}

impl SelfHealingEngine {
    /// Engine with all five strategies enabled.
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self::with_options(page, EngineOptions::default())
    }

    pub fn with_options(page: Arc<dyn PageDriver>, options: EngineOptions) -> Self {
        let mut strategies: Vec<Arc<dyn HealingStrategy>> = Vec::new();
        if options.enable_identity {
            strategies.push(Arc::new(IdentityStrategy::new(page.clone())));
        }
        if options.enable_candidate {
            strategies.push(Arc::new(CandidateStrategy::new(page.clone())));
        }
        if options.enable_fallback {
            strategies.push(Arc::new(FallbackStrategy::new(page.clone())));
        }
        if options.enable_structural {
            strategies.push(Arc::new(StructuralStrategy::new(page.clone())));
        }
        if options.enable_coordinates {
            strategies.push(Arc::new(CoordinatesStrategy::new(page.clone())));
        }
        Self::from_strategies(page, strategies)
    }

    /// Custom chain. Strategies are ordered by ascending priority; ties keep
    /// insertion order.
    pub fn from_strategies(
        page: Arc<dyn PageDriver>,
        mut strategies: Vec<Arc<dyn HealingStrategy>>,
    ) -> Self {
        strategies.sort_by_key(|strategy| strategy.priority());
        Self {
            page,
            strategies,
            stats: Mutex::new(HealingStats::default()),
        }
    }

    /// Resolves the step's target. Never errors: a chain with no winner
    /// yields a failed result without a strategy.
    pub async fn find_element(&self, step: &Step) -> HealingResult {
        self.stats.lock().record_attempt();
        debug!("resolving target for step {}", step.id);

        for strategy in &self.strategies {
            if !strategy.can_handle(step) {
                continue;
            }
            match strategy.find(step).await {
                Ok(result) if result.success => {
                    self.stats.lock().record_success(strategy.kind());
                    info!(
                        "step {} resolved by {} strategy: {}",
                        step.id,
                        strategy.name(),
                        result.selector.as_deref().unwrap_or("")
                    );
                    return result;
                }
                Ok(result) => {
                    debug!(
                        "{} strategy missed for step {}: {}",
                        strategy.name(),
                        step.id,
                        result.error.as_deref().unwrap_or("no match")
                    );
                }
                Err(err) => {
                    warn!(
                        "{} strategy errored for step {}: {}",
                        strategy.name(),
                        step.id,
                        err
                    );
                }
            }
        }

        warn!("all strategies failed for step {}", step.id);
        HealingResult::failed(None, "All strategies failed")
    }

    /// Counts a target the caller matched before running the chain.
    pub fn record_direct_hit(&self, kind: StrategyKind) {
        let mut stats = self.stats.lock();
        stats.record_attempt();
        stats.record_success(kind);
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> HealingStats {
        self.stats.lock().clone()
    }

    pub fn strategies(&self) -> &[Arc<dyn HealingStrategy>] {
        &self.strategies
    }

    pub fn page(&self) -> &Arc<dyn PageDriver> {
        &self.page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{FixtureElement, FixturePage};
    use replaybook_core_types::ActionType;

    #[test]
    fn test_options_filter_strategies() {
        let page: Arc<dyn PageDriver> = Arc::new(FixturePage::new("about:blank", vec![]));
        let engine = SelfHealingEngine::with_options(
            page,
            EngineOptions {
                enable_identity: false,
                enable_structural: false,
                ..Default::default()
            },
        );
        let kinds: Vec<StrategyKind> = engine.strategies().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::Candidate,
                StrategyKind::Fallback,
                StrategyKind::Coordinates
            ]
        );
    }

    #[test]
    fn test_options_default_from_empty_yaml() {
        let options: EngineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn test_stats_count_direct_hits_alongside_chain_misses() {
        tokio_test::block_on(async {
            let page: Arc<dyn PageDriver> = Arc::new(FixturePage::new(
                "about:blank",
                vec![FixtureElement::new("button").with_id("buy")],
            ));
            let engine = SelfHealingEngine::new(page);

            engine.record_direct_hit(StrategyKind::Candidate);
            let bare = Step::new("gone", ActionType::Click).with_selector("#gone");
            assert!(!engine.find_element(&bare).await.success);

            let stats = engine.stats();
            assert_eq!(stats.total, 2);
            assert_eq!(stats.by_strategy.get(&StrategyKind::Candidate), Some(&1));
            assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
        });
    }
}
