use std::sync::Arc;

use action_locator::{
    HealingResult, HealingStrategy, LocatorError, SelfHealingEngine, StrategyKind,
};
use action_primitives::{FixtureElement, FixturePage, PageDriver, Query};
use async_trait::async_trait;
use parking_lot::Mutex;
use replaybook_core_types::{
    ActionType, BoundingBox, ElementIdentity, SelectorCandidate, SelectorStrategy, SmartSelector,
    Step,
};

/// Records every invocation and answers with a fixed outcome.
struct SpyStrategy {
    kind: StrategyKind,
    outcome: Outcome,
    calls: Arc<Mutex<Vec<StrategyKind>>>,
}

#[derive(Clone, Copy)]
enum Outcome {
    Hit,
    Miss,
    Error,
    Skip,
}

#[async_trait]
impl HealingStrategy for SpyStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn can_handle(&self, _step: &Step) -> bool {
        !matches!(self.outcome, Outcome::Skip)
    }

    async fn find(&self, _step: &Step) -> Result<HealingResult, LocatorError> {
        self.calls.lock().push(self.kind);
        match self.outcome {
            Outcome::Hit => Ok(HealingResult::found_query(
                self.kind,
                Query::css(format!("#{}", self.kind)),
            )),
            Outcome::Miss | Outcome::Skip => Ok(HealingResult::failed(Some(self.kind), "miss")),
            Outcome::Error => Err(LocatorError::Internal("boom".into())),
        }
    }
}

fn spy_engine(
    outcomes: &[(StrategyKind, Outcome)],
) -> (SelfHealingEngine, Arc<Mutex<Vec<StrategyKind>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let strategies: Vec<Arc<dyn HealingStrategy>> = outcomes
        .iter()
        .map(|(kind, outcome)| {
            Arc::new(SpyStrategy {
                kind: *kind,
                outcome: *outcome,
                calls: calls.clone(),
            }) as Arc<dyn HealingStrategy>
        })
        .collect();
    let page: Arc<dyn PageDriver> = Arc::new(FixturePage::new("about:blank", vec![]));
    (SelfHealingEngine::from_strategies(page, strategies), calls)
}

#[tokio::test]
async fn test_strategies_run_in_priority_order_until_first_hit() {
    // Registered out of order on purpose.
    let (engine, calls) = spy_engine(&[
        (StrategyKind::Coordinates, Outcome::Hit),
        (StrategyKind::Fallback, Outcome::Hit),
        (StrategyKind::Identity, Outcome::Miss),
        (StrategyKind::Candidate, Outcome::Error),
    ]);

    let result = engine.find_element(&Step::new("s", ActionType::Click)).await;

    assert!(result.success);
    assert_eq!(result.strategy, Some(StrategyKind::Fallback));
    assert_eq!(
        *calls.lock(),
        vec![
            StrategyKind::Identity,
            StrategyKind::Candidate,
            StrategyKind::Fallback
        ]
    );
}

#[tokio::test]
async fn test_unhandled_strategies_are_not_invoked() {
    let (engine, calls) = spy_engine(&[
        (StrategyKind::Identity, Outcome::Skip),
        (StrategyKind::Structural, Outcome::Hit),
    ]);
    let result = engine.find_element(&Step::new("s", ActionType::Click)).await;
    assert_eq!(result.strategy, Some(StrategyKind::Structural));
    assert_eq!(*calls.lock(), vec![StrategyKind::Structural]);
}

#[tokio::test]
async fn test_stats_track_attempts_and_winners() {
    let (engine, _) = spy_engine(&[(StrategyKind::Candidate, Outcome::Hit)]);
    let step = Step::new("s", ActionType::Click);
    engine.find_element(&step).await;
    engine.find_element(&step).await;

    let (failing, _) = spy_engine(&[(StrategyKind::Candidate, Outcome::Miss)]);
    let result = failing.find_element(&step).await;
    assert!(!result.success);
    assert_eq!(result.strategy, None);
    assert_eq!(result.error.as_deref(), Some("All strategies failed"));

    let stats = engine.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_strategy.get(&StrategyKind::Candidate), Some(&2));
    assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);

    let stats = failing.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successes(), 0);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn test_fallback_heals_broken_primary() {
    let page = Arc::new(FixturePage::new(
        "https://shop.test",
        vec![FixtureElement::new("button")
            .with_attr("data-testid", "checkout")
            .with_text("Checkout")],
    ));
    let engine = SelfHealingEngine::new(page);
    let smart = SmartSelector::new(SelectorCandidate::new(
        SelectorStrategy::Css,
        "#checkout-btn-old",
        0.9,
    ))
    .with_fallback(SelectorCandidate::new(SelectorStrategy::Text, "Checkout", 0.4))
    .with_fallback(SelectorCandidate::new(SelectorStrategy::TestId, "checkout", 0.8));
    let step = Step::new("buy", ActionType::Click).with_smart_selector(smart);

    let result = engine.find_element(&step).await;

    assert!(result.success);
    assert_eq!(result.strategy, Some(StrategyKind::Fallback));
    assert_eq!(result.selector.as_deref(), Some("checkout"));
    let record = result.record.expect("healing record");
    assert_eq!(record.original_selector, "#checkout-btn-old");
    assert_eq!(record.healed_selector, "checkout");
    assert_eq!(record.strategy, SelectorStrategy::TestId);
    assert!(record.success);
}

#[tokio::test]
async fn test_coordinates_are_the_last_resort() {
    let bounds = BoundingBox::new(10.0, 10.0, 40.0, 20.0);
    let page = Arc::new(FixturePage::new(
        "https://shop.test",
        vec![FixtureElement::new("canvas").with_bounds(bounds)],
    ));
    let engine = SelfHealingEngine::new(page);
    let step = Step::new("draw", ActionType::Click)
        .with_smart_selector(
            SmartSelector::new(SelectorCandidate::new(SelectorStrategy::Css, "#gone", 0.9))
                .with_coordinates(bounds),
        )
        .with_identity(ElementIdentity {
            tag_name: "CANVAS".into(),
            id: Some("gone".into()),
            ..Default::default()
        });

    let result = engine.find_element(&step).await;

    assert!(result.success);
    assert_eq!(result.strategy, Some(StrategyKind::Coordinates));
    assert_eq!(result.selector.as_deref(), Some("coordinates(30, 20)"));
}

#[tokio::test]
async fn test_text_entry_skips_presentational_candidates() {
    let page = Arc::new(FixturePage::new(
        "https://shop.test",
        vec![
            FixtureElement::new("label").with_text("Email"),
            FixtureElement::new("input").with_attr("name", "email"),
        ],
    ));
    let engine = SelfHealingEngine::new(page);
    let smart = SmartSelector::new(SelectorCandidate::new(SelectorStrategy::Text, "Email", 0.9))
        .with_fallback(SelectorCandidate::new(
            SelectorStrategy::Css,
            "input[name=\"email\"]",
            0.5,
        ));
    let step = Step::new("email", ActionType::Type)
        .with_value("a@b.c")
        .with_smart_selector(smart);

    let result = engine.find_element(&step).await;

    assert_eq!(result.strategy, Some(StrategyKind::Fallback));
    assert_eq!(result.selector.as_deref(), Some("input[name=\"email\"]"));
}
