use std::sync::Arc;

use action_primitives::PageDriver;
use async_trait::async_trait;
use replaybook_core_types::{BoundingBox, Step};
use tracing::{debug, info};

use super::HealingStrategy;
use crate::errors::LocatorError;
use crate::types::{HealingResult, StrategyKind};

/// Last resort: whatever is rendered at the center of the recorded box.
pub struct CoordinatesStrategy {
    page: Arc<dyn PageDriver>,
}

/// Recorded box for the step, smart selector first, identity second.
pub fn coordinates_of(step: &Step) -> Option<BoundingBox> {
    step.smart_selector
        .as_ref()
        .and_then(|smart| smart.coordinates)
        .filter(BoundingBox::is_valid)
        .or_else(|| {
            step.identity
                .as_ref()
                .and_then(|identity| identity.bounding_box)
                .filter(BoundingBox::is_valid)
        })
}

impl CoordinatesStrategy {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }

    /// Clicks the box center directly, bypassing element lookup.
    pub async fn click_at_coordinates(&self, bounds: &BoundingBox) -> Result<(), LocatorError> {
        let (x, y) = bounds.center();
        info!("clicking at coordinates ({:.0}, {:.0})", x, y);
        self.page.click_at(x, y).await?;
        Ok(())
    }
}

#[async_trait]
impl HealingStrategy for CoordinatesStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Coordinates
    }

    fn can_handle(&self, step: &Step) -> bool {
        coordinates_of(step).is_some()
    }

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError> {
        let Some(bounds) = coordinates_of(step) else {
            return Ok(HealingResult::failed(
                Some(StrategyKind::Coordinates),
                "No coordinates available",
            ));
        };
        let (x, y) = bounds.center();

        match self.page.element_at_point(x, y).await? {
            Some(element) if element.visible => {
                debug!("element {} visible at ({}, {})", element.tag_name, x, y);
                Ok(HealingResult::found_at(StrategyKind::Coordinates, x, y))
            }
            _ => Ok(HealingResult::failed(
                Some(StrategyKind::Coordinates),
                "No element at coordinates",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_primitives::{FixtureElement, FixturePage, PageAction};
    use replaybook_core_types::{ActionType, ElementIdentity, SelectorCandidate, SelectorStrategy, SmartSelector};

    #[test]
    fn test_prefers_smart_selector_box() {
        let smart = SmartSelector::new(SelectorCandidate::new(SelectorStrategy::Css, "#a", 0.9))
            .with_coordinates(BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let step = Step::new("s", ActionType::Click)
            .with_smart_selector(smart)
            .with_identity(ElementIdentity {
                bounding_box: Some(BoundingBox::new(100.0, 100.0, 10.0, 10.0)),
                ..Default::default()
            });
        assert_eq!(coordinates_of(&step), Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_zero_sized_box_is_ignored() {
        let step = Step::new("s", ActionType::Click).with_identity(ElementIdentity {
            bounding_box: Some(BoundingBox::new(5.0, 5.0, 0.0, 0.0)),
            ..Default::default()
        });
        assert!(coordinates_of(&step).is_none());
    }

    #[tokio::test]
    async fn test_finds_visible_element_at_center() {
        let page = Arc::new(FixturePage::new(
            "https://example.test",
            vec![FixtureElement::new("button").with_bounds(BoundingBox::new(50.0, 20.0, 20.0, 10.0))],
        ));
        let strategy = CoordinatesStrategy::new(page.clone());
        let step = Step::new("s", ActionType::Click).with_identity(ElementIdentity {
            bounding_box: Some(BoundingBox::new(50.0, 20.0, 20.0, 10.0)),
            ..Default::default()
        });
        let result = strategy.find(&step).await.unwrap();
        assert!(result.success);
        assert_eq!(result.selector.as_deref(), Some("coordinates(60, 25)"));

        strategy
            .click_at_coordinates(&BoundingBox::new(50.0, 20.0, 20.0, 10.0))
            .await
            .unwrap();
        assert_eq!(page.actions(), vec![PageAction::ClickAt { x: 60.0, y: 25.0 }]);
    }
}
