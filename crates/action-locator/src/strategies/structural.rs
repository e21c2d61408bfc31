use std::sync::Arc;

use action_primitives::{escape_quotes, PageDriver, Query};
use async_trait::async_trait;
use replaybook_core_types::{StructuralPosition, Step, TextPatterns};
use tracing::{debug, info};

use super::{is_editable, HealingStrategy};
use crate::errors::LocatorError;
use crate::types::{HealingResult, StrategyKind};

/// Consumes the enhanced fallback bundles, text pattern variations and the
/// recorded structural position.
pub struct StructuralStrategy {
    page: Arc<dyn PageDriver>,
}

impl StructuralStrategy {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }

    /// At least one match. Driver errors count as a miss.
    async fn try_query(&self, query: &Query) -> bool {
        match self.page.count(query).await {
            Ok(0) => false,
            Ok(1) => true,
            Ok(n) => {
                debug!("structural query matched {} elements: {}", n, query);
                true
            }
            Err(err) => {
                debug!("structural query {} failed: {}", query, err);
                false
            }
        }
    }

    async fn try_editable(&self, query: &Query, text_entry: bool) -> bool {
        self.try_query(query).await
            && (!text_entry || is_editable(self.page.as_ref(), query).await)
    }

    async fn try_text_patterns(&self, patterns: &TextPatterns, tag: &str) -> Option<Query> {
        let mut texts: Vec<&str> = Vec::new();
        if !patterns.normalized.trim().is_empty() {
            texts.push(patterns.normalized.as_str());
        }
        texts.extend(patterns.variations.iter().map(|v| v.value.as_str()));
        texts.extend(
            patterns
                .keywords
                .iter()
                .map(String::as_str)
                .filter(|k| k.chars().count() >= 2),
        );

        for text in texts {
            let query = Query::has_text(tag, text);
            if self.try_query(&query).await {
                info!("text pattern match: {}", text);
                return Some(query);
            }
        }
        None
    }

    async fn try_position(
        &self,
        position: &StructuralPosition,
        tag: &str,
        text_entry: bool,
    ) -> Option<Query> {
        if text_entry {
            if let Some(idx) = position.form_element_index {
                let query = Query::css(format!(
                    "form input:nth-of-type({idx}), form textarea:nth-of-type({idx}), form select:nth-of-type({idx})"
                ));
                if self.try_editable(&query, true).await {
                    return Some(query);
                }
            }
        }

        for parent in position.parent_chain.iter().filter(|p| p.is_anchor()) {
            let query = Query::css(format!(
                "{} >> {}:nth-of-type({})",
                parent.selector, tag, position.nth_of_type
            ));
            if self.try_editable(&query, text_entry).await {
                return Some(query);
            }
        }

        if let Some(prev_text) = position.sibling_info.prev_sibling_text.as_deref() {
            let escaped = escape_quotes(prev_text);
            let adjacent = Query::css(format!("*:has-text(\"{}\") + {}", escaped, tag));
            if self.try_query(&adjacent).await {
                if !text_entry || is_editable(self.page.as_ref(), &adjacent).await {
                    return Some(adjacent);
                }
                let following = Query::css(format!(
                    "*:has-text(\"{0}\") ~ input, *:has-text(\"{0}\") ~ textarea",
                    escaped
                ));
                if self.try_query(&following).await {
                    return Some(following);
                }
            }
        }

        None
    }
}

#[async_trait]
impl HealingStrategy for StructuralStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Structural
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.enhanced_fallbacks.is_some()
            || step.structural_position.is_some()
            || step.text_patterns.is_some()
    }

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError> {
        let text_entry = step.action.is_text_entry();
        let recorded_tag = step
            .identity
            .as_ref()
            .map(|identity| identity.tag_name.to_ascii_lowercase())
            .unwrap_or_default();

        if let Some(fallbacks) = &step.enhanced_fallbacks {
            if !text_entry {
                for text_selector in &fallbacks.text_selectors {
                    let query = Query::css(&text_selector.selector);
                    if self.try_query(&query).await {
                        return Ok(HealingResult::found_query(StrategyKind::Structural, query));
                    }
                }
            }
            for parent in &fallbacks.parent_chain_selectors {
                let query = Query::css(&parent.full_selector);
                if self.try_editable(&query, text_entry).await {
                    return Ok(HealingResult::found_query(StrategyKind::Structural, query));
                }
            }
            for label in &fallbacks.nearby_label_selectors {
                let query = Query::css(&label.target_selector);
                if self.try_editable(&query, text_entry).await {
                    return Ok(HealingResult::found_query(StrategyKind::Structural, query));
                }
            }
        }

        if !text_entry {
            if let Some(patterns) = &step.text_patterns {
                let tag = if recorded_tag.is_empty() {
                    "button"
                } else {
                    recorded_tag.as_str()
                };
                if let Some(query) = self.try_text_patterns(patterns, tag).await {
                    return Ok(HealingResult::found_query(StrategyKind::Structural, query));
                }
            }
        }

        if let Some(position) = &step.structural_position {
            let tag = if recorded_tag.is_empty() {
                "*"
            } else {
                recorded_tag.as_str()
            };
            if let Some(query) = self.try_position(position, tag, text_entry).await {
                return Ok(HealingResult::found_query(StrategyKind::Structural, query));
            }
        }

        Ok(HealingResult::failed(
            Some(StrategyKind::Structural),
            "All enhanced fallbacks failed",
        ))
    }
}
