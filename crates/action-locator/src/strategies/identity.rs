use std::sync::Arc;

use action_primitives::{PageDriver, Query};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use replaybook_core_types::{ElementIdentity, Step};
use tracing::debug;

use super::{is_editable, HealingStrategy};
use crate::errors::LocatorError;
use crate::types::{HealingResult, StrategyKind};

/// Input types rare enough to identify a field on their own.
const UNIQUE_INPUT_TYPES: [&str; 5] = ["password", "email", "tel", "search", "file"];

/// Ids that look generated: long digit runs, React `:r1:` style, UUID fragments.
static GENERATED_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4,}|^:|[0-9a-fA-F]{8}-[0-9a-fA-F]{4}").expect("static id regex")
});

/// Matches the recorded [`ElementIdentity`] attribute by attribute, most
/// stable first, accepting only unique matches.
pub struct IdentityStrategy {
    page: Arc<dyn PageDriver>,
}

impl IdentityStrategy {
    pub fn new(page: Arc<dyn PageDriver>) -> Self {
        Self { page }
    }

    fn attempts(identity: &ElementIdentity, text_entry: bool) -> Vec<(&'static str, Query)> {
        let tag = identity.tag_name.to_ascii_lowercase();
        let mut attempts = Vec::new();

        if !text_entry {
            if let (Some(role), Some(name)) = (&identity.ax_role, &identity.ax_name) {
                attempts.push(("accessibility", Query::role(role, Some(name.clone()))));
            }
        }
        if let Some(label) = &identity.aria_label {
            attempts.push((
                "ariaLabel",
                Query::AriaLabel {
                    label: label.clone(),
                },
            ));
        }
        if let Some(name) = &identity.name {
            attempts.push(("name", Query::attribute(Some(tag.clone()), "name", name)));
        }
        if let Some(test_id) = &identity.data_test_id {
            attempts.push((
                "testId",
                Query::TestId {
                    id: test_id.clone(),
                },
            ));
        }
        if let Some(placeholder) = &identity.placeholder {
            attempts.push((
                "placeholder",
                Query::Placeholder {
                    text: placeholder.clone(),
                },
            ));
        }
        if let Some(input_type) = &identity.input_type {
            if tag == "input" && UNIQUE_INPUT_TYPES.contains(&input_type.as_str()) {
                attempts.push((
                    "inputType",
                    Query::attribute(Some("input".into()), "type", input_type),
                ));
            }
        }
        if let Some(id) = &identity.id {
            if is_stable_id(id) {
                attempts.push(("id", Query::Id { id: id.clone() }));
            }
        }
        if !text_entry {
            if let Some(text) = &identity.text_content {
                let text = text.trim();
                if text.chars().count() >= 2 {
                    let tag = if tag.is_empty() { "*".to_string() } else { tag };
                    attempts.push(("text", Query::has_text(tag, text)));
                }
            }
        }
        attempts
    }
}

/// Rejects ids that are likely regenerated between page loads.
pub fn is_stable_id(id: &str) -> bool {
    !id.trim().is_empty() && !GENERATED_ID.is_match(id)
}

#[async_trait]
impl HealingStrategy for IdentityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Identity
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.identity.is_some()
    }

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError> {
        let identity = step
            .identity
            .as_ref()
            .ok_or_else(|| LocatorError::InvalidStep("No identity in step".into()))?;
        let text_entry = step.action.is_text_entry();

        for (label, query) in Self::attempts(identity, text_entry) {
            let count = match self.page.count(&query).await {
                Ok(count) => count,
                Err(err) => {
                    debug!("identity {} query {} failed: {}", label, query, err);
                    continue;
                }
            };
            if count != 1 {
                debug!("identity {} matched {} elements: {}", label, count, query);
                continue;
            }
            if text_entry && !is_editable(self.page.as_ref(), &query).await {
                debug!("identity {} found a non-editable element, skipping", label);
                continue;
            }
            return Ok(HealingResult::found_query(StrategyKind::Identity, query));
        }

        Ok(HealingResult::failed(
            Some(StrategyKind::Identity),
            "All identity attributes failed",
        ))
    }
}
