//! Element resolution strategies
//!
//! Five independent strategies in chain order:
//! 1. Identity - accessibility and attribute identity
//! 2. Candidate - the recorded primary selector
//! 3. Fallback - ranked recorded fallback selectors
//! 4. Structural - enhanced fallback bundles and structural position
//! 5. Coordinates - element rendered at the recorded box center

mod candidate;
mod coordinates;
mod fallback;
mod identity;
mod structural;

pub use candidate::*;
pub use coordinates::*;
pub use fallback::*;
pub use identity::*;
pub use structural::*;

use action_primitives::{PageDriver, Query};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use replaybook_core_types::{SelectorCandidate, SelectorStrategy, Step};
use tracing::debug;

use crate::errors::LocatorError;
use crate::types::{HealingResult, StrategyKind};

static ROLE_WITH_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(\w+)\[name="(.+)"\]$"#).expect("static role regex"));

/// One link in the resolution chain.
#[async_trait]
pub trait HealingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Ascending priority runs first
    fn priority(&self) -> u8 {
        self.kind().priority()
    }

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Cheap shape check: does the step carry what this strategy consumes?
    fn can_handle(&self, step: &Step) -> bool;

    async fn find(&self, step: &Step) -> Result<HealingResult, LocatorError>;
}

/// Maps a recorded candidate onto a driver query by its declared strategy.
pub fn candidate_query(candidate: &SelectorCandidate) -> Query {
    let value = candidate.value.as_str();
    match candidate.strategy {
        SelectorStrategy::Css => Query::css(value),
        SelectorStrategy::Xpath => Query::XPath {
            path: value.to_string(),
        },
        SelectorStrategy::Text => {
            if value.contains(":has-text(") || value.contains(":text(") {
                Query::css(value)
            } else {
                Query::text(value)
            }
        }
        SelectorStrategy::Role => {
            if value.starts_with("[role=") {
                return Query::css(value);
            }
            match ROLE_WITH_NAME.captures(value) {
                Some(caps) => Query::role(&caps[1], Some(caps[2].to_string())),
                None => Query::role(value, None),
            }
        }
        SelectorStrategy::TestId => Query::TestId {
            id: value.to_string(),
        },
        SelectorStrategy::Placeholder => Query::Placeholder {
            text: value.to_string(),
        },
        SelectorStrategy::Label => {
            if value.contains("[aria-label") {
                Query::css(value)
            } else {
                Query::Label {
                    text: value.to_string(),
                }
            }
        }
    }
}

/// First match is a native form control or a contenteditable host.
/// Driver errors read as "not editable".
pub(crate) async fn is_editable(page: &dyn PageDriver, query: &Query) -> bool {
    match page.locate(query).await {
        Ok(Some(snapshot)) => snapshot.is_editable(),
        Ok(None) => false,
        Err(err) => {
            debug!("editable probe failed for {}: {}", query, err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_query_mapping() {
        let role = SelectorCandidate::new(SelectorStrategy::Role, "button[name=\"Save\"]", 0.9);
        assert_eq!(
            candidate_query(&role),
            Query::role("button", Some("Save".into()))
        );
        let bare_role = SelectorCandidate::new(SelectorStrategy::Role, "[role=tab]", 0.5);
        assert_eq!(candidate_query(&bare_role), Query::css("[role=tab]"));
        let text = SelectorCandidate::new(SelectorStrategy::Text, "a:has-text(\"Next\")", 0.5);
        assert_eq!(candidate_query(&text), Query::css("a:has-text(\"Next\")"));
        let label = SelectorCandidate::new(SelectorStrategy::Label, "Email", 0.5);
        assert_eq!(
            candidate_query(&label),
            Query::Label {
                text: "Email".into()
            }
        );
    }
}
