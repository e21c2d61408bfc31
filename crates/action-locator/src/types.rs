//! Core types for element healing

use std::collections::BTreeMap;
use std::fmt;

use action_primitives::Query;
use replaybook_core_types::SelectorStrategy;
use serde::{Deserialize, Serialize};

/// Resolution strategy identifiers, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Accessibility and attribute identity matching
    Identity,
    /// The recorded primary candidate, used as-is
    Candidate,
    /// Ranked fallback candidates
    Fallback,
    /// Enhanced fallback bundles and structural position
    Structural,
    /// Point lookup at the recorded bounding box center
    Coordinates,
}

impl StrategyKind {
    /// Get strategy name
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Identity => "identity",
            StrategyKind::Candidate => "candidate",
            StrategyKind::Fallback => "fallback",
            StrategyKind::Structural => "structural",
            StrategyKind::Coordinates => "coordinates",
        }
    }

    /// Lower runs first
    pub fn priority(&self) -> u8 {
        match self {
            StrategyKind::Identity => 1,
            StrategyKind::Candidate => 2,
            StrategyKind::Fallback => 3,
            StrategyKind::Structural => 4,
            StrategyKind::Coordinates => 5,
        }
    }

    pub fn all() -> [StrategyKind; 5] {
        [
            StrategyKind::Identity,
            StrategyKind::Candidate,
            StrategyKind::Fallback,
            StrategyKind::Structural,
            StrategyKind::Coordinates,
        ]
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Audit entry written when a fallback candidate replaces the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingRecord {
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub original_selector: String,
    pub healed_selector: String,
    pub strategy: SelectorStrategy,
    pub success: bool,
}

/// What the executor should act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedTarget {
    Element { query: Query },
    Point { x: f64, y: f64 },
}

/// Outcome of a single strategy or of the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    /// `None` when the whole chain failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ResolvedTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<HealingRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealingResult {
    /// Successful match on an element query. `selector` is the display form.
    pub fn found(strategy: StrategyKind, selector: impl Into<String>, query: Query) -> Self {
        Self {
            success: true,
            strategy: Some(strategy),
            selector: Some(selector.into()),
            target: Some(ResolvedTarget::Element { query }),
            record: None,
            error: None,
        }
    }

    pub fn found_query(strategy: StrategyKind, query: Query) -> Self {
        let selector = query.to_selector();
        Self::found(strategy, selector, query)
    }

    pub fn found_at(strategy: StrategyKind, x: f64, y: f64) -> Self {
        Self {
            success: true,
            strategy: Some(strategy),
            selector: Some(format!("coordinates({}, {})", x.round(), y.round())),
            target: Some(ResolvedTarget::Point { x, y }),
            record: None,
            error: None,
        }
    }

    pub fn failed(strategy: Option<StrategyKind>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy,
            selector: None,
            target: None,
            record: None,
            error: Some(error.into()),
        }
    }

    pub fn with_record(mut self, record: HealingRecord) -> Self {
        self.record = Some(record);
        self
    }

    /// Anything other than the still-valid recorded primary counts as healing.
    pub fn is_healed(&self) -> bool {
        self.success && self.strategy != Some(StrategyKind::Candidate)
    }
}

/// Running counters owned by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingStats {
    pub total: u64,
    pub by_strategy: BTreeMap<StrategyKind, u64>,
    /// Percentage in `[0, 100]`
    pub success_rate: f64,
}

impl HealingStats {
    pub fn successes(&self) -> u64 {
        self.by_strategy.values().sum()
    }

    pub(crate) fn record_attempt(&mut self) {
        self.total += 1;
        self.recompute();
    }

    pub(crate) fn record_success(&mut self, strategy: StrategyKind) {
        *self.by_strategy.entry(strategy).or_insert(0) += 1;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.success_rate = if self.total == 0 {
            0.0
        } else {
            (self.successes() as f64 / self.total as f64) * 100.0
        };
    }
}
