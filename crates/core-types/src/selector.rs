//! Resolution metadata captured at record time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Query family a recorded candidate selector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectorStrategy {
    Css,
    Xpath,
    Text,
    Role,
    TestId,
    Placeholder,
    Label,
}

impl SelectorStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SelectorStrategy::Css => "css",
            SelectorStrategy::Xpath => "xpath",
            SelectorStrategy::Text => "text",
            SelectorStrategy::Role => "role",
            SelectorStrategy::TestId => "testId",
            SelectorStrategy::Placeholder => "placeholder",
            SelectorStrategy::Label => "label",
        }
    }

    /// Role, text and label queries describe what a user sees, which is an
    /// unreliable proxy for a text-entry target.
    pub fn is_presentational(&self) -> bool {
        matches!(
            self,
            SelectorStrategy::Role | SelectorStrategy::Text | SelectorStrategy::Label
        )
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded selector with the recorder's confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub strategy: SelectorStrategy,
    pub value: String,
    #[serde(default)]
    pub confidence: f64,
}

impl SelectorCandidate {
    pub fn new(strategy: SelectorStrategy, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            strategy,
            value: value.into(),
            confidence,
        }
    }
}

/// Axis-aligned box in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Positive size and a non-negative origin.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.x >= 0.0 && self.y >= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }
}

/// Primary candidate plus ranked fallbacks, produced by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSelector {
    pub primary: SelectorCandidate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<SelectorCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_hash: Option<String>,
}

impl SmartSelector {
    pub fn new(primary: SelectorCandidate) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            coordinates: None,
            element_hash: None,
        }
    }

    pub fn with_fallback(mut self, candidate: SelectorCandidate) -> Self {
        self.fallbacks.push(candidate);
        self
    }

    pub fn with_coordinates(mut self, bbox: BoundingBox) -> Self {
        self.coordinates = Some(bbox);
        self
    }

    /// Fallbacks ordered by descending confidence. Ties keep recorded order.
    pub fn ranked_fallbacks(&self) -> Vec<&SelectorCandidate> {
        let mut ranked: Vec<&SelectorCandidate> = self.fallbacks.iter().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

/// Accessibility and attribute description of a target, independent of any
/// query syntax.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ax_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ax_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_test_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMatchType {
    Exact,
    Contains,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBasedSelector {
    #[serde(rename = "type")]
    pub match_type: TextMatchType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub selector: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentChainSelector {
    #[serde(default)]
    pub parent_selector: String,
    #[serde(default)]
    pub child_selector: String,
    pub full_selector: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelRelationship {
    For,
    Sibling,
    Preceding,
    Following,
    Parent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyLabelSelector {
    pub label_text: String,
    pub relationship: LabelRelationship,
    pub target_selector: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Selector bundles recorded alongside the smart selector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhancedFallbacks {
    pub text_selectors: Vec<TextBasedSelector>,
    pub parent_chain_selectors: Vec<ParentChainSelector>,
    pub nearby_label_selectors: Vec<NearbyLabelSelector>,
}

impl EnhancedFallbacks {
    pub fn is_empty(&self) -> bool {
        self.text_selectors.is_empty()
            && self.parent_chain_selectors.is_empty()
            && self.nearby_label_selectors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentInfo {
    pub tag_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub selector: String,
    pub is_landmark: bool,
    pub is_form: bool,
}

impl ParentInfo {
    /// Containers stable enough to anchor a positional query.
    pub fn is_anchor(&self) -> bool {
        !self.selector.is_empty() && (self.id.is_some() || self.is_landmark || self.is_form)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiblingInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_sibling_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sibling_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_sibling_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sibling_tag: Option<String>,
    pub total_siblings: u32,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuralPosition {
    pub parent_chain: Vec<ParentInfo>,
    pub sibling_info: SiblingInfo,
    pub nth_child: u32,
    pub nth_of_type: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_element_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariationKind {
    Korean,
    English,
    Mixed,
    Abbreviated,
}

/// Localized or abbreviated spelling of the recorded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextVariation {
    #[serde(rename = "type")]
    pub kind: VariationKind,
    pub value: String,
    #[serde(default)]
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextPatterns {
    pub original: String,
    pub normalized: String,
    pub variations: Vec<TextVariation>,
    pub regex_pattern: String,
    pub keywords: Vec<String>,
}
