//! Core data types for page automation

use std::collections::BTreeMap;
use std::fmt;

use replaybook_core_types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Structured description of a page target.
///
/// Drivers translate a query into their native locator. [`Query::to_selector`]
/// renders the Playwright-style string used in logs and healing records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    /// Raw CSS (or engine-specific) selector string
    Css { selector: String },
    XPath { path: String },
    /// Visible text, optionally restricted to a tag
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        text: String,
        #[serde(default)]
        exact: bool,
    },
    /// Accessibility role with an optional accessible name
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    AriaLabel { label: String },
    /// `tag[name="value"]`
    Attribute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        name: String,
        value: String,
    },
    TestId { id: String },
    Placeholder { text: String },
    Label { text: String },
    Id { id: String },
}

impl Query {
    pub fn css(selector: impl Into<String>) -> Self {
        Query::Css {
            selector: selector.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Query::Text {
            tag: None,
            text: text.into(),
            exact: false,
        }
    }

    pub fn has_text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Query::Text {
            tag: Some(tag.into()),
            text: text.into(),
            exact: false,
        }
    }

    pub fn role(role: impl Into<String>, name: Option<String>) -> Self {
        Query::Role {
            role: role.into(),
            name,
        }
    }

    pub fn attribute(tag: Option<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Attribute {
            tag,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn to_selector(&self) -> String {
        match self {
            Query::Css { selector } => selector.clone(),
            Query::XPath { path } => format!("xpath={}", path),
            Query::Text { tag: Some(tag), text, .. } => {
                format!("{}:has-text(\"{}\")", tag, escape_quotes(text))
            }
            Query::Text {
                tag: None,
                text,
                exact: true,
            } => format!("text=\"{}\"", escape_quotes(text)),
            Query::Text { tag: None, text, .. } => format!("text={}", text),
            Query::Role {
                role,
                name: Some(name),
            } => format!("role={}[name=\"{}\"]", role, escape_quotes(name)),
            Query::Role { role, name: None } => format!("role={}", role),
            Query::AriaLabel { label } => format!("[aria-label=\"{}\"]", escape_quotes(label)),
            Query::Attribute { tag, name, value } => format!(
                "{}[{}=\"{}\"]",
                tag.as_deref().unwrap_or(""),
                name,
                escape_quotes(value)
            ),
            Query::TestId { id } => format!("[data-testid=\"{}\"]", escape_quotes(id)),
            Query::Placeholder { text } => format!("[placeholder=\"{}\"]", escape_quotes(text)),
            Query::Label { text } => format!("label={}", text),
            Query::Id { id } => format!("#{}", id),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector())
    }
}

/// Escapes double quotes for embedding inside a quoted selector value.
pub fn escape_quotes(text: &str) -> String {
    text.replace('"', "\\\"")
}

/// Plain data describing one element, as returned by locate and point lookups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl ElementSnapshot {
    /// Native form controls and `contenteditable="true"` hosts.
    pub fn is_editable(&self) -> bool {
        let tag = self.tag_name.to_ascii_uppercase();
        tag == "INPUT"
            || tag == "TEXTAREA"
            || tag == "SELECT"
            || self
                .attributes
                .get("contenteditable")
                .map(|v| v == "true")
                .unwrap_or(false)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Page lifecycle milestones a wait step can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Side effect performed through a driver, recorded by [`FixturePage`](crate::FixturePage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageAction {
    Navigate { url: String },
    Click { selector: String },
    ClickAt { x: f64, y: f64 },
    Fill { selector: String, text: String },
    SelectOption { selector: String, value: String },
    Hover { selector: String },
    ScrollIntoView { selector: String },
    Evaluate { script: String },
}
