//! In-memory page driver backed by a declarative element list.
//!
//! A fixture document describes the elements of one or more pages. Queries are
//! matched structurally (role, attributes, text) and, for CSS, against a small
//! subset of selector syntax plus any raw selector strings an element lists in
//! `selectors`. Every side effect is recorded so callers can assert on it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use replaybook_core_types::BoundingBox;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::driver::PageDriver;
use crate::errors::ActionError;
use crate::types::{ElementSnapshot, LoadState, PageAction, Query};

static SIMPLE_CSS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\*|[a-zA-Z][a-zA-Z0-9-]*)?(?:#([A-Za-z0-9_:.\-]+))?(?:\[([A-Za-z0-9_:\-]+)(?:="((?:[^"\\]|\\.)*)")?\])?$"#,
    )
    .expect("static selector regex")
});

static HAS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\*|[a-zA-Z][a-zA-Z0-9-]*):has-text\("((?:[^"\\]|\\.)*)"\)$"#)
        .expect("static has-text regex")
});

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureElement {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Accessible name; defaults to aria-label, then text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Texts of `<label>` elements associated with this control
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Raw selector strings this element answers to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    /// Clicking navigates here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl FixtureElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            role: None,
            name: None,
            text: None,
            attributes: BTreeMap::new(),
            labels: Vec::new(),
            selectors: Vec::new(),
            visible: true,
            bounds: None,
            href: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>, name: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self.name = Some(name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    fn attr(&self, name: &str) -> Option<&str> {
        match name {
            "id" => self.id.as_deref(),
            "role" => self.role.as_deref(),
            _ => self.attributes.get(name).map(String::as_str),
        }
    }

    fn accessible_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.attributes.get("aria-label").map(String::as_str))
            .or(self.text.as_deref())
    }

    fn tag_matches(&self, tag: &str) -> bool {
        tag.is_empty() || tag == "*" || self.tag.eq_ignore_ascii_case(tag)
    }

    fn text_contains(&self, needle: &str) -> bool {
        self.text
            .as_deref()
            .map(|text| contains_ci(text, needle))
            .unwrap_or(false)
    }

    fn snapshot(&self) -> ElementSnapshot {
        let mut attributes = self.attributes.clone();
        if let Some(id) = &self.id {
            attributes.insert("id".into(), id.clone());
        }
        if let Some(role) = &self.role {
            attributes.insert("role".into(), role.clone());
        }
        ElementSnapshot {
            tag_name: self.tag.to_ascii_uppercase(),
            text: self.text.clone(),
            attributes,
            visible: self.visible,
            bounding_box: self.bounds,
        }
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::Css { selector } => split_selector_list(selector)
                .iter()
                .any(|part| self.matches_css(part)),
            Query::XPath { path } => self.selectors.iter().any(|s| s == path),
            Query::Text { tag, text, exact } => {
                if !self.tag_matches(tag.as_deref().unwrap_or("*")) {
                    return false;
                }
                if *exact {
                    self.text.as_deref().map(str::trim) == Some(text.trim())
                } else {
                    self.text_contains(text)
                }
            }
            Query::Role { role, name } => {
                let role_ok = self
                    .role
                    .as_deref()
                    .map(|r| r.eq_ignore_ascii_case(role))
                    .unwrap_or(false);
                role_ok
                    && name
                        .as_deref()
                        .map(|wanted| {
                            self.accessible_name()
                                .map(|actual| actual.trim().eq_ignore_ascii_case(wanted.trim()))
                                .unwrap_or(false)
                        })
                        .unwrap_or(true)
            }
            Query::AriaLabel { label } => self.attr("aria-label") == Some(label.as_str()),
            Query::Attribute { tag, name, value } => {
                self.tag_matches(tag.as_deref().unwrap_or("*"))
                    && self.attr(name) == Some(value.as_str())
            }
            Query::TestId { id } => self.attr("data-testid") == Some(id.as_str()),
            Query::Placeholder { text } => self
                .attr("placeholder")
                .map(|p| contains_ci(p, text))
                .unwrap_or(false),
            Query::Label { text } => {
                self.labels.iter().any(|label| contains_ci(label, text))
                    || self
                        .attr("aria-label")
                        .map(|l| contains_ci(l, text))
                        .unwrap_or(false)
            }
            Query::Id { id } => self.id.as_deref() == Some(id.as_str()),
        }
    }

    fn matches_css(&self, selector: &str) -> bool {
        if self.selectors.iter().any(|s| s == selector) {
            return true;
        }
        if let Some(caps) = HAS_TEXT.captures(selector) {
            let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("*");
            let text = caps.get(2).map(|m| unescape(m.as_str())).unwrap_or_default();
            return self.tag_matches(tag) && self.text_contains(&text);
        }
        if let Some(caps) = SIMPLE_CSS.captures(selector) {
            if selector.is_empty() {
                return false;
            }
            if let Some(tag) = caps.get(1) {
                if !self.tag_matches(tag.as_str()) {
                    return false;
                }
            }
            if let Some(id) = caps.get(2) {
                if self.id.as_deref() != Some(id.as_str()) {
                    return false;
                }
            }
            if let Some(attr) = caps.get(3) {
                let actual = self.attr(attr.as_str());
                return match caps.get(4) {
                    Some(value) => actual == Some(unescape(value.as_str()).as_str()),
                    None => actual.is_some(),
                };
            }
            return true;
        }
        false
    }
}

/// Serializable description of the pages a [`FixturePage`] serves.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FixtureDocument {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub elements: Vec<FixtureElement>,
    /// Element sets swapped in when navigating to the keyed URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pages: BTreeMap<String, Vec<FixtureElement>>,
    /// Canned results for `evaluate`, keyed by script text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evaluations: BTreeMap<String, Value>,
}

struct FixtureState {
    url: String,
    elements: Vec<FixtureElement>,
    pages: BTreeMap<String, Vec<FixtureElement>>,
    evaluations: BTreeMap<String, Value>,
    actions: Vec<PageAction>,
}

pub struct FixturePage {
    state: Mutex<FixtureState>,
}

impl FixturePage {
    pub fn new(url: impl Into<String>, elements: Vec<FixtureElement>) -> Self {
        Self::from_document(FixtureDocument {
            url: url.into(),
            elements,
            ..Default::default()
        })
    }

    pub fn from_document(document: FixtureDocument) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                url: document.url,
                elements: document.elements,
                pages: document.pages,
                evaluations: document.evaluations,
                actions: Vec::new(),
            }),
        }
    }

    /// Loads a JSON or YAML fixture, chosen by file extension.
    pub fn from_path(path: &Path) -> Result<Self, ActionError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ActionError::Internal(format!("{}: {}", path.display(), err)))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let document: FixtureDocument = if is_json {
            serde_json::from_str(&raw).map_err(|err| ActionError::Internal(err.to_string()))?
        } else {
            serde_yaml::from_str(&raw).map_err(|err| ActionError::Internal(err.to_string()))?
        };
        Ok(Self::from_document(document))
    }

    /// Adds an element to the current page.
    pub fn insert(&self, element: FixtureElement) {
        self.state.lock().elements.push(element);
    }

    /// Removes every element of the current page matching the query.
    pub fn remove(&self, query: &Query) -> usize {
        let mut state = self.state.lock();
        let before = state.elements.len();
        state.elements.retain(|el| !el.matches(query));
        before - state.elements.len()
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.state.lock().actions.clone()
    }

    /// Current `value` attribute of the first match.
    pub fn value_of(&self, query: &Query) -> Option<String> {
        let state = self.state.lock();
        state
            .elements
            .iter()
            .find(|el| el.matches(query))
            .and_then(|el| el.attributes.get("value").cloned())
    }

    fn record(state: &mut FixtureState, action: PageAction) {
        debug!(?action, "fixture page action");
        state.actions.push(action);
    }

    fn switch_to(state: &mut FixtureState, url: &str) {
        state.url = url.to_string();
        if let Some(elements) = state.pages.get(url) {
            state.elements = elements.clone();
        }
    }

    fn first_index(state: &FixtureState, query: &Query) -> Result<usize, ActionError> {
        state
            .elements
            .iter()
            .position(|el| el.matches(query))
            .ok_or_else(|| ActionError::ElementNotFound(query.to_selector()))
    }
}

#[async_trait]
impl PageDriver for FixturePage {
    async fn url(&self) -> Result<String, ActionError> {
        Ok(self.state.lock().url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        Self::switch_to(&mut state, url);
        Self::record(
            &mut state,
            PageAction::Navigate {
                url: url.to_string(),
            },
        );
        Ok(())
    }

    async fn count(&self, query: &Query) -> Result<usize, ActionError> {
        let state = self.state.lock();
        Ok(state.elements.iter().filter(|el| el.matches(query)).count())
    }

    async fn wait_visible(&self, query: &Query, _timeout: Duration) -> Result<bool, ActionError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .iter()
            .any(|el| el.visible && el.matches(query)))
    }

    async fn locate(&self, query: &Query) -> Result<Option<ElementSnapshot>, ActionError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .iter()
            .find(|el| el.matches(query))
            .map(FixtureElement::snapshot))
    }

    async fn element_at_point(
        &self,
        x: f64,
        y: f64,
    ) -> Result<Option<ElementSnapshot>, ActionError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .iter()
            .rev()
            .find(|el| el.bounds.map(|b| b.contains(x, y)).unwrap_or(false))
            .map(FixtureElement::snapshot))
    }

    async fn click(&self, query: &Query) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        let index = Self::first_index(&state, query)?;
        let element = &state.elements[index];
        if !element.visible {
            return Err(ActionError::NotClickable(query.to_selector()));
        }
        let href = element.href.clone();
        Self::record(
            &mut state,
            PageAction::Click {
                selector: query.to_selector(),
            },
        );
        if let Some(href) = href {
            Self::switch_to(&mut state, &href);
        }
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        Self::record(&mut state, PageAction::ClickAt { x, y });
        Ok(())
    }

    async fn fill(&self, query: &Query, text: &str) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        let index = Self::first_index(&state, query)?;
        if !state.elements[index].snapshot().is_editable() {
            return Err(ActionError::NotEditable(query.to_selector()));
        }
        state.elements[index]
            .attributes
            .insert("value".into(), text.to_string());
        Self::record(
            &mut state,
            PageAction::Fill {
                selector: query.to_selector(),
                text: text.to_string(),
            },
        );
        Ok(())
    }

    async fn select_option(&self, query: &Query, value: &str) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        let index = Self::first_index(&state, query)?;
        let element = &state.elements[index];
        if !element.tag.eq_ignore_ascii_case("select") {
            return Err(ActionError::NotEditable(query.to_selector()));
        }
        if let Some(options) = element.attributes.get("options") {
            if !options.split(',').any(|option| option.trim() == value) {
                return Err(ActionError::OptionNotFound(value.to_string()));
            }
        }
        state.elements[index]
            .attributes
            .insert("value".into(), value.to_string());
        Self::record(
            &mut state,
            PageAction::SelectOption {
                selector: query.to_selector(),
                value: value.to_string(),
            },
        );
        Ok(())
    }

    async fn hover(&self, query: &Query) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        Self::first_index(&state, query)?;
        Self::record(
            &mut state,
            PageAction::Hover {
                selector: query.to_selector(),
            },
        );
        Ok(())
    }

    async fn scroll_into_view(&self, query: &Query) -> Result<(), ActionError> {
        let mut state = self.state.lock();
        Self::first_index(&state, query)?;
        Self::record(
            &mut state,
            PageAction::ScrollIntoView {
                selector: query.to_selector(),
            },
        );
        Ok(())
    }

    async fn wait_for_load(&self, _state: LoadState, _timeout: Duration) -> Result<(), ActionError> {
        Ok(())
    }

    async fn evaluate(&self, script: &str, _arg: Value) -> Result<Value, ActionError> {
        let mut state = self.state.lock();
        let result = state.evaluations.get(script).cloned().unwrap_or(Value::Null);
        Self::record(
            &mut state,
            PageAction::Evaluate {
                script: script.to_string(),
            },
        );
        Ok(result)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, ActionError> {
        let state = self.state.lock();
        let visible: Vec<ElementSnapshot> = state
            .elements
            .iter()
            .filter(|el| el.visible)
            .map(FixtureElement::snapshot)
            .collect();
        serde_json::to_vec(&serde_json::json!({ "url": state.url, "elements": visible }))
            .map_err(|err| ActionError::Internal(err.to_string()))
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn unescape(raw: &str) -> String {
    raw.replace("\\\"", "\"")
}

/// Splits a selector list on top-level commas, ignoring commas inside quotes,
/// brackets and parentheses.
fn split_selector_list(selector: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in selector.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                current.push(ch);
            }
            '"' | '\'' if quote == Some(ch) => {
                quote = None;
                current.push(ch);
            }
            '"' | '\'' if quote.is_none() => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' | '[' if quote.is_none() => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' if quote.is_none() => {
                depth -= 1;
                current.push(ch);
            }
            ',' if quote.is_none() && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}
