//! Playbook and step definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::selector::{
    ElementIdentity, EnhancedFallbacks, SmartSelector, StructuralPosition, TextPatterns,
};

/// Immutable playbook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub metadata: PlaybookMetadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<Precondition>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_handlers: Vec<ErrorHandler>,
}

impl Playbook {
    pub fn new(metadata: PlaybookMetadata, steps: Vec<Step>) -> Self {
        Self {
            metadata,
            variables: BTreeMap::new(),
            preconditions: Vec::new(),
            steps,
            error_handlers: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, definition: VariableDefinition) -> Self {
        self.variables.insert(name.into(), definition);
        self
    }

    /// Counts every step including those nested under condition and loop steps.
    pub fn total_step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|step| 1 + step.children().map(|nested| count(nested)).sum::<usize>())
                .sum()
        }
        count(&self.steps)
    }

    /// Depth-first search across nested step lists.
    pub fn find_step(&self, id: &str) -> Option<&Step> {
        fn find<'a>(steps: &'a [Step], id: &str) -> Option<&'a Step> {
            for step in steps {
                if step.id == id {
                    return Some(step);
                }
                for nested in step.children() {
                    if let Some(found) = find(nested, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(&self.steps, id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybookMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(
        default,
        alias = "estimatedTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, alias = "startUrl", skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
}

impl PlaybookMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Date,
    Select,
    Boolean,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableType::String => "string",
            VariableType::Number => "number",
            VariableType::Date => "date",
            VariableType::Select => "select",
            VariableType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Select option, written either as a bare value or `{value, label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableOption {
    Value(String),
    Labeled { value: String, label: String },
}

impl VariableOption {
    pub fn value(&self) -> &str {
        match self {
            VariableOption::Value(value) => value,
            VariableOption::Labeled { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(alias = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(alias = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariableDefinition {
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<VariableOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<VariableValidation>,
}

impl VariableDefinition {
    pub fn new(var_type: VariableType, label: impl Into<String>) -> Self {
        Self {
            var_type,
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionAction {
    #[default]
    Warn,
    Block,
}

/// Check evaluated before a run begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    pub check: String,
    pub message: String,
    #[serde(default)]
    pub action: PreconditionAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    Retry,
    Skip,
    Abort,
    Guide,
}

/// Playbook-wide failure policy keyed on the error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandler {
    #[serde(rename = "match")]
    pub pattern: String,
    pub action: ErrorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Navigate,
    Click,
    Type,
    Select,
    Wait,
    Assert,
    Highlight,
    Guide,
    Condition,
    Loop,
    Extract,
    Validate,
    Scroll,
    Hover,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Navigate => "navigate",
            ActionType::Click => "click",
            ActionType::Type => "type",
            ActionType::Select => "select",
            ActionType::Wait => "wait",
            ActionType::Assert => "assert",
            ActionType::Highlight => "highlight",
            ActionType::Guide => "guide",
            ActionType::Condition => "condition",
            ActionType::Loop => "loop",
            ActionType::Extract => "extract",
            ActionType::Validate => "validate",
            ActionType::Scroll => "scroll",
            ActionType::Hover => "hover",
        }
    }

    /// Actions that act on a page element and must name one.
    pub fn requires_selector(&self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::Type
                | ActionType::Select
                | ActionType::Highlight
                | ActionType::Assert
                | ActionType::Extract
        )
    }

    pub fn is_text_entry(&self) -> bool {
        matches!(self, ActionType::Type | ActionType::Select)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, ActionType::Condition | ActionType::Loop)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitFor {
    Element,
    Navigation,
    Network,
    User,
    UserInput,
}

impl WaitFor {
    pub fn is_user(&self) -> bool {
        matches!(self, WaitFor::User | WaitFor::UserInput)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Retry,
    Skip,
    Abort,
}

/// Completion check attached to a step that waits for the user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepVerify {
    #[serde(alias = "successSelector", skip_serializing_if = "Option::is_none")]
    pub success_selector: Option<String>,
    #[serde(alias = "successUrlContains", skip_serializing_if = "Option::is_none")]
    pub success_url_contains: Option<String>,
    #[serde(alias = "successText", skip_serializing_if = "Option::is_none")]
    pub success_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(alias = "fallbackVision", skip_serializing_if = "Option::is_none")]
    pub fallback_vision: Option<bool>,
}

impl StepVerify {
    /// Individual selectors of a comma separated `success_selector`.
    pub fn success_selectors(&self) -> Vec<&str> {
        self.success_selector
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_structural_checks(&self) -> bool {
        self.success_selector.is_some()
            || self.success_url_contains.is_some()
            || self.success_text.is_some()
    }

    pub fn perceptual_allowed(&self) -> bool {
        self.fallback_vision != Some(false)
    }
}

/// One action unit of a playbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitFor>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, alias = "waitAfter", skip_serializing_if = "Option::is_none")]
    pub wait_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Vec<Step>>,
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_steps: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<StepVerify>,
    #[serde(default, alias = "smartSelector", skip_serializing_if = "Option::is_none")]
    pub smart_selector: Option<SmartSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ElementIdentity>,
    #[serde(
        default,
        alias = "enhancedFallbacks",
        skip_serializing_if = "Option::is_none"
    )]
    pub enhanced_fallbacks: Option<EnhancedFallbacks>,
    #[serde(default, alias = "textPatterns", skip_serializing_if = "Option::is_none")]
    pub text_patterns: Option<TextPatterns>,
    #[serde(
        default,
        alias = "structuralPosition",
        skip_serializing_if = "Option::is_none"
    )]
    pub structural_position: Option<StructuralPosition>,
}

impl Step {
    pub fn new(id: impl Into<String>, action: ActionType) -> Self {
        Self {
            id: id.into(),
            action,
            selector: None,
            value: None,
            message: None,
            variable: None,
            wait_for: None,
            timeout: None,
            optional: false,
            wait_after: None,
            condition: None,
            on_error: None,
            then: None,
            else_steps: None,
            steps: None,
            verify: None,
            smart_selector: None,
            identity: None,
            enhanced_fallbacks: None,
            text_patterns: None,
            structural_position: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn with_wait_for(mut self, wait_for: WaitFor) -> Self {
        self.wait_for = Some(wait_for);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn with_then(mut self, steps: Vec<Step>) -> Self {
        self.then = Some(steps);
        self
    }

    pub fn with_else(mut self, steps: Vec<Step>) -> Self {
        self.else_steps = Some(steps);
        self
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_verify(mut self, verify: StepVerify) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn with_smart_selector(mut self, smart: SmartSelector) -> Self {
        self.smart_selector = Some(smart);
        self
    }

    pub fn with_identity(mut self, identity: ElementIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn waits_for_user(&self) -> bool {
        self.wait_for.map(|w| w.is_user()).unwrap_or(false)
    }

    /// True when the step carries anything a locator strategy can use.
    pub fn has_target(&self) -> bool {
        self.selector.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
            || self.smart_selector.is_some()
            || self.identity.is_some()
    }

    /// Nested step lists in `then`, `else`, `steps` order.
    pub fn children(&self) -> impl Iterator<Item = &Vec<Step>> {
        [&self.then, &self.else_steps, &self.steps]
            .into_iter()
            .filter_map(|list| list.as_ref())
    }
}

/// Accepts YAML/JSON scalars for string fields so `value: 42` reads as `"42"`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a scalar value, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_yaml_shape() {
        let yaml = r##"
id: s1
action: type
selector: "input[name=q]"
value: 42
wait_for: user_input
on_error: skip
smartSelector:
  primary: { strategy: css, value: "#q", confidence: 0.9 }
  fallbacks:
    - { strategy: testId, value: search, confidence: 0.7 }
"##;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.action, ActionType::Type);
        assert_eq!(step.value.as_deref(), Some("42"));
        assert!(step.waits_for_user());
        assert_eq!(step.on_error, Some(OnError::Skip));
        let smart = step.smart_selector.unwrap();
        assert_eq!(smart.fallbacks.len(), 1);
    }

    #[test]
    fn test_nested_counts_and_lookup() {
        let playbook = Playbook::new(
            PlaybookMetadata::new("p", "P", "1.0"),
            vec![
                Step::new("a", ActionType::Click).with_selector("#a"),
                Step::new("b", ActionType::Condition)
                    .with_condition("true")
                    .with_then(vec![Step::new("c", ActionType::Guide)])
                    .with_else(vec![Step::new("d", ActionType::Guide)]),
            ],
        );
        assert_eq!(playbook.total_step_count(), 4);
        assert_eq!(playbook.find_step("d").map(|s| s.action), Some(ActionType::Guide));
        assert!(playbook.find_step("zzz").is_none());
    }

    #[test]
    fn test_success_selectors_split() {
        let verify = StepVerify {
            success_selector: Some(".done, #ok ,".into()),
            ..Default::default()
        };
        assert_eq!(verify.success_selectors(), vec![".done", "#ok"]);
        assert!(verify.perceptual_allowed());
    }

    #[test]
    fn test_variable_option_forms() {
        let def: VariableDefinition = serde_json::from_value(serde_json::json!({
            "type": "select",
            "label": "Region",
            "options": ["north", {"value": "south", "label": "South"}]
        }))
        .unwrap();
        let values: Vec<&str> = def.options.iter().map(|o| o.value()).collect();
        assert_eq!(values, vec!["north", "south"]);
    }
}
