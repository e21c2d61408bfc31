//! Playbook and variable validation

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use replaybook_core_types::{
    ActionType, Playbook, Step, VariableDefinition, VariableType, VariableValidation,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PlaybookError;
use crate::interpolator::stringify;
use crate::types::Variables;

/// One violation, addressed by a path such as `steps[2].then[0].selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors reject the document; warnings are only reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<ValidationIssue>, PlaybookError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(PlaybookError::Validation(self.errors))
        }
    }
}

/// Schema and semantic checks for a playbook document.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybookValidator;

impl PlaybookValidator {
    pub fn new() -> Self {
        Self
    }

    /// Collects every violation instead of stopping at the first.
    pub fn validate(&self, playbook: &Playbook) -> ValidationReport {
        let mut report = ValidationReport::default();
        let metadata = &playbook.metadata;
        for (field, value) in [
            ("id", &metadata.id),
            ("name", &metadata.name),
            ("version", &metadata.version),
        ] {
            if value.trim().is_empty() {
                report
                    .errors
                    .push(ValidationIssue::new(format!("metadata.{field}"), "must not be empty"));
            }
        }

        if playbook.steps.is_empty() {
            report
                .errors
                .push(ValidationIssue::new("steps", "playbook has no steps"));
        }

        for (name, definition) in &playbook.variables {
            if definition.var_type == VariableType::Select && definition.options.is_empty() {
                report.warnings.push(ValidationIssue::new(
                    format!("variables.{name}.options"),
                    "select variable has no options",
                ));
            }
            if let Some(pattern) = definition.validation.as_ref().and_then(|v| v.pattern.as_ref()) {
                if let Err(err) = Regex::new(pattern) {
                    report.errors.push(ValidationIssue::new(
                        format!("variables.{name}.validation.pattern"),
                        format!("invalid pattern: {err}"),
                    ));
                }
            }
        }

        for (index, handler) in playbook.error_handlers.iter().enumerate() {
            if handler.pattern.is_empty() {
                report.errors.push(ValidationIssue::new(
                    format!("error_handlers[{index}].match"),
                    "must not be empty",
                ));
            }
        }

        let mut seen = HashSet::new();
        self.validate_steps(&playbook.steps, "steps", playbook, &mut seen, &mut report);
        report
    }

    fn validate_steps<'a>(
        &self,
        steps: &'a [Step],
        prefix: &str,
        playbook: &Playbook,
        seen: &mut HashSet<&'a str>,
        report: &mut ValidationReport,
    ) {
        for (index, step) in steps.iter().enumerate() {
            let path = format!("{prefix}[{index}]");
            let mut error = |field: &str, message: String| {
                let at = if field.is_empty() {
                    path.clone()
                } else {
                    format!("{path}.{field}")
                };
                report.errors.push(ValidationIssue::new(at, message));
            };

            if step.id.trim().is_empty() {
                error("id", "step id must not be empty".into());
            } else if !seen.insert(step.id.as_str()) {
                error("id", format!("duplicate step id \"{}\"", step.id));
            }

            if step.action.requires_selector() && !step.has_target() {
                error("selector", format!("{} requires a selector", step.action));
            }

            let has_value = step.value.as_deref().is_some_and(|v| !v.is_empty());
            let has_variable = step.variable.as_deref().is_some_and(|v| !v.is_empty());
            match step.action {
                ActionType::Navigate if !has_value => {
                    error("value", "navigate requires a URL value".into());
                }
                ActionType::Type if !has_value && !has_variable => {
                    error("value", "type requires a value or variable".into());
                }
                ActionType::Condition
                    if step.condition.as_deref().map_or(true, |c| c.trim().is_empty()) =>
                {
                    error("condition", "condition requires an expression".into());
                }
                ActionType::Extract if !has_variable => {
                    error("variable", "extract requires a variable to store into".into());
                }
                ActionType::Loop => {
                    if !has_variable {
                        error("variable", "loop requires a variable".into());
                    }
                    if step.steps.as_ref().map_or(true, Vec::is_empty) {
                        error("steps", "loop requires nested steps".into());
                    }
                }
                _ => {}
            }

            if step.action == ActionType::Loop {
                if let Some(variable) = step.variable.as_deref().filter(|v| !v.is_empty()) {
                    if !playbook.variables.contains_key(variable) {
                        report.warnings.push(ValidationIssue::new(
                            format!("{path}.variable"),
                            format!("loop variable \"{variable}\" is not declared"),
                        ));
                    }
                }
            }

            for (field, nested) in [
                ("then", &step.then),
                ("else", &step.else_steps),
                ("steps", &step.steps),
            ] {
                if let Some(nested) = nested {
                    self.validate_steps(nested, &format!("{path}.{field}"), playbook, seen, report);
                }
            }
        }
    }
}

/// Checks runtime variable values against the playbook declarations.
pub fn validate_variables(playbook: &Playbook, variables: &Variables) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (name, definition) in &playbook.variables {
        let value = variables.get(name).filter(|value| !is_blank(value));
        match value {
            None if definition.required => issues.push(ValidationIssue::new(
                name.clone(),
                format!("Required variable \"{name}\" is missing"),
            )),
            None => {}
            Some(value) => {
                if let Err(message) = check_value(definition, value) {
                    issues.push(ValidationIssue::new(name.clone(), message));
                }
            }
        }
    }
    issues
}

/// Names of required variables that have no usable value.
pub fn missing_variables(playbook: &Playbook, variables: &Variables) -> Vec<String> {
    playbook
        .variables
        .iter()
        .filter(|(name, definition)| {
            definition.required && variables.get(name.as_str()).map_or(true, is_blank)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

fn check_value(definition: &VariableDefinition, value: &Value) -> Result<(), String> {
    match definition.var_type {
        VariableType::Number => {
            let number = as_number(value).ok_or_else(|| "must be a number".to_string())?;
            if let Some(rules) = &definition.validation {
                check_range(rules, number)?;
            }
        }
        VariableType::Boolean => {
            let ok = match value {
                Value::Bool(_) => true,
                Value::String(text) => text == "true" || text == "false",
                _ => false,
            };
            if !ok {
                return Err("must be true or false".into());
            }
        }
        VariableType::Date => {
            let text = value.as_str().unwrap_or_default();
            let parses = NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
                || DateTime::parse_from_rfc3339(text).is_ok();
            if !parses {
                return Err("must be a date (YYYY-MM-DD)".into());
            }
        }
        VariableType::Select => {
            let chosen = stringify(value);
            if !definition.options.is_empty()
                && !definition.options.iter().any(|option| option.value() == chosen)
            {
                return Err(format!("\"{chosen}\" is not one of the options"));
            }
        }
        VariableType::String => {
            if let (Some(rules), Value::String(text)) = (&definition.validation, value) {
                check_text(rules, text)?;
            }
        }
    }
    Ok(())
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn check_range(rules: &VariableValidation, number: f64) -> Result<(), String> {
    if let Some(min) = rules.min {
        if number < min {
            return Err(format!("must be at least {min}"));
        }
    }
    if let Some(max) = rules.max {
        if number > max {
            return Err(format!("must be at most {max}"));
        }
    }
    Ok(())
}

fn check_text(rules: &VariableValidation, text: &str) -> Result<(), String> {
    let length = text.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            return Err(format!("must be at least {min} characters"));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            return Err(format!("must be at most {max} characters"));
        }
    }
    if let Some(pattern) = &rules.pattern {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(text) => {}
            Ok(_) => return Err(format!("does not match pattern {pattern}")),
            Err(err) => return Err(format!("invalid pattern: {err}")),
        }
    }
    Ok(())
}
