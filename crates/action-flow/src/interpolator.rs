//! `{{path}}` placeholder interpolation

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use replaybook_core_types::Step;
use serde_json::Value;
use tracing::warn;

use crate::condition;
use crate::types::Variables;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)*)\}\}")
        .expect("static placeholder regex")
});

/// Dotted-path lookup into the variable map.
pub fn lookup<'a>(variables: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form of a value as it appears inside an interpolated string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(f) if number.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => number.to_string(),
        },
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Replaces every resolvable placeholder. Unresolved ones stay verbatim.
pub fn interpolate(template: &str, variables: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match lookup(variables, &caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolates every string inside a JSON value, keys untouched.
pub fn interpolate_value(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(text) => Value::String(interpolate(text, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, variables))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), interpolate_value(item, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Copy of `step` with every string field interpolated, nested steps included.
pub fn interpolate_step(step: &Step, variables: &Variables) -> Step {
    let raw = match serde_json::to_value(step) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("step {} could not be interpolated: {}", step.id, err);
            return step.clone();
        }
    };
    match serde_json::from_value(interpolate_value(&raw, variables)) {
        Ok(interpolated) => interpolated,
        Err(err) => {
            warn!("interpolated step {} is malformed: {}", step.id, err);
            step.clone()
        }
    }
}

/// Boolean value of a condition. Rejected or malformed expressions are false.
pub fn evaluate_condition(expression: &str, variables: &Variables) -> bool {
    match condition::evaluate(expression, variables) {
        Ok(value) => value.truthy(),
        Err(err) => {
            warn!("condition rejected ({}): {}", err, expression);
            false
        }
    }
}

/// Placeholder paths in order of appearance, without duplicates.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

pub fn has_variables(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaybook_core_types::{ActionType, StepVerify};
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        match value {
            Value::Object(map) => map,
            _ => Variables::new(),
        }
    }

    #[test]
    fn test_interpolate_nested_paths() {
        let variables = vars(json!({
            "user": {"name": "Kim", "tags": ["a", "b"]},
            "count": 3,
            "ratio": 1.5,
            "whole": 2.0,
        }));
        assert_eq!(
            interpolate("Hi {{user.name}} ({{count}}, {{ratio}}, {{whole}})", &variables),
            "Hi Kim (3, 1.5, 2)"
        );
        assert_eq!(interpolate("{{user.tags}}", &variables), "[\"a\",\"b\"]");
        assert_eq!(interpolate("{{user.tags.1}}", &variables), "{{user.tags.1}}");
    }

    #[test]
    fn test_unresolved_placeholders_stay_verbatim() {
        let variables = vars(json!({"a": "x"}));
        assert_eq!(interpolate("{{a}}-{{b}}-{{ c }}", &variables), "x-{{b}}-{{ c }}");
    }

    #[test]
    fn test_interpolate_step_does_not_mutate_original() {
        let variables = vars(json!({"q": "rust", "page": "/search"}));
        let step = Step::new("s", ActionType::Type)
            .with_selector("input[name=\"q\"]")
            .with_value("{{q}} lang")
            .with_verify(StepVerify {
                success_url_contains: Some("{{page}}".into()),
                ..Default::default()
            })
            .with_then(vec![Step::new("n", ActionType::Guide).with_message("typed {{q}}")]);

        let out = interpolate_step(&step, &variables);

        assert_eq!(out.value.as_deref(), Some("rust lang"));
        assert_eq!(
            out.verify.as_ref().and_then(|v| v.success_url_contains.as_deref()),
            Some("/search")
        );
        assert_eq!(
            out.then.as_ref().and_then(|t| t[0].message.as_deref()),
            Some("typed rust")
        );
        assert_eq!(step.value.as_deref(), Some("{{q}} lang"));
    }

    #[test]
    fn test_extract_and_detect() {
        assert_eq!(
            extract_variables("{{a}} {{b.c}} {{a}}"),
            vec!["a".to_string(), "b.c".to_string()]
        );
        assert!(has_variables("x {{y}}"));
        assert!(!has_variables("x {{1y}}"));
    }

    #[test]
    fn test_condition_fail_safe() {
        let variables = vars(json!({"n": 5}));
        assert!(evaluate_condition("{{n}} > 3", &variables));
        assert!(!evaluate_condition("process.exit(1)", &variables));
        assert!(!evaluate_condition("", &variables));
    }
}
