//! Dependency extraction from templates and structured state.
//!
//! A variable depends on another variable when one of its dependency-relevant
//! fields references the other variable's name. This module finds those names.
//! It never fails: text without references yields an empty list, and a
//! structure that cannot be serialized is logged and treated as having no
//! dependencies.

use serde::Serialize;
use serde_json::Value;

use super::pattern;

/// Extract the names referenced in `text`, in first-seen order, without duplicates.
///
/// # Examples
///
/// ```
/// use scenevars::templating::extract_dependencies;
///
/// let deps = extract_dependencies("test.$plain ${withcurly} ${withformat:csv} [[deprecated]]");
/// assert_eq!(deps, vec!["plain", "withcurly", "withformat", "deprecated"]);
/// ```
pub fn extract_dependencies(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(text, &mut names);
    names
}

fn collect_names(text: &str, names: &mut Vec<String>) {
    for reference in pattern::references(text) {
        if !names.iter().any(|n| n == reference.name) {
            names.push(reference.name.to_string());
        }
    }
}

fn collect_from_value(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::String(text) => collect_names(text, names),
        Value::Array(items) => items.iter().for_each(|item| collect_from_value(item, names)),
        Value::Object(map) => map.values().for_each(|item| collect_from_value(item, names)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Extract dependencies from an already-serialized JSON value.
///
/// When `state_paths` is given, only those top-level fields of an object are
/// scanned; other fields (labels, descriptions) are ignored.
pub fn extract_from_value(value: &Value, state_paths: Option<&[String]>) -> Vec<String> {
    let mut names = Vec::new();

    match (state_paths, value) {
        (Some(paths), Value::Object(map)) => {
            for path in paths {
                if let Some(field) = map.get(path) {
                    collect_from_value(field, &mut names);
                }
            }
        }
        (Some(_), other) => {
            tracing::debug!(
                target: "templating",
                "State paths given for a non-object value ({}), scanning it whole",
                kind_of(other)
            );
            collect_from_value(other, &mut names);
        }
        (None, other) => collect_from_value(other, &mut names),
    }

    names
}

/// Extract dependencies from any serializable structure.
///
/// The structure is serialized to JSON first. A serialization failure is
/// logged and yields an empty list.
pub fn extract_from_serializable<T: Serialize + ?Sized>(
    state: &T,
    state_paths: Option<&[String]>,
) -> Vec<String> {
    match serde_json::to_value(state) {
        Ok(value) => extract_from_value(&value, state_paths),
        Err(err) => {
            tracing::warn!(
                target: "templating",
                "Failed to serialize state for dependency scanning, assuming no dependencies: {}",
                err
            );
            Vec::new()
        }
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
