//! Template interpolation against a chain of variable scopes.
//!
//! Every reference in a template is resolved against a [`VariableLookup`]. A
//! [`VariableSet`](crate::scene::VariableSet) implements the lookup by searching
//! its own variables first and then its ancestors, so nested scenes share the
//! outer namespace while being able to shadow it.
//!
//! # Resolution
//!
//! 1. The variable named by the reference is looked up in the scope chain.
//! 2. Otherwise `__from` / `__to` resolve to the time range of the nearest
//!    scope, as epoch milliseconds.
//! 3. Otherwise the reference is left in the output verbatim.
//!
//! The format is taken from the reference (`${name:csv}`), then from the
//! caller, then from the interpolator's default (`raw`).
//!
//! # Examples
//!
//! ```rust
//! use scenevars::templating::Interpolator;
//! use scenevars::variables::{Variable, VariableValue};
//!
//! let env = Variable::custom("env", "a, b").multi(true).value(vec!["a", "b"]).build();
//! let scope = vec![env];
//!
//! let interpolator = Interpolator::default();
//! assert_eq!(interpolator.interpolate("env=${env:pipe} $missing", &scope), "env=a|b $missing");
//! ```

use serde_json::Value;
use std::sync::Arc;

use super::formats::{FormatInput, FormatRegistry, ids};
use super::pattern::{self, VariableReference};
use crate::constants::{ALL_VARIABLE_TEXT, BUILTIN_FROM, BUILTIN_TO};
use crate::variables::{InterpolationValue, TimeRange, Variable, VariableValue};

/// Resolves variable names for interpolation.
pub trait VariableLookup: Send + Sync {
    /// The nearest variable called `name`.
    fn lookup(&self, name: &str) -> Option<Arc<Variable>>;

    /// Time range of the nearest scope that defines one.
    fn time_range(&self) -> Option<TimeRange> {
        None
    }
}

impl VariableLookup for [Arc<Variable>] {
    fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.iter().find(|v| v.name() == name).cloned()
    }
}

impl VariableLookup for Vec<Arc<Variable>> {
    fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.as_slice().lookup(name)
    }
}

/// Substitutes variable references in templates.
#[derive(Debug, Clone)]
pub struct Interpolator {
    formats: Arc<FormatRegistry>,
    default_format: String,
}

impl Interpolator {
    /// Interpolator using `formats` with `raw` as default format.
    pub fn new(formats: Arc<FormatRegistry>) -> Self {
        Self {
            formats,
            default_format: ids::RAW.to_string(),
        }
    }

    /// Use `format` for references without an explicit format.
    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = format.into();
        self
    }

    /// The format registry.
    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// The default format id.
    pub fn default_format(&self) -> &str {
        &self.default_format
    }

    /// Interpolate with the default format.
    pub fn interpolate(&self, template: &str, scope: &dyn VariableLookup) -> String {
        self.interpolate_with_format(template, scope, None)
    }

    /// Interpolate, applying `format` to references that do not name one.
    pub fn interpolate_with_format(
        &self,
        template: &str,
        scope: &dyn VariableLookup,
        format: Option<&str>,
    ) -> String {
        if !pattern::contains_reference(template) {
            return template.to_string();
        }

        let mut output = String::with_capacity(template.len());
        let mut last = 0;
        for reference in pattern::references(template) {
            output.push_str(&template[last..reference.start]);
            match self.resolve(&reference, scope, format) {
                Some(rendered) => output.push_str(&rendered),
                None => {
                    tracing::trace!(
                        target: "templating",
                        "Leaving unresolved reference {} in place",
                        reference.matched
                    );
                    output.push_str(reference.matched);
                }
            }
            last = reference.end;
        }
        output.push_str(&template[last..]);
        output
    }

    /// Interpolate every string leaf of a structured payload. Object keys are kept.
    pub fn interpolate_json(&self, value: &Value, scope: &dyn VariableLookup, format: Option<&str>) -> Value {
        match value {
            Value::String(text) => Value::String(self.interpolate_with_format(text, scope, format)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.interpolate_json(item, scope, format)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.interpolate_json(item, scope, format)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve(
        &self,
        reference: &VariableReference<'_>,
        scope: &dyn VariableLookup,
        format: Option<&str>,
    ) -> Option<String> {
        let (format_id, args) = reference
            .format_parts()
            .unwrap_or_else(|| (format.unwrap_or(&self.default_format), Vec::new()));

        if let Some(variable) = scope.lookup(reference.name) {
            return Some(self.render_variable(&variable, reference.name, format_id, &args));
        }

        let range = scope.time_range()?;
        let millis = match reference.name {
            BUILTIN_FROM => range.from.timestamp_millis(),
            BUILTIN_TO => range.to.timestamp_millis(),
            _ => return None,
        };
        let value = VariableValue::Single(millis.to_string());
        Some(self.formats.format(format_id, &FormatInput::new(&value, reference.name), &args))
    }

    fn render_variable(&self, variable: &Variable, name: &str, format_id: &str, args: &[&str]) -> String {
        match variable.interpolation_value() {
            InterpolationValue::Plain {
                value,
                text,
            } => self.formats.format(format_id, &FormatInput::new(&value, name).with_text(&text), args),
            InterpolationValue::CustomAll(all_value) => match format_id {
                ids::TEXT => ALL_VARIABLE_TEXT.to_string(),
                ids::PERCENT_ENCODE => {
                    let value = VariableValue::Single(all_value);
                    self.formats.format(format_id, &FormatInput::new(&value, name), args)
                }
                ids::QUERY_PARAM => {
                    let value = VariableValue::single(ALL_VARIABLE_TEXT);
                    self.formats.format(format_id, &FormatInput::new(&value, name), args)
                }
                _ => all_value,
            },
        }
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(Arc::new(FormatRegistry::new()))
    }
}
