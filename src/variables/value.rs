//! Value types shared by every variable kind.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{ALL_VARIABLE_VALUE, MULTI_TEXT_SEPARATOR};

/// The current selection of a variable: one value or an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// Single selection
    Single(String),
    /// Multi selection, in selection order
    Multi(Vec<String>),
}

impl VariableValue {
    /// A single value.
    pub fn single(value: impl Into<String>) -> Self {
        Self::Single(value.into())
    }

    /// A multi value built from any iterator of strings.
    pub fn multi<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Multi(values.into_iter().map(Into::into).collect())
    }

    /// The "All" sentinel in single form.
    pub fn all() -> Self {
        Self::Single(ALL_VARIABLE_VALUE.to_string())
    }

    /// Whether this value selects "All".
    ///
    /// A multi value selects "All" when its only element is the sentinel.
    pub fn is_all(&self) -> bool {
        match self {
            Self::Single(v) => v == ALL_VARIABLE_VALUE,
            Self::Multi(values) => values.len() == 1 && values[0] == ALL_VARIABLE_VALUE,
        }
    }

    /// View as a slice of values.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Multi(values) => values,
        }
    }

    /// The first value, if any.
    pub fn first(&self) -> Option<&str> {
        self.as_slice().first().map(String::as_str)
    }

    /// Owned list of values.
    pub fn to_vec(&self) -> Vec<String> {
        self.as_slice().to_vec()
    }

    /// `true` for an empty multi value or an empty single string.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(v) => v.is_empty(),
            Self::Multi(values) => values.is_empty(),
        }
    }

    /// Whether this value is a list.
    pub const fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

impl Default for VariableValue {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for VariableValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<&str>> for VariableValue {
    fn from(values: Vec<&str>) -> Self {
        Self::multi(values)
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => write!(f, "{v}"),
            Self::Multi(values) => write!(f, "{}", values.join(MULTI_TEXT_SEPARATOR)),
        }
    }
}

/// A selectable candidate value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOption {
    /// Display label
    pub label: String,
    /// Raw value
    pub value: String,
}

impl VariableOption {
    /// Option with distinct label and value.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Option whose label equals its value.
    pub fn same(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

/// Display hint for the rendering layer. It has no effect on scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableHide {
    /// Label and picker shown
    #[default]
    Visible,
    /// Picker shown without its label
    HideLabel,
    /// Not rendered at all
    HideVariable,
}
