//! Constant variables: a fixed, usually hidden value.

use serde::{Deserialize, Serialize};

/// Configuration of a constant variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantConfig {
    /// The value; never interpolated
    #[serde(default)]
    pub value: String,
}

impl ConstantConfig {
    /// Constant holding `value`.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}
