//! Ad hoc filter variables.
//!
//! The value of an ad hoc variable is its filter list rendered as a label
//! matcher expression: `key<op>"value"`, joined by `,`.

use serde::{Deserialize, Serialize};

use crate::variables::DataSourceRef;

/// One `key <operator> value` filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocFilter {
    /// Label name
    pub key: String,
    /// Matcher operator (`=`, `!=`, `=~`, `!~`, ...)
    pub operator: String,
    /// Matched value
    pub value: String,
}

impl AdHocFilter {
    /// A filter.
    pub fn new(key: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Render as `key<op>"value"` with the value escaped.
    pub fn render(&self) -> String {
        format!("{}{}\"{}\"", self.key, self.operator, escape_label_value(&self.value))
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

/// Configuration of an ad hoc variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocConfig {
    /// Datasource the filters apply to; may be templated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DataSourceRef>,
    /// Current filters
    #[serde(default)]
    pub filters: Vec<AdHocFilter>,
}

impl AdHocConfig {
    /// Filters for `datasource`.
    pub fn new(datasource: Option<DataSourceRef>, filters: Vec<AdHocFilter>) -> Self {
        Self {
            datasource,
            filters,
        }
    }

    /// Render every filter, joined by `,`.
    pub fn render(&self) -> String {
        self.filters.iter().map(AdHocFilter::render).collect::<Vec<_>>().join(",")
    }
}
