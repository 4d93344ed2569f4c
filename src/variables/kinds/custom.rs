//! Custom variables: options from a comma separated literal.

use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::variables::{OptionsFuture, UpdateContext, VariableOption};

/// A comma, unless escaped as `\,`.
static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\\,|[^,])+").expect("custom item pattern is valid"));

/// `label : value` (spaces around the colon are required).
static LABELLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+)\s:\s(.+)$").expect("labelled item pattern is valid"));

/// Configuration of a custom variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfig {
    /// Comma separated options, may reference other variables
    #[serde(default)]
    pub query: String,
}

impl CustomConfig {
    /// Custom options from `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    pub(super) fn prepare(&self, ctx: &UpdateContext<'_>) -> OptionsFuture {
        let interpolated = ctx.interpolator.interpolate(&self.query, ctx.scope);
        futures::future::ready(Ok(parse_custom_options(&interpolated))).boxed()
    }
}

/// Split a custom query into options.
///
/// ```
/// use scenevars::variables::kinds::parse_custom_options;
///
/// let options = parse_custom_options(r"Production : prod, a\,b");
/// assert_eq!(options[0].label, "Production");
/// assert_eq!(options[0].value, "prod");
/// assert_eq!(options[1].value, "a,b");
/// ```
pub fn parse_custom_options(query: &str) -> Vec<VariableOption> {
    ITEM.find_iter(query)
        .map(|item| {
            let text = item.as_str().replace("\\,", ",");
            match LABELLED.captures(&text) {
                Some(caps) => VariableOption::new(caps[1].trim(), caps[2].trim()),
                None => VariableOption::same(text.trim()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_items_are_trimmed() {
        let options = parse_custom_options("a, b ,c");
        let values: Vec<_> = options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
        assert_eq!(options[1].label, "b");
    }

    #[test]
    fn test_escaped_comma() {
        let options = parse_custom_options(r"1\,000, 2000");
        assert_eq!(options[0].value, "1,000");
        assert_eq!(options[1].value, "2000");
    }

    #[test]
    fn test_label_value_pairs() {
        let options = parse_custom_options("Dev : dev,Prod : prod");
        assert_eq!(options[0], VariableOption::new("Dev", "dev"));
        assert_eq!(options[1], VariableOption::new("Prod", "prod"));

        // Without spaces the colon is part of the value
        let options = parse_custom_options("host:9090");
        assert_eq!(options[0].value, "host:9090");
    }

    #[test]
    fn test_empty_query() {
        assert!(parse_custom_options("").is_empty());
    }
}
