//! Query variables: options returned by a datasource query.
//!
//! The query payload is interpolated, sent to the injected
//! [`QueryRunner`](crate::variables::QueryRunner) and the returned rows are
//! turned into options:
//!
//! 1. text and value default to each other when one is missing;
//! 2. an optional regex filters rows and extracts the option from them. Named
//!    groups `text` and `value` take precedence over the first capture group;
//!    with the `g` flag every match yields its own option;
//! 3. options are deduplicated by value and sorted.
//!
//! Regexes are written `/pattern/flags` (flags `g`, `i`, `m`, `s`) or as a bare
//! pattern, which must match the whole value.

use futures::{FutureExt, StreamExt};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::core::VariableError;
use crate::templating::formats::ids;
use crate::variables::{
    DataSourceRef, MetricFindValue, OptionsFuture, QueryRequest, UpdateContext, VariableOption,
};

/// When a query variable refreshes its options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableRefresh {
    /// Only when explicitly refreshed or when a dependency changes
    Never,
    /// Whenever the owning set activates
    #[default]
    OnLoad,
    /// On activation and whenever the time range changes
    OnTimeRangeChange,
}

/// Sort order applied to query options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableSort {
    /// Keep the order returned by the query
    #[default]
    Disabled,
    /// By label, ascending
    AlphabeticalAsc,
    /// By label, descending
    AlphabeticalDesc,
    /// By the first number in the label, ascending
    NumericalAsc,
    /// By the first number in the label, descending
    NumericalDesc,
    /// By lower-cased label, ascending
    AlphabeticalCaseInsensitiveAsc,
    /// By lower-cased label, descending
    AlphabeticalCaseInsensitiveDesc,
    /// Digit runs compared as numbers, ascending
    NaturalAsc,
    /// Digit runs compared as numbers, descending
    NaturalDesc,
}

/// Configuration of a query variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Datasource to query; its uid may be templated
    #[serde(default)]
    pub datasource: Option<DataSourceRef>,
    /// Query payload; every string leaf is interpolated
    #[serde(default)]
    pub query: Value,
    /// Optional extraction regex; may be templated
    #[serde(default)]
    pub regex: String,
    /// Sort order of the options
    #[serde(default)]
    pub sort: VariableSort,
    /// Refresh policy
    #[serde(default)]
    pub refresh: VariableRefresh,
}

impl QueryConfig {
    /// Query `query` against `datasource`.
    pub fn new(datasource: DataSourceRef, query: impl Into<Value>) -> Self {
        Self {
            datasource: Some(datasource),
            query: query.into(),
            ..Self::default()
        }
    }

    /// Set the extraction regex.
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }

    /// Set the sort order.
    pub const fn with_sort(mut self, sort: VariableSort) -> Self {
        self.sort = sort;
        self
    }

    /// Set the refresh policy.
    pub const fn with_refresh(mut self, refresh: VariableRefresh) -> Self {
        self.refresh = refresh;
        self
    }

    pub(super) fn prepare(
        &self,
        name: &str,
        ctx: &UpdateContext<'_>,
    ) -> Result<OptionsFuture, VariableError> {
        let runner = ctx.services.query_runner.clone().ok_or_else(|| {
            VariableError::MissingService {
                variable: name.to_string(),
                service: "query runner".to_string(),
            }
        })?;

        let datasource = self
            .datasource
            .as_ref()
            .map(|ds| DataSourceRef {
                uid: ctx.interpolator.interpolate_with_format(&ds.uid, ctx.scope, Some(ids::RAW)),
                plugin: ds.plugin.clone(),
            })
            .unwrap_or_default();
        let query = ctx.interpolator.interpolate_json(&self.query, ctx.scope, None);
        let regex = OptionRegex::templated(&self.regex, ctx)?;

        let request = QueryRequest {
            datasource,
            query,
            time_range: ctx.time_range,
            variable: name.to_string(),
        };
        let variable = name.to_string();
        let sort = self.sort;

        tracing::debug!(
            target: "variables",
            "Query variable '{}' requesting options from datasource '{}'",
            variable,
            request.datasource.uid
        );

        Ok(async move {
            let mut stream = runner.run_query(request);
            let mut rows = Vec::new();
            while let Some(batch) = stream.next().await {
                let batch = batch.map_err(|err| VariableError::UpdateFailed {
                    variable: variable.clone(),
                    reason: format!("{err:#}"),
                })?;
                rows.extend(batch);
            }
            Ok(metric_names_to_options(rows, regex.as_ref(), sort))
        }
        .boxed())
    }
}

/// A compiled option regex.
#[derive(Debug, Clone)]
pub struct OptionRegex {
    regex: Regex,
    global: bool,
}

impl OptionRegex {
    /// Parse `/pattern/flags` or a bare (anchored) pattern. Empty input means no regex.
    pub fn parse(source: &str) -> Result<Option<Self>, VariableError> {
        if source.is_empty() {
            return Ok(None);
        }

        let invalid = |reason: String| VariableError::InvalidRegex {
            pattern: source.to_string(),
            reason,
        };

        let (pattern, flags) = match source.strip_prefix('/').zip(source.rfind('/')) {
            Some((_, end)) if end > 0 => (source[1..end].to_string(), &source[end + 1..]),
            _ => (format!("^{source}$"), ""),
        };

        let mut global = false;
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'i' | 'm' | 's' => inline.push(flag),
                'u' | 'y' => {}
                other => return Err(invalid(format!("unsupported flag '{other}'"))),
            }
        }

        let pattern = if inline.is_empty() {
            pattern
        } else {
            format!("(?{inline}){pattern}")
        };
        let regex = Regex::new(&pattern).map_err(|err| invalid(err.to_string()))?;
        Ok(Some(Self {
            regex,
            global,
        }))
    }

    /// Interpolate `template` with the `regex` format, then parse it.
    pub(crate) fn templated(template: &str, ctx: &UpdateContext<'_>) -> Result<Option<Self>, VariableError> {
        if template.is_empty() {
            return Ok(None);
        }
        let interpolated = ctx.interpolator.interpolate_with_format(template, ctx.scope, Some(ids::REGEX));
        Self::parse(&interpolated)
    }

    /// Whether the regex matches anywhere in `haystack`.
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }

    fn matches<'h>(&self, haystack: &'h str) -> Vec<Captures<'h>> {
        if self.global {
            self.regex.captures_iter(haystack).collect()
        } else {
            self.regex.captures(haystack).into_iter().collect()
        }
    }
}

enum Extraction {
    Skip,
    Keep,
    Replace { text: String, value: String },
    Many(Vec<String>),
}

fn non_empty_group(matches: &[Captures<'_>], group: &str) -> Option<String> {
    matches
        .iter()
        .find_map(|caps| caps.name(group).map(|m| m.as_str()).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

fn extract(regex: &OptionRegex, value: &str) -> Extraction {
    let matches = regex.matches(value);
    if matches.is_empty() {
        return Extraction::Skip;
    }

    let value_group = non_empty_group(&matches, "value");
    let text_group = non_empty_group(&matches, "text");
    if value_group.is_some() || text_group.is_some() {
        return Extraction::Replace {
            value: value_group.clone().or_else(|| text_group.clone()).unwrap_or_default(),
            text: text_group.or(value_group).unwrap_or_default(),
        };
    }

    let first_group = |caps: &Captures<'_>| caps.get(1).map_or_else(String::new, |m| m.as_str().to_string());
    match matches.iter().find(|caps| caps.len() > 1) {
        Some(_) if matches.len() > 1 => Extraction::Many(matches.iter().map(first_group).collect()),
        Some(first) => {
            let extracted = first_group(first);
            Extraction::Replace {
                text: extracted.clone(),
                value: extracted,
            }
        }
        None => Extraction::Keep,
    }
}

/// Convert query rows to options: regex extraction, dedup by value, sort.
pub fn metric_names_to_options(
    rows: Vec<MetricFindValue>,
    regex: Option<&OptionRegex>,
    sort: VariableSort,
) -> Vec<VariableOption> {
    let mut options = Vec::with_capacity(rows.len());

    for row in rows {
        let value = row.value.clone().or_else(|| row.text.clone()).unwrap_or_default();
        let text = row.text.or(row.value).unwrap_or_default();

        let Some(regex) = regex else {
            options.push(VariableOption::new(text, value));
            continue;
        };

        match extract(regex, &value) {
            Extraction::Skip => {}
            Extraction::Keep => options.push(VariableOption::new(text, value)),
            Extraction::Replace {
                text,
                value,
            } => options.push(VariableOption::new(text, value)),
            Extraction::Many(values) => options.extend(values.into_iter().map(VariableOption::same)),
        }
    }

    let mut seen = HashSet::new();
    options.retain(|option| seen.insert(option.value.clone()));
    sort_options(&mut options, sort);
    options
}

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number pattern is valid"));

fn numeric_key(label: &str) -> i64 {
    FIRST_NUMBER
        .find(label)
        .map_or(-1, |m| m.as_str().parse::<i64>().unwrap_or(i64::MAX))
}

/// Compare with digit runs as numbers, ignoring case.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_run = String::new();
                while let Some(c) = a_chars.next_if(char::is_ascii_digit) {
                    x_run.push(c);
                }
                let mut y_run = String::new();
                while let Some(c) = b_chars.next_if(char::is_ascii_digit) {
                    y_run.push(c);
                }
                let x_digits = x_run.trim_start_matches('0');
                let y_digits = y_run.trim_start_matches('0');
                let ordering = x_digits.len().cmp(&y_digits.len()).then_with(|| x_digits.cmp(y_digits));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.to_lowercase().cmp(y.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

/// Sort options in place. Sorting is stable; descending orders reverse the
/// ascending result.
pub fn sort_options(options: &mut [VariableOption], sort: VariableSort) {
    use VariableSort::*;

    match sort {
        Disabled => return,
        AlphabeticalAsc | AlphabeticalDesc => options.sort_by(|a, b| a.label.cmp(&b.label)),
        NumericalAsc | NumericalDesc => options.sort_by_key(|o| numeric_key(&o.label)),
        AlphabeticalCaseInsensitiveAsc | AlphabeticalCaseInsensitiveDesc => {
            options.sort_by_cached_key(|o| o.label.to_lowercase());
        }
        NaturalAsc | NaturalDesc => options.sort_by(|a, b| natural_cmp(&a.label, &b.label)),
    }

    if matches!(sort, AlphabeticalDesc | NumericalDesc | AlphabeticalCaseInsensitiveDesc | NaturalDesc) {
        options.reverse();
    }
}
