//! Format registry for variable interpolation.
//!
//! A format turns a variable's value into the string substituted into a
//! template, e.g. `${host:csv}` or `${host:lucene}`. Every formatter accepts a
//! single value or a list of values (multi-select) and never fails: anything it
//! cannot represent is stringified as-is.
//!
//! # Builtin formats
//!
//! | Id | Single `a b` | Multi `[a, b]` |
//! |---|---|---|
//! | `raw` | `a b` | `a,b` |
//! | `regex` | escaped | `(a\|b)` |
//! | `lucene` | `a\ b` | `("a" OR "b")`, `__empty__` when empty |
//! | `pipe` | `a b` | `a\|b` |
//! | `distributed` | `a b` | `a,name=b` |
//! | `csv` | `a b` | `a,b` |
//! | `html` | entity-escaped | joined with `, ` then escaped |
//! | `json` | `"a b"` | `["a","b"]` |
//! | `percentencode` | `a%20b` | `%7Ba%2Cb%7D` |
//! | `singlequote` | `'a b'` | `'a','b'` |
//! | `doublequote` | `"a b"` | `"a","b"` |
//! | `sqlstring` | `'a b'` | `'a','b'` |
//! | `date` | epoch ms formatted | first value |
//! | `glob` | `a b` | `{a,b}` |
//! | `text` | display text | display texts joined with ` + ` |
//! | `queryparam` | `var-name=a%20b` | `var-name=a&var-name=b` |

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use super::date;
use crate::constants::{EMPTY_SET_SENTINEL, QUERY_PARAM_PREFIX};
use crate::variables::VariableValue;

/// Everything a formatter may look at.
#[derive(Debug, Clone, Copy)]
pub struct FormatInput<'a> {
    /// The value to format
    pub value: &'a VariableValue,
    /// The display text matching `value`
    pub text: &'a VariableValue,
    /// Name of the variable being formatted
    pub name: &'a str,
}

impl<'a> FormatInput<'a> {
    /// Input whose display text equals its value.
    pub const fn new(value: &'a VariableValue, name: &'a str) -> Self {
        Self {
            value,
            text: value,
            name,
        }
    }

    /// Attach a display text.
    pub const fn with_text(mut self, text: &'a VariableValue) -> Self {
        self.text = text;
        self
    }
}

/// A formatting function: `(input, args) -> rendered`.
pub type Formatter = Arc<dyn Fn(&FormatInput<'_>, &[&str]) -> String + Send + Sync>;

/// A registered format.
#[derive(Clone)]
pub struct FormatEntry {
    /// Format id used in templates
    pub id: String,
    /// One-line description
    pub description: String,
    formatter: Formatter,
}

impl FormatEntry {
    /// Apply this format.
    pub fn apply(&self, input: &FormatInput<'_>, args: &[&str]) -> String {
        (self.formatter)(input, args)
    }
}

impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Lookup table from format id to formatter.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    entries: BTreeMap<String, FormatEntry>,
}

/// Well-known format ids.
pub mod ids {
    pub const RAW: &str = "raw";
    pub const REGEX: &str = "regex";
    pub const LUCENE: &str = "lucene";
    pub const PIPE: &str = "pipe";
    pub const DISTRIBUTED: &str = "distributed";
    pub const CSV: &str = "csv";
    pub const HTML: &str = "html";
    pub const JSON: &str = "json";
    pub const PERCENT_ENCODE: &str = "percentencode";
    pub const SINGLE_QUOTE: &str = "singlequote";
    pub const DOUBLE_QUOTE: &str = "doublequote";
    pub const SQL_STRING: &str = "sqlstring";
    pub const DATE: &str = "date";
    pub const GLOB: &str = "glob";
    pub const TEXT: &str = "text";
    pub const QUERY_PARAM: &str = "queryparam";
}

impl FormatRegistry {
    /// A registry without any format.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// A registry holding the builtin formats.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(ids::RAW, "Keep value as is", |input, _| raw(input.value));
        registry.register(ids::REGEX, "Escape for regex, OR-group for lists", |input, _| {
            regex(input.value)
        });
        registry.register(ids::LUCENE, "Lucene escaped, OR-group for lists", |input, _| {
            lucene(input.value)
        });
        registry.register(ids::PIPE, "Values joined by |", |input, _| pipe(input.value));
        registry.register(ids::DISTRIBUTED, "Repeat the variable name for each value", |input, _| {
            distributed(input.value, input.name)
        });
        registry.register(ids::CSV, "Values joined by ,", |input, _| csv(input.value));
        registry.register(ids::HTML, "HTML entity escaped", |input, _| html(input.value));
        registry.register(ids::JSON, "JSON stringified", |input, _| json(input.value));
        registry.register(ids::PERCENT_ENCODE, "Strict RFC3986 percent-encoding", |input, _| {
            percent_encode(input.value)
        });
        registry.register(ids::SINGLE_QUOTE, "Single quoted, quotes backslash-escaped", |input, _| {
            quoted(input.value, '\'')
        });
        registry.register(ids::DOUBLE_QUOTE, "Double quoted, quotes backslash-escaped", |input, _| {
            quoted(input.value, '"')
        });
        registry.register(ids::SQL_STRING, "SQL string literal, quotes doubled", |input, _| {
            sql_string(input.value)
        });
        registry.register(ids::DATE, "Epoch milliseconds as a date (iso, seconds, ms, custom)", |input, args| {
            date::format_date_value(input.value, args)
        });
        registry.register(ids::GLOB, "Brace list for more than one value", |input, _| glob(input.value));
        registry.register(ids::TEXT, "Display text instead of value", |input, _| input.text.to_string());
        registry.register(ids::QUERY_PARAM, "URL query parameters", |input, _| {
            query_param(input.value, input.name)
        });
        registry
    }

    /// Register (or replace) a format.
    pub fn register<F>(&mut self, id: &str, description: &str, formatter: F)
    where
        F: Fn(&FormatInput<'_>, &[&str]) -> String + Send + Sync + 'static,
    {
        self.entries.insert(
            id.to_string(),
            FormatEntry {
                id: id.to_string(),
                description: description.to_string(),
                formatter: Arc::new(formatter),
            },
        );
    }

    /// Look up a format by id.
    pub fn get(&self, id: &str) -> Option<&FormatEntry> {
        self.entries.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All registered formats, sorted by id.
    pub fn entries(&self) -> impl Iterator<Item = &FormatEntry> {
        self.entries.values()
    }

    /// Format with `id`, falling back to `glob` for unknown ids.
    pub fn format(&self, id: &str, input: &FormatInput<'_>, args: &[&str]) -> String {
        if let Some(entry) = self.get(id) {
            return entry.apply(input, args);
        }

        tracing::warn!(
            target: "templating",
            "Variable format '{}' not found, using glob format as fallback",
            id
        );
        match self.get(ids::GLOB) {
            Some(entry) => entry.apply(input, args),
            None => glob(input.value),
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static JS_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[+-]?(?:Infinity|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)|0[xX][0-9a-fA-F]+|0[oO][0-7]+|0[bB][01]+)$",
    )
    .expect("number pattern is valid")
});

/// Whether `value` converts to a number the way a JS unary `+` would.
fn is_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || JS_NUMBER.is_match(trimmed)
}

/// Escape lucene special characters; numeric strings are kept as is.
pub fn lucene_escape(value: &str) -> String {
    if is_numeric(value) {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if c.is_whitespace()
            || matches!(
                c,
                '!' | '*'
                    | '+'
                    | '-'
                    | '='
                    | '<'
                    | '>'
                    | '&'
                    | '|'
                    | '('
                    | ')'
                    | '['
                    | ']'
                    | '{'
                    | '}'
                    | '^'
                    | '~'
                    | '?'
                    | ':'
                    | '\\'
                    | '/'
                    | '"'
            )
        {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape regex metacharacters (including `/`).
pub fn regex_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if matches!(
            c,
            '\\' | '^' | '$' | '*' | '+' | '?' | '.' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '/'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn raw(value: &VariableValue) -> String {
    value.as_slice().join(",")
}

fn regex(value: &VariableValue) -> String {
    match value {
        VariableValue::Single(v) => regex_escape(v),
        VariableValue::Multi(values) if values.len() == 1 => regex_escape(&values[0]),
        VariableValue::Multi(values) => {
            let escaped: Vec<String> = values.iter().map(|v| regex_escape(v)).collect();
            format!("({})", escaped.join("|"))
        }
    }
}

fn lucene(value: &VariableValue) -> String {
    match value {
        VariableValue::Single(v) => lucene_escape(v),
        VariableValue::Multi(values) if values.is_empty() => EMPTY_SET_SENTINEL.to_string(),
        VariableValue::Multi(values) => {
            let quoted: Vec<String> =
                values.iter().map(|v| format!("\"{}\"", lucene_escape(v))).collect();
            format!("({})", quoted.join(" OR "))
        }
    }
}

fn pipe(value: &VariableValue) -> String {
    value.as_slice().join("|")
}

fn distributed(value: &VariableValue, name: &str) -> String {
    match value {
        VariableValue::Single(v) => v.clone(),
        VariableValue::Multi(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| if i == 0 { v.clone() } else { format!("{name}={v}") })
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn csv(value: &VariableValue) -> String {
    value.as_slice().join(",")
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn html(value: &VariableValue) -> String {
    match value {
        VariableValue::Single(v) => html_escape(v),
        VariableValue::Multi(values) => html_escape(&values.join(", ")),
    }
}

fn json(value: &VariableValue) -> String {
    let rendered = match value {
        VariableValue::Single(v) => serde_json::to_string(v),
        VariableValue::Multi(values) => serde_json::to_string(values),
    };
    // Serializing strings cannot fail; degrade to the raw form regardless.
    rendered.unwrap_or_else(|_| raw(value))
}

/// Percent-encode everything outside `A-Z a-z 0-9 - _ . ~`.
pub fn encode_uri_component_strict(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn percent_encode(value: &VariableValue) -> String {
    match value {
        VariableValue::Single(v) => encode_uri_component_strict(v),
        VariableValue::Multi(values) => {
            encode_uri_component_strict(&format!("{{{}}}", values.join(",")))
        }
    }
}

fn quoted(value: &VariableValue, quote: char) -> String {
    let escaped_quote = format!("\\{quote}");
    value
        .as_slice()
        .iter()
        .map(|v| format!("{quote}{}{quote}", v.replace(quote, &escaped_quote)))
        .collect::<Vec<_>>()
        .join(",")
}

fn sql_string(value: &VariableValue) -> String {
    value
        .as_slice()
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}

fn glob(value: &VariableValue) -> String {
    match value {
        VariableValue::Multi(values) if values.len() > 1 => format!("{{{}}}", values.join(",")),
        other => raw(other),
    }
}

/// Encode like `encodeURIComponent`, then restore `@ : $ , ;` for readability.
fn encode_query_component(value: &str) -> String {
    encode_uri_component_strict(value)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
        .replace("%40", "@")
        .replace("%3A", ":")
        .replace("%24", "$")
        .replace("%2C", ",")
        .replace("%3B", ";")
}

fn query_param(value: &VariableValue, name: &str) -> String {
    let key = encode_query_component(&format!("{QUERY_PARAM_PREFIX}{name}"));
    value
        .as_slice()
        .iter()
        .map(|v| format!("{key}={}", encode_query_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(id: &str, value: VariableValue) -> String {
        let registry = FormatRegistry::new();
        registry.format(id, &FormatInput::new(&value, "var"), &[])
    }

    #[test]
    fn test_lucene() {
        assert_eq!(fmt("lucene", "foo bar".into()), "foo\\ bar");
        assert_eq!(fmt("lucene", "-1".into()), "-1");
        assert_eq!(fmt("lucene", "-test".into()), "\\-test");
        assert_eq!(fmt("lucene", vec!["foo bar", "baz"].into()), "(\"foo\\ bar\" OR \"baz\")");
        assert_eq!(fmt("lucene", VariableValue::Multi(vec![])), "__empty__");
        assert_eq!(fmt("lucene", "a:b/c".into()), "a\\:b\\/c");
    }

    #[test]
    fn test_glob() {
        assert_eq!(fmt("glob", "foo".into()), "foo");
        assert_eq!(fmt("glob", vec!["AA", "BB", "C.*"].into()), "{AA,BB,C.*}");
        assert_eq!(fmt("glob", vec!["AA"].into()), "AA");
    }

    #[test]
    fn test_text_uses_display_text() {
        let registry = FormatRegistry::new();
        let value = VariableValue::single("srv-01");
        let text = VariableValue::single("Server 01");
        let input = FormatInput::new(&value, "server").with_text(&text);
        assert_eq!(registry.format("text", &input, &[]), "Server 01");
    }

    #[test]
    fn test_regex() {
        assert_eq!(fmt("regex", "a.b".into()), "a\\.b");
        assert_eq!(fmt("regex", vec!["a.b", "c/d"].into()), "(a\\.b|c\\/d)");
        assert_eq!(fmt("regex", vec!["single"].into()), "single");
    }

    #[test]
    fn test_joins() {
        assert_eq!(fmt("csv", vec!["a", "b"].into()), "a,b");
        assert_eq!(fmt("pipe", vec!["a", "b"].into()), "a|b");
        assert_eq!(fmt("raw", vec!["a", "b"].into()), "a,b");
        assert_eq!(fmt("distributed", vec!["a", "b", "c"].into()), "a,var=b,var=c");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(fmt("singlequote", "it's".into()), "'it\\'s'");
        assert_eq!(fmt("doublequote", vec!["a\"b", "c"].into()), "\"a\\\"b\",\"c\"");
        assert_eq!(fmt("sqlstring", vec!["it's", "b"].into()), "'it''s','b'");
    }

    #[test]
    fn test_html_and_json() {
        assert_eq!(fmt("html", "<a href='x'>&</a>".into()), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
        assert_eq!(fmt("html", vec!["<a>", "b"].into()), "&lt;a&gt;, b");
        assert_eq!(fmt("json", "a".into()), "\"a\"");
        assert_eq!(fmt("json", vec!["a", "b"].into()), "[\"a\",\"b\"]");
    }

    #[test]
    fn test_percent_encode_is_strict() {
        assert_eq!(fmt("percentencode", "foo()bar BAZ".into()), "foo%28%29bar%20BAZ");
        assert_eq!(fmt("percentencode", "!'*".into()), "%21%27%2A");
        assert_eq!(fmt("percentencode", vec!["a", "b"].into()), "%7Ba%2Cb%7D");
    }

    #[test]
    fn test_query_param() {
        assert_eq!(fmt("queryparam", vec!["a b", "c"].into()), "var-var=a%20b&var-var=c");
        assert_eq!(fmt("queryparam", "x:y".into()), "var-var=x:y");
    }

    #[test]
    fn test_unknown_format_falls_back_to_glob() {
        assert_eq!(fmt("does-not-exist", vec!["a", "b"].into()), "{a,b}");
    }

    #[test]
    fn test_custom_format_registration() {
        let mut registry = FormatRegistry::new();
        registry.register("upper", "Upper case", |input, _| input.value.to_string().to_uppercase());
        let value = VariableValue::single("prod");
        assert_eq!(registry.format("upper", &FormatInput::new(&value, "env"), &[]), "PROD");
        assert!(registry.contains("upper"));
    }
}
