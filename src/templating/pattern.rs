//! Variable reference grammar.
//!
//! A template references variables in one of three syntaxes:
//!
//! | Form | Example |
//! |---|---|
//! | bare | `$host` |
//! | braced | `${host}`, `${host:csv}`, `${host.path}`, `${host.path:csv}` |
//! | bracketed (legacy) | `[[host]]`, `[[host:csv]]` |
//!
//! Names are ASCII word characters. The format part of a braced reference may
//! carry arguments separated by `:` (e.g. `${__from:date:seconds}`).

use regex::{Captures, Regex};
use std::sync::LazyLock;

static VARIABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$([A-Za-z0-9_]+)|\[\[([A-Za-z0-9_]+?)(?::([A-Za-z0-9_]+))?\]\]|\$\{([A-Za-z0-9_]+)(?:\.([^:^\}]+))?(?::([^\}]+))?\}",
    )
    .expect("variable reference pattern is valid")
});

/// A single variable reference found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReference<'t> {
    /// The full matched text, e.g. `${host:csv}`
    pub matched: &'t str,
    /// Byte range of the match in the template
    pub start: usize,
    /// End of the match (exclusive)
    pub end: usize,
    /// The referenced variable name
    pub name: &'t str,
    /// Optional field path (`${name.path}`)
    pub field_path: Option<&'t str>,
    /// Optional format id with arguments (`csv`, `date:seconds`)
    pub format: Option<&'t str>,
}

impl<'t> VariableReference<'t> {
    fn from_captures(caps: &Captures<'t>) -> Option<Self> {
        let whole = caps.get(0)?;
        let (name, field_path, format) = if let Some(bare) = caps.get(1) {
            (bare.as_str(), None, None)
        } else if let Some(bracketed) = caps.get(2) {
            (bracketed.as_str(), None, caps.get(3).map(|m| m.as_str()))
        } else {
            let braced = caps.get(4)?;
            (braced.as_str(), caps.get(5).map(|m| m.as_str()), caps.get(6).map(|m| m.as_str()))
        };

        Some(Self {
            matched: whole.as_str(),
            start: whole.start(),
            end: whole.end(),
            name,
            field_path,
            format,
        })
    }

    /// Split the format part into the format id and its arguments.
    ///
    /// `date:seconds` becomes `("date", ["seconds"])`.
    pub fn format_parts(&self) -> Option<(&'t str, Vec<&'t str>)> {
        let format = self.format?;
        let mut parts = format.split(':');
        let id = parts.next()?;
        Some((id, parts.collect()))
    }
}

/// Iterate over every variable reference in `template`, in order.
pub fn references(template: &str) -> impl Iterator<Item = VariableReference<'_>> {
    VARIABLE_REFERENCE.captures_iter(template).filter_map(|caps| VariableReference::from_captures(&caps))
}

/// Quick check whether `template` contains any variable reference.
pub fn contains_reference(template: &str) -> bool {
    VARIABLE_REFERENCE.is_match(template)
}
