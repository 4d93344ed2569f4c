//! Date formatting for the `date` variable format.
//!
//! Values are epoch milliseconds (the time range builtins `$__from` / `$__to`
//! produce them). Supported arguments:
//!
//! - none or `iso`: `2021-03-04T05:06:07.008Z`
//! - `seconds`: epoch seconds, rounded
//! - `ms`: unchanged
//! - anything else: a moment-style pattern such as `YYYY-MM-DD HH:mm`
//!
//! Dates are rendered in UTC. Non-numeric values pass through untouched.

use chrono::{DateTime, Utc};

use crate::variables::VariableValue;

/// Format the first value of `value` according to `args`.
pub fn format_date_value(value: &VariableValue, args: &[&str]) -> String {
    let Some(first) = value.first() else {
        return String::new();
    };

    let Ok(millis) = first.trim().parse::<f64>() else {
        return first.to_string();
    };
    if !millis.is_finite() {
        return first.to_string();
    }

    match args.first().copied().unwrap_or("iso") {
        "ms" => first.to_string(),
        "seconds" => format!("{}", (millis / 1000.0).round() as i64),
        "iso" => match to_datetime(millis) {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            None => first.to_string(),
        },
        _ => {
            let pattern = args.join(":");
            match to_datetime(millis) {
                Some(dt) => dt.format(&moment_to_strftime(&pattern)).to_string(),
                None => first.to_string(),
            }
        }
    }
}

fn to_datetime(millis: f64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}

/// Moment tokens, longest first so that `YYYY` wins over `YY`.
const MOMENT_TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("MMMM", "%B"),
    ("dddd", "%A"),
    ("SSS", "%3f"),
    ("MMM", "%b"),
    ("ddd", "%a"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("ZZ", "%z"),
    ("M", "%-m"),
    ("D", "%-d"),
    ("H", "%-H"),
    ("h", "%-I"),
    ("A", "%p"),
    ("Z", "%:z"),
    ("X", "%s"),
];

/// Translate a moment-style pattern into a chrono `strftime` pattern.
///
/// Text in square brackets is emitted literally; `%` is escaped.
pub fn moment_to_strftime(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    'outer: while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            if let Some(end) = stripped.find(']') {
                out.push_str(&stripped[..end].replace('%', "%%"));
                rest = &stripped[end + 1..];
                continue;
            }
        }

        for (token, replacement) in MOMENT_TOKENS {
            if let Some(stripped) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = stripped;
                continue 'outer;
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-03-04T05:06:07.008Z
    const MILLIS: &str = "1614834367008";

    #[test]
    fn test_iso_is_default() {
        let value = VariableValue::single(MILLIS);
        assert_eq!(format_date_value(&value, &[]), "2021-03-04T05:06:07.008Z");
        assert_eq!(format_date_value(&value, &["iso"]), "2021-03-04T05:06:07.008Z");
    }

    #[test]
    fn test_seconds_and_ms() {
        let value = VariableValue::single(MILLIS);
        assert_eq!(format_date_value(&value, &["seconds"]), "1614834367");
        assert_eq!(format_date_value(&value, &["ms"]), MILLIS);
    }

    #[test]
    fn test_custom_pattern_with_colons() {
        let value = VariableValue::single(MILLIS);
        assert_eq!(format_date_value(&value, &["YYYY-MM-DD HH", "mm"]), "2021-03-04 05:06");
        assert_eq!(format_date_value(&value, &["[Q]YY"]), "Q21");
    }

    #[test]
    fn test_non_numeric_passes_through() {
        let value = VariableValue::single("now-6h");
        assert_eq!(format_date_value(&value, &["seconds"]), "now-6h");
    }
}
