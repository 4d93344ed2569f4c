//! Variable references in templates.
//!
//! This module holds everything that reads or writes `$name` references:
//!
//! - [`pattern`]: the reference grammar (`$name`, `${name:format}`, `[[name]]`)
//! - [`dependencies`]: which variables a template or structure references
//! - [`formats`]: the registry turning values into strings (`csv`, `lucene`, ...)
//! - [`date`]: the `date` format and its moment-style patterns
//! - [`interpolate`]: substitution against a scope chain
//!
//! # Example
//!
//! ```rust
//! use scenevars::templating::{Interpolator, extract_dependencies};
//! use scenevars::variables::Variable;
//!
//! let template = "rate(http_requests_total{job=\"$job\", env=~\"${env:regex}\"}[5m])";
//! assert_eq!(extract_dependencies(template), vec!["job", "env"]);
//!
//! let scope = vec![
//!     Variable::custom("job", "api").value("api").build(),
//!     Variable::custom("env", "prod").value("prod").build(),
//! ];
//! let query = Interpolator::default().interpolate(template, &scope);
//! assert_eq!(query, "rate(http_requests_total{job=\"api\", env=~\"prod\"}[5m])");
//! ```

pub mod date;
pub mod dependencies;
pub mod formats;
pub mod interpolate;
pub mod pattern;

pub use dependencies::{extract_dependencies, extract_from_serializable, extract_from_value};
pub use formats::{FormatEntry, FormatInput, FormatRegistry, Formatter};
pub use interpolate::{Interpolator, VariableLookup};
pub use pattern::{VariableReference, contains_reference, references};
