//! Global constants used throughout the scenevars codebase.
//!
//! This module contains sentinel values, display strings and format identifiers
//! that are shared between the variable, scheduler and templating modules.
//! Defining them centrally keeps the magic strings discoverable.

/// Value stored on a variable whose "All" option is selected.
///
/// Interpolation expands it to the custom all value when one is configured,
/// or to every option value otherwise.
pub const ALL_VARIABLE_VALUE: &str = "$__all";

/// Display text for the "All" option.
pub const ALL_VARIABLE_TEXT: &str = "All";

/// Value assigned to a single-select variable when its option list is empty.
pub const NO_VALUE: &str = "";

/// Rendered by the lucene formatter for an empty multi-value selection.
pub const EMPTY_SET_SENTINEL: &str = "__empty__";

/// Prefix used by the `queryparam` formatter for parameter names.
pub const QUERY_PARAM_PREFIX: &str = "var-";

/// Separator used when joining multi-value display texts.
pub const MULTI_TEXT_SEPARATOR: &str = " + ";

/// Placeholder option shown by datasource variables with no matching instance.
pub const NO_DATASOURCES_TEXT: &str = "No data sources found";

/// Label and value of the optional "default" datasource option.
pub const DEFAULT_DATASOURCE_OPTION: &str = "default";

/// Builtin reference resolving to the start of the time range (epoch millis).
pub const BUILTIN_FROM: &str = "__from";

/// Builtin reference resolving to the end of the time range (epoch millis).
pub const BUILTIN_TO: &str = "__to";

/// Environment variable overriding the engine configuration path.
pub const CONFIG_PATH_ENV: &str = "SCENEVARS_CONFIG";
