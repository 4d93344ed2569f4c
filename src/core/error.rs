//! Error handling for scenevars
//!
//! This module provides the error types and user-friendly error reporting for the
//! variable engine. The error system follows two principles:
//! 1. **Strongly-typed errors** for precise handling inside the engine
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`VariableError`] - Enumerated failure cases of the engine
//! - [`ErrorContext`] - Wrapper that adds user-friendly messages and suggestions
//!
//! # Where errors surface
//!
//! The scheduler never returns errors from `activate`, `deactivate` or
//! `set_value`. A failed update is stored on the variable itself, in the
//! `error` field of its state, as an `Option<VariableError>`. The CLI converts
//! anything that reaches `main` with [`user_friendly_error`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use scenevars::core::{ErrorContext, VariableError};
//!
//! let error = VariableError::VariableNotFound {
//!     name: "hots".to_string(),
//!     suggestions: vec!["host".to_string()],
//! };
//! let context = ErrorContext::new(error)
//!     .with_suggestion("Did you mean 'host'?");
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use strsim::levenshtein;
use thiserror::Error;

/// Maximum edit distance for suggestions, as a percentage of the target length.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// The main error type for engine operations.
///
/// Each variant describes one failure mode. Variants are `Clone` so that an
/// error can be stored on a variable and still be reported to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    /// A variable's update operation failed.
    ///
    /// Raised when the options source (a query, the datasource catalog, a
    /// malformed literal) could not produce an option list.
    #[error("Failed to update variable '{variable}': {reason}")]
    UpdateFailed {
        /// Name of the variable whose update failed
        variable: String,
        /// Human readable failure reason
        reason: String,
    },

    /// A variable cannot update because one of its dependencies failed.
    ///
    /// Only produced under the `fail` dependency-error policy.
    #[error("Variable '{variable}' is blocked by failed dependency '{dependency}'")]
    DependencyBlocked {
        /// The blocked variable
        variable: String,
        /// The dependency that is in the errored state
        dependency: String,
    },

    /// A regex filter could not be compiled.
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        /// The (interpolated) pattern
        pattern: String,
        /// Compiler message from the regex crate
        reason: String,
    },

    /// A collaborator required by a variable kind was not injected.
    #[error("Variable '{variable}' requires a {service} but none is configured")]
    MissingService {
        /// Name of the variable that needed the service
        variable: String,
        /// The missing service (e.g. "query runner")
        service: String,
    },

    /// No variable with this name exists in the scope chain.
    #[error("Variable not found: '{name}'")]
    VariableNotFound {
        /// The requested name
        name: String,
        /// Close matches from the scope
        suggestions: Vec<String>,
    },

    /// The requested format id is not registered.
    #[error("Unknown variable format: '{format}'")]
    UnknownFormat {
        /// The requested format id
        format: String,
    },

    /// Serializing a structure for dependency scanning failed.
    #[error("Failed to serialize state for dependency scanning: {reason}")]
    Serialization {
        /// Message from serde
        reason: String,
    },

    /// A scene definition file could not be read or is invalid.
    #[error("Invalid scene file '{path}': {reason}")]
    SceneFile {
        /// File path as given on the command line
        path: String,
        /// What went wrong
        reason: String,
    },

    /// The engine configuration could not be loaded.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// What went wrong
        message: String,
    },

    /// `activate` was called outside of a tokio runtime.
    #[error("No tokio runtime available to run variable updates")]
    NoRuntime,
}

/// Error context wrapper that provides user-friendly error information.
///
/// Wraps a [`VariableError`] with an optional suggestion and detail line,
/// displayed with terminal colors by the CLI.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: VariableError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context without suggestion or details.
    #[must_use]
    pub const fn new(error: VariableError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Known [`VariableError`]s get tailored suggestions; TOML and I/O errors are
/// mapped onto the closest variant; anything else is wrapped as an update
/// failure carrying the full error chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(variable_error) = error.downcast_ref::<VariableError>() {
        return create_error_context(variable_error.clone());
    }

    if let Some(context) = error.downcast_ref::<ErrorContext>() {
        return ErrorContext {
            error: context.error.clone(),
            suggestion: context.suggestion.clone(),
            details: context.details.clone(),
        };
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(VariableError::ConfigError {
            message: toml_error.message().to_string(),
        })
        .with_suggestion("Check the TOML syntax of the file")
        .with_details("The file could not be parsed as TOML");
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        return ErrorContext::new(VariableError::ConfigError {
            message: io_error.to_string(),
        })
        .with_suggestion("Check that the file exists and is readable");
    }

    let message = format!("{error:#}");
    ErrorContext::new(VariableError::UpdateFailed {
        variable: "unknown".to_string(),
        reason: message,
    })
}

/// Up to three `candidates` close to `target`, closest first.
pub fn similar_names<'a, I>(target: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let limit = (target.len() * SIMILARITY_THRESHOLD_PERCENT / 100).max(1);
    let mut scored: Vec<_> = candidates
        .into_iter()
        .filter(|candidate| *candidate != target)
        .map(|candidate| (levenshtein(target, candidate), candidate))
        .filter(|(distance, _)| *distance <= limit)
        .collect();
    scored.sort();
    scored.dedup();

    scored.into_iter().take(3).map(|(_, candidate)| candidate.to_string()).collect()
}

fn create_error_context(error: VariableError) -> ErrorContext {
    match &error {
        VariableError::VariableNotFound {
            suggestions,
            ..
        } => {
            let context = ErrorContext::new(error.clone())
                .with_details("References are resolved against the scene's variable set");
            if suggestions.is_empty() {
                context.with_suggestion("Run 'scenevars deps <scene>' to list the defined variables")
            } else {
                context.with_suggestion(format!("Did you mean: {}?", suggestions.join(", ")))
            }
        }
        VariableError::UnknownFormat {
            ..
        } => ErrorContext::new(error.clone())
            .with_suggestion("Run 'scenevars formats' to list the available formats"),
        VariableError::InvalidRegex {
            ..
        } => ErrorContext::new(error.clone())
            .with_suggestion("Use '/pattern/flags' or a bare pattern; named groups 'text' and 'value' are supported"),
        VariableError::MissingService {
            ..
        } => ErrorContext::new(error.clone())
            .with_suggestion("Declare [[datasources]] in the scene file")
            .with_details("Query and datasource variables need a collaborator to fetch options"),
        VariableError::SceneFile {
            ..
        } => ErrorContext::new(error.clone())
            .with_suggestion("Check the scene file against the format described in 'scenevars resolve --help'"),
        VariableError::ConfigError {
            ..
        } => ErrorContext::new(error.clone()).with_details(
            "Configuration is read from $SCENEVARS_CONFIG or ~/.scenevars/config.toml",
        ),
        VariableError::DependencyBlocked {
            ..
        } => ErrorContext::new(error.clone())
            .with_suggestion("Fix the failing dependency; its error is shown on that variable"),
        _ => ErrorContext::new(error),
    }
}
