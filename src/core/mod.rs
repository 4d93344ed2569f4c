//! Core types for scenevars
//!
//! This module holds the error system shared by every other module:
//! - [`VariableError`] - Enumerated error types covering the engine's failure modes
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions and details
//! - [`user_friendly_error`] - Convert any error to the user-friendly format

pub mod error;

pub use error::{ErrorContext, VariableError, similar_names, user_friendly_error};
