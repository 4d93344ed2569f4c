//! Integration test suite for scenevars
//!
//! End-to-end tests of the variable engine through its public API and of the
//! `scenevars` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scheduling**: dependency ordering, concurrency, requeueing, cancellation
//! - **error_policies**: errored dependencies under each policy
//! - **nested_scopes**: child sets, ancestor references, shadowing
//! - **query_variables**: query runners, time ranges, regex filtering, datasources
//! - **interpolation**: formats and multi-value selections end to end
//! - **cli**: the `resolve`, `deps`, `format` and `formats` commands

mod cli;
mod error_policies;
mod interpolation;
mod nested_scopes;
mod query_variables;
mod scheduling;
