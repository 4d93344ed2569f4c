//! scenevars - template variable engine for dashboard scenes
//!
//! A dashboard scene declares variables (`$env`, `$job`, `$instance`) whose
//! option lists may depend on each other: `$instance` queries
//! `up{job="$job"}`, so it can only update once `$job` has a value. This crate
//! keeps such a set of variables consistent:
//!
//! - it finds which variables a variable depends on by scanning its
//!   configuration for references,
//! - it updates variables concurrently, but never before their dependencies
//!   have settled, and requeues dependents when a value changes,
//! - it reconciles the current selection with freshly fetched options,
//! - it interpolates templates (`rate(x{job=~"${job:regex}"}[5m])`) against a
//!   chain of nested scopes, through a registry of value formats.
//!
//! # Modules
//!
//! - [`variables`] - the variable kinds, their state, update operations and
//!   multi-value reconciliation
//! - [`scene`] - [`scene::VariableSet`] and its update scheduler, the
//!   dependency graph and the scene cache
//! - [`templating`] - reference grammar, dependency extraction, formats and
//!   interpolation
//! - [`config`] - engine configuration (`~/.scenevars/config.toml`)
//! - [`core`] - error types and user-facing error reporting
//! - [`cli`] - the `scenevars` command line and scene definition files
//! - [`constants`] - shared sentinel values
//!
//! # Example
//!
//! ```rust,no_run
//! use scenevars::scene::VariableSet;
//! use scenevars::variables::Variable;
//!
//! # async fn example() {
//! let set = VariableSet::builder()
//!     .variable(Variable::custom("env", "dev, staging, prod").build())
//!     .variable(Variable::custom("cluster", "${env}-eu, ${env}-us").build())
//!     .build();
//!
//! set.activate();
//! set.settled().await;
//! assert_eq!(set.interpolate("$env/$cluster"), "dev/dev-eu");
//!
//! set.set_value("env", "prod");
//! set.settled().await;
//! assert_eq!(set.interpolate("${cluster:csv}"), "prod-eu");
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod scene;
pub mod templating;
pub mod variables;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
