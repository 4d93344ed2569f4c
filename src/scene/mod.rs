//! Variable sets, their update scheduler and the scene cache.
//!
//! - [`set`]: [`VariableSet`], the scope that owns variables and keeps them
//!   updated in dependency order
//! - [`graph`]: the petgraph-backed dependency graph used for ordering, cycle
//!   warnings and the `deps` tree
//! - [`status`]: per-variable [`UpdateStatus`]
//! - [`cache`]: [`SceneCache`], reuse of built sets across scene visits
//!
//! # Nesting
//!
//! A set may have a parent. References that do not resolve locally are looked
//! up in the ancestors; a child reacts to changes of ancestor variables it
//! references and holds its own dependents back while they load.

pub mod cache;
pub mod graph;
pub mod set;
pub mod status;

pub use cache::SceneCache;
pub use graph::{DependencyGraph, GraphNode};
pub use set::{VariableSet, VariableSetBuilder};
pub use status::UpdateStatus;
