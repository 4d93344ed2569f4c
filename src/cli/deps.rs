//! Show the dependency tree of a scene file.
//!
//! Each tree starts at a variable nothing else depends on and lists what it
//! references, so a variable appears under every variable that needs it:
//!
//! ```text
//! overview
//! └── $instance
//!     ├── $job
//!     │   └── $ds
//!     └── $env
//! ```
//!
//! Nested scenes are printed after the root, including references to
//! ancestor variables. Cycles are reported but do not fail the command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

use super::scene_file::SceneFile;
use super::{CliConfig, OutputFormat};
use crate::scene::{DependencyGraph, GraphNode};

/// Print the dependency tree of a scene file.
#[derive(Args, Debug)]
pub struct DepsCommand {
    /// Scene definition file (TOML)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Tree)]
    pub format: OutputFormat,
}

impl DepsCommand {
    /// Run the command. The scene is built but never activated.
    ///
    /// # Errors
    ///
    /// Fails when the configuration or the scene file is invalid.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.engine_config().await?;
        let scene = SceneFile::load(&self.file).await?;
        let loaded = scene.build(engine)?;

        match self.format {
            OutputFormat::Tree => {
                for (index, set) in loaded.sets().enumerate() {
                    if index > 0 {
                        println!();
                    }
                    println!("{}", set.name().bold());
                    print!("{}", set.to_tree_string());

                    if let Err(cycle) = set.dependency_graph().detect_cycles() {
                        println!("{} {}", "warning:".yellow().bold(), cycle);
                    }
                }
            }
            OutputFormat::Text => {
                for set in loaded.sets() {
                    let graph = set.dependency_graph();
                    for node in ordered_nodes(&graph) {
                        println!("{}: {}", node.name, dependency_names(&graph, &node).join(" "));
                    }
                }
            }
            OutputFormat::Json => {
                let scenes: Vec<_> = loaded
                    .sets()
                    .map(|set| {
                        let graph = set.dependency_graph();
                        let variables: Vec<_> = graph
                            .nodes()
                            .iter()
                            .map(|node| {
                                json!({
                                    "name": node.name,
                                    "dependencies": dependency_names(&graph, node),
                                })
                            })
                            .collect();
                        json!({
                            "name": set.name(),
                            "cycle": graph.detect_cycles().err().map(|e| e.to_string()),
                            "variables": variables,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json!({ "scenes": scenes }))?);
            }
        }

        Ok(())
    }
}

/// Dependencies before their dependents, or declaration order when the
/// graph has a cycle.
fn ordered_nodes(graph: &DependencyGraph) -> Vec<GraphNode> {
    graph.topological_order().unwrap_or_else(|_| graph.nodes())
}

fn dependency_names(graph: &DependencyGraph, node: &GraphNode) -> Vec<String> {
    graph.dependencies_of(node.key).into_iter().map(|dep| dep.name).collect()
}
