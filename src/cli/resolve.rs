//! Resolve the variables of a scene file.
//!
//! Builds the scene's variable sets, activates them and waits until every
//! update has settled. Selections can be overridden with `--set`, which
//! requeues the dependents of the changed variable exactly like a user picking
//! a value in a dashboard would.
//!
//! # Examples
//!
//! ```bash
//! scenevars resolve overview.toml
//! scenevars resolve overview.toml --set env=prod --set job=api,web
//! scenevars resolve overview.toml --template 'up{job=~"${job:regex}"}'
//! scenevars resolve overview.toml --format json
//! ```

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;

use super::scene_file::{LoadedScene, SceneFile};
use super::{CliConfig, OutputFormat};
use crate::core::{VariableError, similar_names};
use crate::scene::VariableSet;
use crate::variables::{Variable, VariableValue};

/// Resolve every variable of a scene file and print the result.
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Scene definition file (TOML)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Select a value once the scene has settled: `name=value`.
    ///
    /// Multi-value variables accept a comma separated list. May be repeated;
    /// overrides are applied in order.
    #[arg(short = 's', long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Interpolate this template against the settled scene and print it
    #[arg(short, long)]
    pub template: Option<String>,

    /// Nested scene the template is interpolated in (defaults to the root)
    #[arg(long)]
    pub scene: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Tree)]
    pub format: OutputFormat,

    /// Give up waiting for updates after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

/// A `--set` override.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Override {
    name: String,
    value: String,
}

impl Override {
    fn parse(raw: &str) -> Result<Self> {
        let Some((name, value)) = raw.split_once('=') else {
            bail!("Invalid override '{raw}': expected NAME=VALUE");
        };
        let name = name.trim().trim_start_matches('$');
        if name.is_empty() {
            bail!("Invalid override '{raw}': variable name is empty");
        }
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn value_for(&self, variable: &Variable) -> VariableValue {
        if variable.state().is_multi {
            VariableValue::multi(self.value.split(',').map(str::trim).filter(|v| !v.is_empty()))
        } else {
            VariableValue::single(self.value.clone())
        }
    }
}

impl ResolveCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Fails when the scene file is invalid, an override names an unknown
    /// variable, the scene does not settle in time, or any variable ends up
    /// errored (after printing the result).
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let overrides =
            self.overrides.iter().map(|raw| Override::parse(raw)).collect::<Result<Vec<_>>>()?;

        let engine = config.engine_config().await?;
        let scene = SceneFile::load(&self.file).await?;
        let loaded = scene.build(engine)?;

        loaded.activate();
        let result = self.run(&loaded, &overrides).await;
        loaded.deactivate();
        result
    }

    async fn run(&self, loaded: &LoadedScene, overrides: &[Override]) -> Result<()> {
        self.wait(loaded).await?;

        for item in overrides {
            let (set, variable) = find_variable(loaded, &item.name)?;
            let value = item.value_for(&variable);
            if set.set_value(&item.name, value) {
                tracing::info!(target: "cli", "Selected {}={} in '{}'", item.name, item.value, set.name());
            }
            self.wait(loaded).await?;
        }

        match self.format {
            OutputFormat::Json => self.print_json(loaded)?,
            OutputFormat::Text => self.print_text(loaded)?,
            OutputFormat::Tree => self.print_tree(loaded)?,
        }

        let first_error = loaded
            .sets()
            .flat_map(VariableSet::variables)
            .find_map(|variable| variable.error());
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn wait(&self, loaded: &LoadedScene) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(self.timeout), loaded.settled())
            .await
            .with_context(|| format!("Scene did not settle within {}s", self.timeout))
    }

    fn template_scope<'a>(&self, loaded: &'a LoadedScene) -> Result<&'a VariableSet> {
        let Some(name) = &self.scene else {
            return Ok(&loaded.root);
        };
        if let Some(set) = loaded.sets().find(|set| set.name() == name) {
            return Ok(set);
        }

        let known: Vec<&str> = loaded.sets().map(VariableSet::name).collect();
        let suggestions = similar_names(name, known.iter().copied());
        if suggestions.is_empty() {
            bail!("Unknown scene '{}'. Scenes in this file: {}", name, known.join(", "));
        }
        bail!("Unknown scene '{}'. Did you mean: {}?", name, suggestions.join(", "));
    }

    fn interpolated(&self, loaded: &LoadedScene) -> Result<Option<String>> {
        match &self.template {
            Some(template) => Ok(Some(self.template_scope(loaded)?.interpolate(template))),
            None => Ok(None),
        }
    }

    fn print_tree(&self, loaded: &LoadedScene) -> Result<()> {
        for (index, set) in loaded.sets().enumerate() {
            if index > 0 {
                println!();
            }
            let title = match set.parent() {
                Some(parent) => format!("{} (in {})", set.name(), parent.name()),
                None => set.name().to_string(),
            };
            println!("{}", title.bold());

            let variables = set.variables();
            for (i, variable) in variables.iter().enumerate() {
                let branch = if i + 1 == variables.len() { "└──" } else { "├──" };
                let state = variable.state();
                let value = display_value(&state.value, &state.text);
                let kind = format!("({})", variable.type_name()).dimmed();
                match &state.error {
                    Some(error) => {
                        println!("{} {} {} {}", branch, state.name.cyan(), kind, error.to_string().red());
                    }
                    None => println!("{} {} = {} {}", branch, state.name.cyan(), value.green(), kind),
                }
            }
        }

        if let Some(output) = self.interpolated(loaded)? {
            println!();
            println!("{}", output);
        }
        Ok(())
    }

    fn print_text(&self, loaded: &LoadedScene) -> Result<()> {
        for set in loaded.sets() {
            let prefix = if set.parent().is_some() {
                format!("{}/", set.name())
            } else {
                String::new()
            };
            for variable in set.variables() {
                println!("{}{}={}", prefix, variable.name(), variable.value().to_vec().join(","));
            }
        }
        if let Some(output) = self.interpolated(loaded)? {
            println!("{}", output);
        }
        Ok(())
    }

    fn print_json(&self, loaded: &LoadedScene) -> Result<()> {
        let scenes: Vec<Value> = loaded
            .sets()
            .map(|set| {
                let variables: Vec<Value> = set.variables().iter().map(|v| variable_json(v)).collect();
                json!({
                    "name": set.name(),
                    "parent": set.parent().map(VariableSet::name),
                    "variables": variables,
                })
            })
            .collect();

        let mut output = json!({ "scenes": scenes });
        if let Some(interpolated) = self.interpolated(loaded)? {
            output["template"] = Value::String(interpolated);
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}

fn display_value(value: &VariableValue, text: &VariableValue) -> String {
    if value == text {
        value.to_string()
    } else {
        format!("{} [{}]", text, value.to_vec().join(","))
    }
}

fn variable_json(variable: &Variable) -> Value {
    let state = variable.state();
    json!({
        "name": state.name,
        "type": variable.type_name(),
        "value": state.value,
        "text": state.text,
        "options": state.options,
        "error": state.error.map(|e| e.to_string()),
    })
}

/// The set declaring `name`, searching the root first.
fn find_variable<'a>(
    loaded: &'a LoadedScene,
    name: &str,
) -> Result<(&'a VariableSet, std::sync::Arc<Variable>), VariableError> {
    for set in loaded.sets() {
        if let Some(variable) = set.get(name) {
            return Ok((set, variable));
        }
    }

    let names: Vec<String> =
        loaded.sets().flat_map(VariableSet::variables).map(|variable| variable.name()).collect();
    Err(VariableError::VariableNotFound {
        name: name.to_string(),
        suggestions: similar_names(name, names.iter().map(String::as_str)),
    })
}
