//! Try interpolation formats from the command line.
//!
//! `format` renders values exactly as `${name:format}` would inside a
//! template; `formats` lists what is registered.
//!
//! ```bash
//! scenevars format lucene "api server"          # api\ server
//! scenevars format regex api web                 # (api|web)
//! scenevars format date:YYYY-MM-DD 1700000000000 # 2023-11-14
//! scenevars format queryparam --name env prod    # var-env=prod
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;

use super::CliConfig;
use crate::core::{ErrorContext, VariableError, similar_names};
use crate::templating::{FormatInput, FormatRegistry};
use crate::variables::VariableValue;

/// Render values with an interpolation format.
#[derive(Args, Debug)]
pub struct FormatCommand {
    /// Format id, optionally followed by arguments: `date:seconds`
    #[arg(value_name = "FORMAT")]
    pub format: String,

    /// Values to render; more than one value renders a multi-value selection
    #[arg(value_name = "VALUE", required = true)]
    pub values: Vec<String>,

    /// Treat a single value as a one-element multi-value selection
    #[arg(long)]
    pub multi: bool,

    /// Display texts, one per value, used by the `text` format
    #[arg(long = "text", value_name = "TEXT")]
    pub texts: Vec<String>,

    /// Variable name seen by name-aware formats (`distributed`, `queryparam`)
    #[arg(long, default_value = "var")]
    pub name: String,
}

impl FormatCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Fails when the format id is not registered.
    pub async fn execute(self, _config: &CliConfig) -> Result<()> {
        let registry = FormatRegistry::new();
        println!("{}", self.render(&registry)?);
        Ok(())
    }

    fn render(&self, registry: &FormatRegistry) -> Result<String, ErrorContext> {
        let mut parts = self.format.split(':');
        let id = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let Some(entry) = registry.get(id) else {
            return Err(unknown_format(id, registry));
        };

        let value = to_value(&self.values, self.multi);
        let text = if self.texts.is_empty() {
            value.clone()
        } else {
            to_value(&self.texts, self.multi)
        };
        let input = FormatInput::new(&value, &self.name).with_text(&text);
        Ok(entry.apply(&input, &args))
    }
}

/// List the registered interpolation formats.
#[derive(Args, Debug)]
pub struct FormatsCommand {
    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,
}

impl FormatsCommand {
    /// Run the command.
    ///
    /// # Errors
    ///
    /// Fails only if JSON serialization fails.
    pub fn execute(self) -> Result<()> {
        let registry = FormatRegistry::new();

        if self.json {
            let entries: Vec<_> = registry
                .entries()
                .map(|entry| json!({ "id": entry.id, "description": entry.description }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        let width = registry.entries().map(|entry| entry.id.len()).max().unwrap_or(0);
        for entry in registry.entries() {
            let id = format!("{:width$}", entry.id);
            println!("{}  {}", id.cyan(), entry.description);
        }
        Ok(())
    }
}

fn to_value(values: &[String], multi: bool) -> VariableValue {
    match values {
        [single] if !multi => VariableValue::single(single.clone()),
        _ => VariableValue::multi(values.iter().cloned()),
    }
}

fn unknown_format(id: &str, registry: &FormatRegistry) -> ErrorContext {
    let error = VariableError::UnknownFormat {
        format: id.to_string(),
    };
    let suggestions = similar_names(id, registry.entries().map(|entry| entry.id.as_str()));
    if suggestions.is_empty() {
        ErrorContext::new(error).with_suggestion("Run 'scenevars formats' to list the available formats")
    } else {
        ErrorContext::new(error).with_suggestion(format!("Did you mean: {}?", suggestions.join(", ")))
    }
}
