//! Command-line interface for scenevars.
//!
//! The CLI runs the variable engine against scene definition files (see
//! [`scene_file`]) so a scene's variables can be resolved, inspected and
//! formatted without a dashboard around them.
//!
//! # Available Commands
//!
//! - `resolve` - Activate a scene, wait for every variable to settle and print
//!   the resulting values
//! - `deps` - Print the dependency tree of a scene's variables
//! - `format` - Render a value with one of the interpolation formats
//! - `formats` - List the registered formats
//!
//! # Examples
//!
//! ```bash
//! # Resolve every variable of a scene
//! scenevars resolve overview.toml
//!
//! # Override a selection and print JSON
//! scenevars resolve overview.toml --set env=prod --format json
//!
//! # Interpolate a template once the scene has settled
//! scenevars resolve overview.toml --template 'up{env=~"${env:regex}"}'
//!
//! # Show dependencies
//! scenevars deps overview.toml
//!
//! # Try a format
//! scenevars format lucene "api server" web
//! ```
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug logging
//! - `--quiet` - Only log errors
//! - `--config` - Path to the engine configuration file

mod deps;
mod format;
mod resolve;
pub mod scene_file;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::EngineConfig;

/// Runtime configuration derived from the global flags.
///
/// Kept separate from [`Cli`] so tests and embedders can drive command
/// execution without going through argument parsing.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Filter directive for the log subscriber (`"debug"`, `"info"`, ...).
    ///
    /// `None` leaves the filter to `RUST_LOG`.
    pub log_level: Option<String>,

    /// Engine configuration file overriding the default location.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Create a configuration with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the engine configuration this CLI run should use.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file exists but is invalid.
    pub async fn engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::load_with_optional(self.config_path.clone()).await
    }
}

/// Output format shared by the inspection commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Tree,
    /// One `name=value` line per variable
    Text,
    /// Structured JSON for scripts
    Json,
}

/// Resolve, inspect and format dashboard template variables.
#[derive(Parser)]
#[command(
    name = "scenevars",
    about = "Dashboard template variable engine",
    version,
    long_about = "scenevars resolves the template variables of a dashboard scene in dependency order, \
                  reconciles their selections and interpolates templates against them."
)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logging).
    ///
    /// Shows scheduler decisions: which variables are queued, started,
    /// cancelled and committed. Equivalent to `RUST_LOG=debug`.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the engine configuration file.
    ///
    /// Overrides `$SCENEVARS_CONFIG` and `~/.scenevars/config.toml`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every variable of a scene file.
    ///
    /// See [`resolve::ResolveCommand`].
    Resolve(resolve::ResolveCommand),

    /// Print the dependency tree of a scene file.
    ///
    /// See [`deps::DepsCommand`].
    Deps(deps::DepsCommand),

    /// Render values with an interpolation format.
    ///
    /// See [`format::FormatCommand`].
    Format(format::FormatCommand),

    /// List the available interpolation formats.
    Formats(format::FormatsCommand),
}

impl Cli {
    /// Execute the parsed command line.
    ///
    /// # Errors
    ///
    /// Returns whatever the subcommand fails with; `main` turns it into a
    /// user-friendly message.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Build a [`CliConfig`] from the global flags.
    ///
    /// `--verbose` selects `debug`, `--quiet` selects `error`, and without
    /// either the level is left to `RUST_LOG` (defaulting to `warn`).
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Execute with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns the subcommand's error.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Resolve(cmd) => cmd.execute(&config).await,
            Commands::Deps(cmd) => cmd.execute(&config).await,
            Commands::Format(cmd) => cmd.execute(&config).await,
            Commands::Formats(cmd) => cmd.execute(),
        }
    }
}
