//! Engine configuration for scenevars
//!
//! The engine reads a small TOML file with scheduler and interpolation
//! settings. Every field has a default, so a missing file (or a missing field)
//! is never an error.
//!
//! # Location
//!
//! - `$SCENEVARS_CONFIG` when set
//! - Unix/macOS: `~/.scenevars/config.toml`
//! - Windows: `%LOCALAPPDATA%\scenevars\config.toml`
//!
//! # Format
//!
//! ```toml
//! # What happens to variables whose dependency failed to update:
//! # "wait" (stay queued), "fail" (derive an error) or "proceed" (use last value)
//! dependency_error_policy = "wait"
//!
//! # Format applied to references without an explicit one
//! default_format = "raw"
//!
//! # Warn about dependency cycles on activation
//! detect_cycles = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::CONFIG_PATH_ENV;
use crate::core::VariableError;
use crate::templating::FormatRegistry;

/// What a queued variable does when one of its dependencies is errored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyErrorPolicy {
    /// Stay queued until the dependency recovers
    #[default]
    Wait,
    /// Become errored with a "blocked by failed dependency" error
    Fail,
    /// Update anyway, using the dependency's last good value
    Proceed,
}

/// Scheduler and interpolation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Handling of errored dependencies
    pub dependency_error_policy: DependencyErrorPolicy,
    /// Format for references without an explicit format
    pub default_format: String,
    /// Log dependency cycles when a set activates
    pub detect_cycles: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dependency_error_policy: DependencyErrorPolicy::default(),
            default_format: crate::templating::formats::ids::RAW.to_string(),
            detect_cycles: true,
        }
    }
}

impl EngineConfig {
    /// Load from the default location, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// it names an unknown default format.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from the default location.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::load`].
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!(target: "config", "No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse engine config from {}", path.display()))?;
        config.validate()?;

        tracing::debug!(target: "config", "Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Path of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the home (or local data) directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("scenevars")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".scenevars")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Check that the default format is a builtin format.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::ConfigError`] naming the unknown format.
    pub fn validate(&self) -> Result<(), VariableError> {
        let registry = FormatRegistry::new();
        if registry.contains(&self.default_format) {
            return Ok(());
        }
        Err(VariableError::ConfigError {
            message: format!("default_format '{}' is not a known format", self.default_format),
        })
    }
}
