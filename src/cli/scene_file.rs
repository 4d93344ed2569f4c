//! Scene definition files read by the CLI.
//!
//! A scene file is TOML describing the variables of one scene, optional
//! nested scenes, the datasource instances visible to datasource variables and
//! canned responses served to query variables. It lets the engine run from
//! the command line without a real datasource.
//!
//! ```toml
//! name = "service overview"
//!
//! [time_range]
//! last = "6h"
//!
//! [[datasources]]
//! uid = "prom-main"
//! name = "Prometheus"
//! type = "prometheus"
//! is_default = true
//!
//! [[responses]]
//! match = "label_values(job)"
//! rows = [{ text = "api" }, { text = "web" }]
//!
//! [[variables]]
//! name = "env"
//! type = "custom"
//! query = "dev, staging, prod"
//!
//! [[variables]]
//! name = "job"
//! type = "query"
//! datasource = { uid = "prom-main" }
//! query = "label_values(job)"
//!
//! [[scenes]]
//! name = "details"
//! variables = [{ name = "instance", type = "custom", query = "$job-1, $job-2" }]
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::config::EngineConfig;
use crate::core::VariableError;
use crate::scene::VariableSet;
use crate::variables::{
    DataSourceInstance, MetricFindValue, QueryRequest, QueryRunner, QueryStream, Services,
    TimeRange, Variable, VariableHide, VariableKind, VariableValue,
};

static RELATIVE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([smhdw])$").expect("time span pattern is valid"));

/// Time range of a scene file: absolute bounds or a span ending now.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimeRangeDefinition {
    /// `from` / `to` as RFC 3339 timestamps
    Absolute(TimeRange),
    /// `last = "6h"`
    Relative {
        /// Span like `30m`, `6h`, `7d`
        last: String,
    },
}

impl TimeRangeDefinition {
    /// Resolve to an absolute range.
    pub fn resolve(&self) -> Result<TimeRange, VariableError> {
        match self {
            Self::Absolute(range) => Ok(*range),
            Self::Relative {
                last,
            } => parse_span(last).map(TimeRange::last).ok_or_else(|| VariableError::ConfigError {
                message: format!("invalid time span '{last}', expected e.g. 30m, 6h or 7d"),
            }),
        }
    }
}

fn parse_span(span: &str) -> Option<Duration> {
    let captures = RELATIVE_RANGE.captures(span.trim())?;
    let amount: i64 = captures[1].parse().ok()?;
    match &captures[2] {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => None,
    }
}

/// One variable of a scene file.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableDefinition {
    /// Variable name
    pub name: String,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Display hint
    #[serde(default)]
    pub hide: VariableHide,
    /// Initially selected value
    #[serde(default)]
    pub value: Option<VariableValue>,
    /// Allow several values
    #[serde(default)]
    pub multi: bool,
    /// Offer "All"
    #[serde(default)]
    pub include_all: bool,
    /// Custom value for "All"
    #[serde(default)]
    pub all_value: Option<String>,
    /// Fall back to "All"
    #[serde(default)]
    pub default_to_all: bool,
    /// Kind and its configuration, tagged by `type`
    #[serde(flatten)]
    pub kind: VariableKind,
}

impl VariableDefinition {
    /// Build the variable.
    pub fn build(&self) -> Arc<Variable> {
        let mut kind = self.kind.clone();
        // `value` is claimed by the definition, so constants read it from there
        if let (VariableKind::Constant(config), Some(value)) = (&mut kind, &self.value)
            && config.value.is_empty()
        {
            config.value = value.to_string();
        }

        let mut builder = Variable::builder(self.name.clone(), kind)
            .hide(self.hide)
            .multi(self.multi)
            .include_all(self.include_all)
            .default_to_all(self.default_to_all);
        if let Some(label) = &self.label {
            builder = builder.label(label.clone());
        }
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }
        if let Some(value) = &self.value {
            builder = builder.value(value.clone());
        }
        if let Some(all_value) = &self.all_value {
            builder = builder.all_value(all_value.clone());
        }
        builder.build()
    }
}

/// A nested scene.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedScene {
    /// Scene name
    pub name: String,
    /// Variables of the nested scope
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
}

/// A canned response for query variables.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    /// Substring of the interpolated query this response answers
    #[serde(rename = "match")]
    pub pattern: String,
    /// Rows returned
    #[serde(default)]
    pub rows: Vec<MetricFindValue>,
    /// Fail the query with this message instead
    #[serde(default)]
    pub error: Option<String>,
}

/// Query runner answering from [`QueryResponse`]s.
#[derive(Debug, Clone, Default)]
pub struct StaticQueryRunner {
    responses: Vec<QueryResponse>,
}

impl StaticQueryRunner {
    /// Runner serving `responses`, first match wins.
    pub const fn new(responses: Vec<QueryResponse>) -> Self {
        Self {
            responses,
        }
    }
}

impl QueryRunner for StaticQueryRunner {
    fn run_query(&self, request: QueryRequest) -> QueryStream {
        let query = match &request.query {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let response = self.responses.iter().find(|response| query.contains(&response.pattern));

        let batch = match response {
            Some(QueryResponse {
                error: Some(message),
                ..
            }) => Err(anyhow::anyhow!("{message}")),
            Some(response) => Ok(response.rows.clone()),
            None => {
                tracing::debug!(
                    target: "cli",
                    "No canned response for query of '{}': {}",
                    request.variable,
                    query
                );
                Ok(Vec::new())
            }
        };
        futures::stream::iter([batch]).boxed()
    }
}

/// A parsed scene file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SceneFile {
    /// Scene name
    #[serde(default)]
    pub name: Option<String>,
    /// Time range of the root scene
    #[serde(default)]
    pub time_range: Option<TimeRangeDefinition>,
    /// Datasource instances listed by datasource variables
    #[serde(default)]
    pub datasources: Vec<DataSourceInstance>,
    /// Canned responses for query variables
    #[serde(default)]
    pub responses: Vec<QueryResponse>,
    /// Variables of the root scene
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    /// Nested scenes
    #[serde(default)]
    pub scenes: Vec<NestedScene>,
}

/// The sets built from a scene file.
#[derive(Debug, Clone)]
pub struct LoadedScene {
    /// Root set
    pub root: VariableSet,
    /// Nested sets, children of `root`
    pub children: Vec<VariableSet>,
}

impl LoadedScene {
    /// Root first, then the nested sets.
    pub fn sets(&self) -> impl Iterator<Item = &VariableSet> {
        std::iter::once(&self.root).chain(self.children.iter())
    }

    /// Activate every set, parents first.
    pub fn activate(&self) {
        for set in self.sets() {
            set.activate();
        }
    }

    /// Wait until every set has settled.
    pub async fn settled(&self) {
        for set in self.sets() {
            set.settled().await;
        }
    }

    /// Deactivate every set, children first.
    pub fn deactivate(&self) {
        for set in self.children.iter().rev() {
            set.deactivate();
        }
        self.root.deactivate();
    }
}

impl SceneFile {
    /// Read and validate a scene file.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::SceneFile`] when the file is not valid TOML or
    /// defines a variable name twice in one scope.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read scene file {}", path.display()))?;
        let scene = Self::parse(&content).map_err(|reason| VariableError::SceneFile {
            path: path.display().to_string(),
            reason,
        })?;
        tracing::debug!(
            target: "cli",
            "Loaded scene file {} with {} variables",
            path.display(),
            scene.variables.len()
        );
        Ok(scene)
    }

    /// Parse and validate scene TOML.
    pub fn parse(content: &str) -> Result<Self, String> {
        let scene: Self = toml::from_str(content).map_err(|e| e.message().to_string())?;
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> Result<(), String> {
        check_unique(self.name.as_deref().unwrap_or("scene"), &self.variables)?;
        for nested in &self.scenes {
            check_unique(&nested.name, &nested.variables)?;
        }
        if let Some(range) = &self.time_range {
            range.resolve().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Collaborators serving this file's datasources and responses.
    pub fn services(&self) -> Services {
        Services::new()
            .with_query_runner(Arc::new(StaticQueryRunner::new(self.responses.clone())))
            .with_datasources(Arc::new(self.datasources.clone()))
    }

    /// Build the root set and one child set per nested scene.
    ///
    /// # Errors
    ///
    /// Returns an error when the time range cannot be resolved.
    pub fn build(&self, config: EngineConfig) -> Result<LoadedScene, VariableError> {
        let mut builder = VariableSet::builder()
            .name(self.name.clone().unwrap_or_else(|| "scene".to_string()))
            .config(config)
            .services(self.services())
            .variables(self.variables.iter().map(VariableDefinition::build));
        if let Some(range) = &self.time_range {
            builder = builder.time_range(range.resolve()?);
        }
        let root = builder.build();

        let children = self
            .scenes
            .iter()
            .map(|nested| {
                VariableSet::builder()
                    .name(nested.name.clone())
                    .parent(&root)
                    .variables(nested.variables.iter().map(VariableDefinition::build))
                    .build()
            })
            .collect();

        Ok(LoadedScene {
            root,
            children,
        })
    }
}

fn check_unique(scope: &str, variables: &[VariableDefinition]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for variable in variables {
        if !seen.insert(variable.name.as_str()) {
            return Err(format!("variable '{}' is defined twice in '{}'", variable.name, scope));
        }
    }
    Ok(())
}
