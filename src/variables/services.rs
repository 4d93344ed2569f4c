//! Collaborator contracts injected into the engine.
//!
//! The engine never talks to a datasource itself. Query variables call a
//! [`QueryRunner`], datasource variables list instances through a
//! [`DataSourceCatalog`]. Both are bundled in [`Services`] and handed to the
//! root [`VariableSet`](crate::scene::VariableSet); nested sets inherit them.

use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Absolute time range handed to queries and to the `$__from` / `$__to` builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range
    pub from: DateTime<Utc>,
    /// End of the range
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Range between two instants.
    pub const fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
        }
    }

    /// The range ending now and spanning `span`.
    pub fn last(span: Duration) -> Self {
        let to = Utc::now();
        Self {
            from: to - span,
            to,
        }
    }
}

/// Reference to a datasource. The uid may be templated (`${ds}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceRef {
    /// Datasource uid
    pub uid: String,
    /// Plugin type, when known
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl DataSourceRef {
    /// Reference by uid only.
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            plugin: None,
        }
    }
}

/// The request a query variable sends to its [`QueryRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Interpolated datasource reference
    pub datasource: DataSourceRef,
    /// Interpolated query payload
    pub query: Value,
    /// Time range of the nearest scope, if any
    pub time_range: Option<TimeRange>,
    /// Name of the requesting variable
    pub variable: String,
}

/// A row returned by a variable query. Either field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFindValue {
    /// Display text
    #[serde(default)]
    pub text: Option<String>,
    /// Raw value
    #[serde(default)]
    pub value: Option<String>,
}

impl MetricFindValue {
    /// Row with only a text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            value: None,
        }
    }

    /// Row with text and value.
    pub fn pair(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            value: Some(value.into()),
        }
    }
}

/// Stream of row batches. Dropping it cancels the underlying request.
pub type QueryStream = BoxStream<'static, anyhow::Result<Vec<MetricFindValue>>>;

/// Runs a query against a named datasource.
pub trait QueryRunner: Send + Sync {
    /// Start the query. Rows of every emitted batch are concatenated.
    fn run_query(&self, request: QueryRequest) -> QueryStream;
}

impl<F> QueryRunner for F
where
    F: Fn(QueryRequest) -> QueryStream + Send + Sync,
{
    fn run_query(&self, request: QueryRequest) -> QueryStream {
        self(request)
    }
}

/// A configured datasource instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceInstance {
    /// Stable identifier
    pub uid: String,
    /// Display name
    pub name: String,
    /// Plugin type id (e.g. `prometheus`)
    #[serde(rename = "type")]
    pub plugin_id: String,
    /// Whether this is the default datasource
    #[serde(default)]
    pub is_default: bool,
}

/// Lists the datasource instances available to datasource variables.
pub trait DataSourceCatalog: Send + Sync {
    /// All instances, in display order.
    fn instances(&self) -> Vec<DataSourceInstance>;
}

impl DataSourceCatalog for Vec<DataSourceInstance> {
    fn instances(&self) -> Vec<DataSourceInstance> {
        self.clone()
    }
}

/// Bundle of injected collaborators.
#[derive(Clone, Default)]
pub struct Services {
    /// Runs variable queries
    pub query_runner: Option<Arc<dyn QueryRunner>>,
    /// Lists datasource instances
    pub datasources: Option<Arc<dyn DataSourceCatalog>>,
}

impl Services {
    /// No collaborators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a query runner.
    pub fn with_query_runner(mut self, runner: Arc<dyn QueryRunner>) -> Self {
        self.query_runner = Some(runner);
        self
    }

    /// Attach a datasource catalog.
    pub fn with_datasources(mut self, catalog: Arc<dyn DataSourceCatalog>) -> Self {
        self.datasources = Some(catalog);
        self
    }

    /// Whether any collaborator is configured.
    pub const fn is_configured(&self) -> bool {
        self.query_runner.is_some() || self.datasources.is_some()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("query_runner", &self.query_runner.is_some())
            .field("datasources", &self.datasources.is_some())
            .finish()
    }
}
