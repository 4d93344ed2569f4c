//! Test utilities for scenevars
//!
//! Helpers shared by the unit tests and the integration suite (enabled for
//! the latter through the `test-utils` feature):
//!
//! - [`init_test_logging`] - one-time tracing subscriber for tests
//! - [`RecordingQueryRunner`] - a [`QueryRunner`] that records every request
//!   and answers from a closure
//! - [`gated`] / [`instant`] - test variables with controllable completion
//! - [`wait_until`] - poll a condition while spawned updates make progress
//! - [`write_scene`] - scene files in a temporary directory for CLI tests
//!
//! # Example
//!
//! ```rust,no_run
//! use scenevars::scene::VariableSet;
//! use scenevars::test_utils::{gated, instant};
//! use scenevars::variables::UpdateGate;
//!
//! # async fn example() {
//! let gate = UpdateGate::new();
//! let set = VariableSet::builder()
//!     .variable(gated("a", "x, y", &gate))
//!     .variable(instant("b", "${a}-1"))
//!     .build();
//! set.activate();
//! gate.release(1);
//! set.settled().await;
//! # }
//! ```

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::variables::{
    MetricFindValue, QueryRequest, QueryRunner, QueryStream, TestConfig, UpdateGate, Variable,
};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` when given, otherwise
/// `RUST_LOG`; without either no subscriber is installed.
///
/// ```bash
/// RUST_LOG=scheduler=trace cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

type Responder = dyn Fn(&QueryRequest) -> anyhow::Result<Vec<MetricFindValue>> + Send + Sync;

/// Query runner that records requests and answers through a closure.
#[derive(Clone)]
pub struct RecordingQueryRunner {
    requests: Arc<Mutex<Vec<QueryRequest>>>,
    respond: Arc<Responder>,
}

impl RecordingQueryRunner {
    /// Runner answering every request with `respond`.
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&QueryRequest) -> anyhow::Result<Vec<MetricFindValue>> + Send + Sync + 'static,
    {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
        }
    }

    /// Runner answering every request with `rows`.
    pub fn with_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rows: Vec<MetricFindValue> = rows.into_iter().map(MetricFindValue::text).collect();
        Self::new(move |_| Ok(rows.clone()))
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of requests received so far.
    pub fn count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Query text of every request, in order.
    pub fn queries(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| match &request.query {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

impl std::fmt::Debug for RecordingQueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingQueryRunner").field("requests", &self.count()).finish()
    }
}

impl QueryRunner for RecordingQueryRunner {
    fn run_query(&self, request: QueryRequest) -> QueryStream {
        let result = (self.respond)(&request);
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        futures::stream::iter([result]).boxed()
    }
}

/// Test variable whose updates wait on `gate`.
pub fn gated(name: &str, query: &str, gate: &UpdateGate) -> Arc<Variable> {
    Variable::test(name, TestConfig::new(query).with_gate(gate.clone())).build()
}

/// Test variable whose updates complete immediately.
pub fn instant(name: &str, query: &str) -> Arc<Variable> {
    Variable::test(name, TestConfig::new(query)).build()
}

/// Test variable whose updates always fail with `reason`.
pub fn failing(name: &str, query: &str, reason: &str) -> Arc<Variable> {
    Variable::test(name, TestConfig::new(query).failing(reason)).build()
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
///
/// Returns false if it still does not hold after five seconds.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    true
}

/// Write `content` as `name` under `dir` and return its path.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_scene(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}
