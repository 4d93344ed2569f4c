//! Test variables: fixed options with controllable completion.
//!
//! Used by the test suite and by demo scenes to observe the scheduler. An
//! optional [`UpdateGate`] holds every update until the test releases it, so
//! ordering and cancellation can be asserted deterministically.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;

use super::custom::parse_custom_options;
use crate::core::VariableError;
use crate::variables::{OptionsFuture, UpdateContext, VariableOption};

/// Holds test variable updates until released and counts them.
#[derive(Debug, Clone)]
pub struct UpdateGate {
    permits: Arc<Semaphore>,
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl Default for UpdateGate {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl UpdateGate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `count` waiting (or future) updates complete.
    pub fn release(&self, count: usize) {
        self.permits.add_permits(count);
    }

    /// Number of updates started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of updates that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Interpolated queries, one per started update.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record_start(&self, query: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap_or_else(PoisonError::into_inner).push(query.to_string());
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// Configuration of a test variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    /// Comma separated options; may reference other variables
    #[serde(default)]
    pub query: String,
    /// Fixed options; when empty the interpolated query is used
    #[serde(default)]
    pub options: Vec<VariableOption>,
    /// Artificial latency of every update
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail every update with this reason
    #[serde(default)]
    pub fail_with: Option<String>,
    /// Gate holding updates until released
    #[serde(skip)]
    pub gate: Option<UpdateGate>,
}

impl TestConfig {
    /// Options from `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Hold updates on `gate`.
    pub fn with_gate(mut self, gate: UpdateGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fixed options regardless of the query.
    pub fn with_options(mut self, options: Vec<VariableOption>) -> Self {
        self.options = options;
        self
    }

    /// Fail every update.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }

    /// Delay every update.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub(super) fn prepare(&self, name: &str, ctx: &UpdateContext<'_>) -> OptionsFuture {
        let interpolated = ctx.interpolator.interpolate(&self.query, ctx.scope);
        if let Some(gate) = &self.gate {
            gate.record_start(&interpolated);
        }

        let options = if self.options.is_empty() {
            parse_custom_options(&interpolated)
        } else {
            self.options.clone()
        };
        let gate = self.gate.clone();
        let delay = Duration::from_millis(self.delay_ms);
        let failure = self.fail_with.clone().map(|reason| VariableError::UpdateFailed {
            variable: name.to_string(),
            reason,
        });

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &gate {
                gate.pass().await;
                gate.completed.fetch_add(1, Ordering::SeqCst);
            }
            match failure {
                Some(error) => Err(error),
                None => Ok(options),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_releases_in_order() {
        let gate = UpdateGate::new();
        let waiting = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.pass().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        gate.release(1);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_default_gate_starts_closed() {
        let gate = UpdateGate::default();
        assert_eq!(gate.started(), 0);
        assert_eq!(gate.completed(), 0);

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(20), gate.pass()).await;
        assert!(blocked.is_err());

        gate.release(1);
        gate.pass().await;
    }

    #[test]
    fn test_gate_counts_starts() {
        let gate = UpdateGate::new();
        gate.record_start("a");
        gate.record_start("b");
        assert_eq!(gate.started(), 2);
        assert_eq!(gate.queries(), vec!["a", "b"]);
        assert_eq!(gate.completed(), 0);
    }
}
