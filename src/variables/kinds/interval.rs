//! Interval variables: a fixed list of time intervals.

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::variables::{OptionsFuture, VariableOption};

const DEFAULT_INTERVALS: &[&str] = &["1m", "10m", "30m", "1h", "6h", "12h", "1d", "7d", "14d", "30d"];

fn default_intervals() -> Vec<String> {
    DEFAULT_INTERVALS.iter().map(|s| (*s).to_string()).collect()
}

/// Configuration of an interval variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    /// Selectable intervals, in display order
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
}

impl IntervalConfig {
    /// Interval variable over `intervals`.
    pub fn new<I, S>(intervals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            intervals: intervals.into_iter().map(Into::into).collect(),
        }
    }

    pub(super) fn prepare(&self) -> OptionsFuture {
        let options = self
            .intervals
            .iter()
            .map(|interval| interval.trim())
            .filter(|interval| !interval.is_empty())
            .map(VariableOption::same)
            .collect();
        futures::future::ready(Ok(options)).boxed()
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
        }
    }
}
