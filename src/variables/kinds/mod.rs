//! Variable kinds.
//!
//! A closed, `type`-tagged union of kind configurations. Each kind supplies
//! two things only: the fields scanned for dependencies and the options
//! strategy. Reconciliation and scheduling are kind-agnostic.
//!
//! | Kind | Dependency fields | Fetches options |
//! |---|---|---|
//! | `custom` | `query` | yes |
//! | `query` | `query`, `datasource`, `regex` | yes |
//! | `datasource` | `regex` | yes |
//! | `interval` | none | yes |
//! | `constant` | none | no |
//! | `textbox` | none | no |
//! | `adhoc` | `datasource` | no |
//! | `test` | `query` | yes |

mod adhoc;
mod constant;
mod custom;
mod datasource;
mod interval;
mod query;
mod test_variable;
mod textbox;

use serde::{Deserialize, Serialize};

pub use adhoc::{AdHocConfig, AdHocFilter};
pub use constant::ConstantConfig;
pub use custom::{CustomConfig, parse_custom_options};
pub use datasource::DataSourceConfig;
pub use interval::IntervalConfig;
pub use query::{
    OptionRegex, QueryConfig, VariableRefresh, VariableSort, metric_names_to_options,
    sort_options,
};
pub use test_variable::{TestConfig, UpdateGate};
pub use textbox::TextBoxConfig;

use super::{OptionsFuture, UpdateContext};
use crate::core::VariableError;

/// Kind-specific configuration of a variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariableKind {
    /// Comma separated literal options
    Custom(CustomConfig),
    /// Options returned by a datasource query
    Query(QueryConfig),
    /// Datasource instances of one plugin type
    DataSource(DataSourceConfig),
    /// A list of intervals
    Interval(IntervalConfig),
    /// A fixed value
    Constant(ConstantConfig),
    /// Free text
    TextBox(TextBoxConfig),
    /// Label filters
    AdHoc(AdHocConfig),
    /// Fixed options with controllable completion
    Test(TestConfig),
}

impl VariableKind {
    /// The `type` tag.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Custom(_) => "custom",
            Self::Query(_) => "query",
            Self::DataSource(_) => "datasource",
            Self::Interval(_) => "interval",
            Self::Constant(_) => "constant",
            Self::TextBox(_) => "textbox",
            Self::AdHoc(_) => "adhoc",
            Self::Test(_) => "test",
        }
    }

    /// Configuration fields that may reference other variables.
    pub const fn dependency_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Custom(_) | Self::Test(_) => &["query"],
            Self::Query(_) => &["query", "datasource", "regex"],
            Self::DataSource(_) => &["regex"],
            Self::AdHoc(_) => &["datasource"],
            Self::Interval(_) | Self::Constant(_) | Self::TextBox(_) => &[],
        }
    }

    /// Whether the kind fetches options.
    pub const fn has_update(&self) -> bool {
        !matches!(self, Self::Constant(_) | Self::TextBox(_) | Self::AdHoc(_))
    }

    /// Interpolate templated fields and start fetching options.
    pub fn prepare_update(
        &self,
        name: &str,
        ctx: &UpdateContext<'_>,
    ) -> Result<OptionsFuture, VariableError> {
        match self {
            Self::Custom(config) => Ok(config.prepare(ctx)),
            Self::Query(config) => config.prepare(name, ctx),
            Self::DataSource(config) => config.prepare(name, ctx),
            Self::Interval(config) => Ok(config.prepare()),
            Self::Test(config) => Ok(config.prepare(name, ctx)),
            Self::Constant(_) | Self::TextBox(_) | Self::AdHoc(_) => {
                Err(VariableError::UpdateFailed {
                    variable: name.to_string(),
                    reason: format!("{} variables have no options to fetch", self.type_name()),
                })
            }
        }
    }
}
