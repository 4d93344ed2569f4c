//! Datasource variables: the configured instances of one plugin type.

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use super::query::OptionRegex;
use crate::constants::{DEFAULT_DATASOURCE_OPTION, NO_DATASOURCES_TEXT};
use crate::core::VariableError;
use crate::variables::{DataSourceInstance, OptionsFuture, UpdateContext, VariableOption};

/// Configuration of a datasource variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Plugin type listed by this variable (e.g. `prometheus`)
    pub plugin_id: String,
    /// Optional filter on instance names; may be templated
    #[serde(default)]
    pub regex: String,
    /// Offer a `default` option when the default instance matches
    #[serde(default)]
    pub default_option_enabled: bool,
}

impl DataSourceConfig {
    /// List instances of `plugin_id`.
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            ..Self::default()
        }
    }

    /// Filter instance names.
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }

    /// Offer the `default` option.
    pub const fn with_default_option(mut self, enabled: bool) -> Self {
        self.default_option_enabled = enabled;
        self
    }

    pub(super) fn prepare(
        &self,
        name: &str,
        ctx: &UpdateContext<'_>,
    ) -> Result<OptionsFuture, VariableError> {
        let catalog = ctx.services.datasources.clone().ok_or_else(|| {
            VariableError::MissingService {
                variable: name.to_string(),
                service: "datasource catalog".to_string(),
            }
        })?;

        if self.plugin_id.is_empty() {
            return Ok(futures::future::ready(Ok(Vec::new())).boxed());
        }

        let regex = OptionRegex::templated(&self.regex, ctx)?;
        let plugin_id = self.plugin_id.clone();
        let default_option_enabled = self.default_option_enabled;

        Ok(async move {
            let instances = catalog.instances();
            Ok(datasource_options(&instances, &plugin_id, regex.as_ref(), default_option_enabled))
        }
        .boxed())
    }
}

fn datasource_options(
    instances: &[DataSourceInstance],
    plugin_id: &str,
    regex: Option<&OptionRegex>,
    default_option_enabled: bool,
) -> Vec<VariableOption> {
    let matches_regex = |instance: &DataSourceInstance| regex.is_none_or(|r| r.is_match(&instance.name));

    let mut options = Vec::new();
    for instance in instances.iter().filter(|i| i.plugin_id == plugin_id) {
        if matches_regex(instance) {
            options.push(VariableOption::new(instance.name.as_str(), instance.uid.as_str()));
        }
        if default_option_enabled && instance.is_default && matches_regex(instance) {
            options.push(VariableOption::same(DEFAULT_DATASOURCE_OPTION));
        }
    }

    if options.is_empty() {
        options.push(VariableOption::new(NO_DATASOURCES_TEXT, ""));
    }
    options
}
