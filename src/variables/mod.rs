//! Scene variables: named, stateful values substituted into templates.
//!
//! Every variable is a [`Variable`] whose behavior is selected by a closed set
//! of kinds ([`VariableKind`]). The kinds only decide how options are produced
//! and which configuration fields may reference other variables; option
//! reconciliation ([`reconcile`]) and scheduling ([`crate::scene`]) are shared.
//!
//! # Identity
//!
//! A variable has a stable [`VariableKey`] generated at construction and a
//! user-editable `name`. Templates reference the name; the scheduler keeps its
//! bookkeeping by key so renaming never disturbs in-flight updates.
//!
//! # Update contract
//!
//! An update is split in two halves so the scheduler controls the suspension
//! point:
//!
//! 1. [`Variable::prepare_update`] runs synchronously, interpolates templated
//!    fields against the scope and returns a `'static` future producing options.
//! 2. The scheduler awaits the future and hands the result to
//!    [`Variable::commit_options`] or [`Variable::commit_error`]. A cancelled
//!    update is simply dropped and never commits anything.
//!
//! # Examples
//!
//! ```rust
//! use scenevars::variables::{Variable, VariableValue};
//!
//! let env = Variable::custom("env", "dev, staging, prod").build();
//! assert_eq!(env.name(), "env");
//! assert!(env.has_update());
//!
//! let service = Variable::custom("service", "api-$env, web-$env").build();
//! assert_eq!(service.dependencies(), vec!["env".to_string()]);
//!
//! let dc = Variable::constant("dc", "eu-west").build();
//! assert_eq!(dc.state().value, VariableValue::single("eu-west"));
//! ```

pub mod events;
pub mod kinds;
pub mod reconcile;
pub mod services;
mod value;

use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::constants::ALL_VARIABLE_TEXT;
use crate::core::VariableError;
use crate::templating::{Interpolator, VariableLookup, extract_from_serializable};

pub use events::{ListenerRegistry, Subscription, VariableEvent};
pub use kinds::{
    AdHocConfig, AdHocFilter, ConstantConfig, CustomConfig, DataSourceConfig, IntervalConfig,
    QueryConfig, TestConfig, TextBoxConfig, UpdateGate, VariableKind, VariableRefresh,
    VariableSort,
};
pub use reconcile::{MultiValueSettings, Selection, reconcile};
pub use services::{
    DataSourceCatalog, DataSourceInstance, DataSourceRef, MetricFindValue, QueryRequest,
    QueryRunner, QueryStream, Services, TimeRange,
};
pub use value::{VariableHide, VariableOption, VariableValue};

/// Future resolving to a freshly fetched option list.
pub type OptionsFuture = BoxFuture<'static, Result<Vec<VariableOption>, VariableError>>;

/// Opaque, stable identity of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableKey(Uuid);

impl VariableKey {
    /// A fresh random key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VariableKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of everything a rendering layer needs to know about a variable.
#[derive(Debug, Clone)]
pub struct VariableState {
    /// Name used by `$name` references, unique within a set
    pub name: String,
    /// Display label
    pub label: Option<String>,
    /// Description shown as a tooltip
    pub description: Option<String>,
    /// Display hint
    pub hide: VariableHide,
    /// Current selection
    pub value: VariableValue,
    /// Display text of the current selection
    pub text: VariableValue,
    /// Candidates, replaced wholesale on each update
    pub options: Vec<VariableOption>,
    /// An update is in flight
    pub loading: bool,
    /// Error of the last update, if it failed
    pub error: Option<VariableError>,
    /// Multiple values may be selected
    pub is_multi: bool,
    /// An "All" option is offered
    pub include_all: bool,
    /// Custom value substituted for "All"
    pub all_value: Option<String>,
    /// Reconciliation falls back to "All" instead of the first option
    pub default_to_all: bool,
    /// Kind-specific configuration
    pub kind: VariableKind,
}

impl VariableState {
    /// Multi-value flags for reconciliation.
    pub const fn multi_settings(&self) -> MultiValueSettings {
        MultiValueSettings {
            is_multi: self.is_multi,
            include_all: self.include_all,
            default_to_all: self.default_to_all,
        }
    }

    /// Options as shown in a picker, with the "All" option first when enabled.
    pub fn options_for_select(&self) -> Vec<VariableOption> {
        let mut options = Vec::with_capacity(self.options.len() + 1);
        if self.include_all {
            options.push(VariableOption::new(
                ALL_VARIABLE_TEXT,
                crate::constants::ALL_VARIABLE_VALUE,
            ));
        }
        options.extend(self.options.iter().cloned());
        options
    }

    /// Coerce `value` into the shape this variable stores.
    fn normalize(&self, value: VariableValue) -> VariableValue {
        match (self.is_multi, value) {
            (true, VariableValue::Single(v)) => VariableValue::Multi(vec![v]),
            (false, VariableValue::Multi(values)) => {
                VariableValue::Single(values.into_iter().next().unwrap_or_default())
            }
            (_, value) => value,
        }
    }
}

/// Which configuration fields are scanned for dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DependencyScope {
    /// The fields the kind declares (e.g. `query`, `regex`, `datasource`)
    #[default]
    KindDefault,
    /// Only the named top-level fields
    Paths(Vec<String>),
    /// Every configuration field, including label and description
    AllFields,
}

/// What a reference to a variable expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpolationValue {
    /// Ordinary value with its display text
    Plain {
        /// Value(s) to format
        value: VariableValue,
        /// Display text(s)
        text: VariableValue,
    },
    /// "All" is selected and a custom all value is configured
    CustomAll(String),
}

/// Everything an update needs from its surroundings.
pub struct UpdateContext<'a> {
    /// Scope chain used to interpolate templated fields
    pub scope: &'a dyn VariableLookup,
    /// Interpolator of the owning set
    pub interpolator: &'a Interpolator,
    /// Injected collaborators
    pub services: &'a Services,
    /// Time range of the nearest scope
    pub time_range: Option<TimeRange>,
}

/// A named, stateful scene variable.
pub struct Variable {
    key: VariableKey,
    state: RwLock<VariableState>,
    revision: AtomicU64,
    scope: DependencyScope,
    dependency_cache: Mutex<Option<(u64, Vec<String>)>>,
    listeners: Arc<ListenerRegistry>,
}

#[derive(Serialize)]
struct DependencySource<'a> {
    label: Option<&'a str>,
    description: Option<&'a str>,
    #[serde(flatten)]
    kind: &'a VariableKind,
}

impl Variable {
    /// Start building a variable of any kind.
    pub fn builder(name: impl Into<String>, kind: VariableKind) -> VariableBuilder {
        VariableBuilder::new(name.into(), kind)
    }

    /// Options from a comma separated list (`a, b` or `label : value`).
    pub fn custom(name: impl Into<String>, query: impl Into<String>) -> VariableBuilder {
        Self::builder(name, VariableKind::Custom(CustomConfig::new(query)))
    }

    /// Options from a datasource query.
    pub fn query(name: impl Into<String>, config: QueryConfig) -> VariableBuilder {
        Self::builder(name, VariableKind::Query(config))
    }

    /// Options listing the datasource instances of one plugin type.
    pub fn datasource(name: impl Into<String>, plugin_id: impl Into<String>) -> VariableBuilder {
        Self::builder(name, VariableKind::DataSource(DataSourceConfig::new(plugin_id)))
    }

    /// Options from a list of intervals.
    pub fn interval<I, S>(name: impl Into<String>, intervals: I) -> VariableBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(name, VariableKind::Interval(IntervalConfig::new(intervals)))
    }

    /// A fixed, hidden value.
    pub fn constant(name: impl Into<String>, value: impl Into<String>) -> VariableBuilder {
        Self::builder(name, VariableKind::Constant(ConstantConfig::new(value)))
            .hide(VariableHide::HideVariable)
    }

    /// Free text entered by the user.
    pub fn textbox(name: impl Into<String>, value: impl Into<String>) -> VariableBuilder {
        Self::builder(name, VariableKind::TextBox(TextBoxConfig::default())).value(value.into())
    }

    /// Ad hoc label filters.
    pub fn adhoc(name: impl Into<String>, config: AdHocConfig) -> VariableBuilder {
        Self::builder(name, VariableKind::AdHoc(config))
    }

    /// Fixed options with controllable completion, used by tests and demos.
    pub fn test(name: impl Into<String>, config: TestConfig) -> VariableBuilder {
        Self::builder(name, VariableKind::Test(config))
    }

    fn read(&self) -> RwLockReadGuard<'_, VariableState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VariableState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stable identity.
    pub const fn key(&self) -> VariableKey {
        self.key
    }

    /// Current name.
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Snapshot of the full state.
    pub fn state(&self) -> VariableState {
        self.read().clone()
    }

    /// Current value.
    pub fn value(&self) -> VariableValue {
        self.read().value.clone()
    }

    /// Current display text.
    pub fn text(&self) -> VariableValue {
        self.read().text.clone()
    }

    /// Current options.
    pub fn options(&self) -> Vec<VariableOption> {
        self.read().options.clone()
    }

    /// Error of the last update.
    pub fn error(&self) -> Option<VariableError> {
        self.read().error.clone()
    }

    /// Whether an update is in flight.
    pub fn is_loading(&self) -> bool {
        self.read().loading
    }

    /// Type tag of the kind (`custom`, `query`, ...).
    pub fn type_name(&self) -> &'static str {
        self.read().kind.type_name()
    }

    /// Configuration revision; bumped whenever dependency-relevant state changes.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Whether the kind fetches options.
    pub fn has_update(&self) -> bool {
        self.read().kind.has_update()
    }

    /// Whether activation may skip the initial update.
    ///
    /// Query variables that never refresh keep the options they already have.
    pub fn skip_on_activation(&self) -> bool {
        let state = self.read();
        matches!(&state.kind, VariableKind::Query(q) if q.refresh == VariableRefresh::Never)
            && !state.options.is_empty()
    }

    /// Whether a time range change requires a fresh update.
    pub fn refreshes_on_time_range(&self) -> bool {
        matches!(
            &self.read().kind,
            VariableKind::Query(q) if q.refresh == VariableRefresh::OnTimeRangeChange
        )
    }

    /// Names of the variables this one references, in order, without itself.
    ///
    /// The result is cached per configuration revision.
    pub fn dependencies(&self) -> Vec<String> {
        let revision = self.revision();
        let mut cache = self.dependency_cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_revision, dependencies)) = cache.as_ref()
            && *cached_revision == revision
        {
            return dependencies.clone();
        }

        let state = self.read();
        let source = DependencySource {
            label: state.label.as_deref(),
            description: state.description.as_deref(),
            kind: &state.kind,
        };
        let mut dependencies = match &self.scope {
            DependencyScope::KindDefault => {
                let fields: Vec<String> =
                    state.kind.dependency_fields().iter().map(|f| (*f).to_string()).collect();
                if fields.is_empty() {
                    Vec::new()
                } else {
                    extract_from_serializable(&source, Some(fields.as_slice()))
                }
            }
            DependencyScope::Paths(paths) => extract_from_serializable(&source, Some(paths.as_slice())),
            DependencyScope::AllFields => extract_from_serializable(&source, None),
        };
        dependencies.retain(|name| *name != state.name);
        drop(state);

        tracing::trace!(
            target: "variables",
            "Dependencies of {} at revision {}: {:?}",
            self.key,
            revision,
            dependencies
        );
        *cache = Some((revision, dependencies.clone()));
        dependencies
    }

    /// Mark an update as started.
    pub fn begin_update(&self) {
        self.write().loading = true;
    }

    /// Interpolate templated fields and return the options future.
    pub fn prepare_update(&self, ctx: &UpdateContext<'_>) -> Result<OptionsFuture, VariableError> {
        let (name, kind) = {
            let state = self.read();
            (state.name.clone(), state.kind.clone())
        };
        kind.prepare_update(&name, ctx)
    }

    /// Apply freshly fetched options and reconcile the value against them.
    ///
    /// Returns whether the value changed.
    pub fn commit_options(&self, options: Vec<VariableOption>) -> bool {
        let mut state = self.write();
        let selection = reconcile(&options, &state.value, state.multi_settings());
        let changed = selection.value != state.value;

        tracing::debug!(
            target: "variables",
            "Variable '{}' settled with {} options, value {}{}",
            state.name,
            options.len(),
            selection.value,
            if changed { " (changed)" } else { "" }
        );

        state.options = options;
        state.value = selection.value;
        state.text = selection.text;
        state.loading = false;
        state.error = None;
        changed
    }

    /// Record a failed update. Value and options keep their last good state.
    pub fn commit_error(&self, error: VariableError) {
        let mut state = self.write();
        tracing::warn!(target: "variables", "Variable '{}' update failed: {}", state.name, error);
        state.loading = false;
        state.error = Some(error);
    }

    /// Forget an aborted update.
    pub fn cancel_update(&self) {
        self.write().loading = false;
    }

    /// Select a new value and notify listeners if it differs.
    ///
    /// Without an explicit `text` the option labels are used. Returns whether
    /// anything changed.
    pub fn change_value_to(&self, value: VariableValue, text: Option<VariableValue>) -> bool {
        {
            let mut state = self.write();
            let value = state.normalize(value);
            let text = match text {
                Some(text) => state.normalize(text),
                None => reconcile::text_for_value(&value, &state.options),
            };
            if value == state.value && text == state.text {
                return false;
            }
            tracing::debug!(target: "variables", "Variable '{}' set to {}", state.name, value);
            state.value = value;
            state.text = text;
        }
        self.publish(&VariableEvent::ValueChanged(self.key));
        true
    }

    /// Replace the filters of an ad hoc variable; its value is the rendered
    /// filter expression.
    pub fn set_filters(&self, filters: Vec<AdHocFilter>) -> bool {
        let expression = {
            let mut state = self.write();
            let VariableKind::AdHoc(config) = &mut state.kind else {
                return false;
            };
            config.filters = filters;
            config.render()
        };
        self.change_value_to(VariableValue::Single(expression), None)
    }

    /// Edit the kind configuration. Dependencies are recomputed lazily.
    pub fn update_config<F>(&self, edit: F)
    where
        F: FnOnce(&mut VariableKind),
    {
        edit(&mut self.write().kind);
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Rename the variable. Its key is unaffected.
    pub fn set_name(&self, name: impl Into<String>) {
        self.write().name = name.into();
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// What a `$name` reference expands to.
    pub fn interpolation_value(&self) -> InterpolationValue {
        let state = self.read();
        if state.include_all && state.value.is_all() {
            if let Some(all_value) = &state.all_value {
                return InterpolationValue::CustomAll(all_value.clone());
            }
            return InterpolationValue::Plain {
                value: VariableValue::Multi(
                    state.options.iter().map(|o| o.value.clone()).collect(),
                ),
                text: VariableValue::single(ALL_VARIABLE_TEXT),
            };
        }
        InterpolationValue::Plain {
            value: state.value.clone(),
            text: state.text.clone(),
        }
    }

    /// Options including the "All" entry when enabled.
    pub fn options_for_select(&self) -> Vec<VariableOption> {
        self.read().options_for_select()
    }

    /// Register a listener for this variable's events.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&VariableEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Deliver an event to every listener.
    pub fn publish(&self, event: &VariableEvent) {
        self.listeners.emit(event);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Variable")
            .field("key", &self.key)
            .field("name", &state.name)
            .field("type", &state.kind.type_name())
            .field("value", &state.value)
            .field("loading", &state.loading)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Variable`].
#[derive(Debug, Clone)]
pub struct VariableBuilder {
    state: VariableState,
    text_set: bool,
    scope: DependencyScope,
}

impl VariableBuilder {
    fn new(name: String, kind: VariableKind) -> Self {
        Self {
            state: VariableState {
                name,
                label: None,
                description: None,
                hide: VariableHide::default(),
                value: VariableValue::default(),
                text: VariableValue::default(),
                options: Vec::new(),
                loading: false,
                error: None,
                is_multi: false,
                include_all: false,
                all_value: None,
                default_to_all: false,
                kind,
            },
            text_set: false,
            scope: DependencyScope::default(),
        }
    }

    /// Display label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.state.label = Some(label.into());
        self
    }

    /// Description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.state.description = Some(description.into());
        self
    }

    /// Display hint.
    pub const fn hide(mut self, hide: VariableHide) -> Self {
        self.state.hide = hide;
        self
    }

    /// Initially requested value.
    pub fn value(mut self, value: impl Into<VariableValue>) -> Self {
        self.state.value = value.into();
        self
    }

    /// Initial display text.
    pub fn text(mut self, text: impl Into<VariableValue>) -> Self {
        self.state.text = text.into();
        self.text_set = true;
        self
    }

    /// Pre-existing options.
    pub fn options(mut self, options: Vec<VariableOption>) -> Self {
        self.state.options = options;
        self
    }

    /// Allow several values to be selected.
    pub const fn multi(mut self, is_multi: bool) -> Self {
        self.state.is_multi = is_multi;
        self
    }

    /// Offer an "All" option.
    pub const fn include_all(mut self, include_all: bool) -> Self {
        self.state.include_all = include_all;
        self
    }

    /// Substitute `all_value` when "All" is selected. Implies `include_all`.
    pub fn all_value(mut self, all_value: impl Into<String>) -> Self {
        self.state.all_value = Some(all_value.into());
        self.state.include_all = true;
        self
    }

    /// Fall back to "All" instead of the first option.
    pub const fn default_to_all(mut self, default_to_all: bool) -> Self {
        self.state.default_to_all = default_to_all;
        self
    }

    /// Scan only these top-level fields for dependencies.
    pub fn state_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = DependencyScope::Paths(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Choose the dependency scan scope.
    pub fn dependency_scope(mut self, scope: DependencyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Finish the variable.
    pub fn build(self) -> Arc<Variable> {
        let mut state = self.state;
        match &state.kind {
            VariableKind::Constant(config) => {
                state.value = VariableValue::single(config.value.as_str());
            }
            VariableKind::AdHoc(config) => {
                state.value = VariableValue::Single(config.render());
            }
            _ => {}
        }
        if state.default_to_all && state.value.is_empty() {
            state.value = VariableValue::all();
        }
        let value = std::mem::take(&mut state.value);
        state.value = state.normalize(value);
        state.text = if self.text_set {
            let text = std::mem::take(&mut state.text);
            state.normalize(text)
        } else {
            reconcile::text_for_value(&state.value, &state.options)
        };

        Arc::new(Variable {
            key: VariableKey::new(),
            state: RwLock::new(state),
            revision: AtomicU64::new(0),
            scope: self.scope,
            dependency_cache: Mutex::new(None),
            listeners: ListenerRegistry::new(),
        })
    }
}
