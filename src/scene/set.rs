//! Variable sets and their update scheduler.
//!
//! A [`VariableSet`] owns an ordered list of variables and keeps them
//! consistent with each other. While active it runs a small topological
//! scheduler:
//!
//! - a variable is queued when it needs fresh options (activation, a changed
//!   dependency, a time range change, an explicit refresh);
//! - a queued variable starts as soon as none of its dependencies is queued or
//!   updating, so independent variables update concurrently;
//! - every completion sweeps the queue again and unlocks the next layer.
//!
//! Updates run as tokio tasks. The scheduler state sits behind a
//! `std::sync::Mutex` that is never held across an `.await`; variable events
//! are published after the lock is released. Lock order is scheduler before
//! variable state, and a child set before its ancestors.
//!
//! # Examples
//!
//! ```rust,no_run
//! use scenevars::scene::VariableSet;
//! use scenevars::variables::Variable;
//!
//! # async fn demo() {
//! let set = VariableSet::builder()
//!     .variable(Variable::custom("env", "dev, prod").build())
//!     .variable(Variable::custom("service", "api-$env, web-$env").build())
//!     .build();
//!
//! set.activate();
//! set.settled().await;
//! assert_eq!(set.interpolate("$service"), "api-dev");
//!
//! set.set_value("env", "prod");
//! set.settled().await;
//! assert_eq!(set.interpolate("$service"), "api-prod");
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::graph::{DependencyGraph, GraphNode};
use super::status::UpdateStatus;
use crate::config::{DependencyErrorPolicy, EngineConfig};
use crate::core::{VariableError, similar_names};
use crate::templating::{FormatRegistry, Interpolator, VariableLookup};
use crate::variables::{
    Services, Subscription, TimeRange, UpdateContext, Variable, VariableEvent, VariableKey,
    VariableOption, VariableValue,
};

/// Events collected under the scheduler lock, published after it is released.
type Outbox = Vec<(Arc<Variable>, VariableEvent)>;

/// A scope of variables with an update scheduler.
///
/// Cloning is cheap and yields a handle to the same set.
#[derive(Clone)]
pub struct VariableSet {
    inner: Arc<SetInner>,
}

struct SetInner {
    name: String,
    variables: RwLock<Vec<Arc<Variable>>>,
    parent: Option<VariableSet>,
    services: Option<Services>,
    config: EngineConfig,
    interpolator: Interpolator,
    time_range: RwLock<Option<TimeRange>>,
    scheduler: Mutex<Scheduler>,
    pending: watch::Sender<usize>,
}

struct InFlight {
    token: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Scheduler {
    active: bool,
    epoch: u64,
    runtime: Option<Handle>,
    statuses: HashMap<VariableKey, UpdateStatus>,
    queue: Vec<VariableKey>,
    in_flight: HashMap<VariableKey, InFlight>,
    subscriptions: HashMap<VariableKey, Subscription>,
    external_waits: usize,
    next_token: u64,
}

impl Scheduler {
    fn status(&self, key: VariableKey) -> UpdateStatus {
        self.statuses.get(&key).copied().unwrap_or_default()
    }

    fn dequeue(&mut self, key: VariableKey) {
        self.queue.retain(|queued| *queued != key);
    }

    /// Work that will settle without outside help.
    fn pending(&self) -> usize {
        self.in_flight.len() + self.external_waits
    }
}

/// A variable of an ancestor set referenced by a local variable.
#[derive(Clone)]
struct ExternalDependency {
    owner: VariableSet,
    variable: Arc<Variable>,
}

/// Dependency edges of the current variable list, resolved to keys.
#[derive(Default)]
struct DependencyMap {
    names: HashMap<VariableKey, String>,
    local: HashMap<VariableKey, Vec<VariableKey>>,
    external: HashMap<VariableKey, Vec<ExternalDependency>>,
    graph: DependencyGraph,
}

impl DependencyMap {
    fn local(&self, key: VariableKey) -> &[VariableKey] {
        self.local.get(&key).map_or(&[], Vec::as_slice)
    }

    fn external(&self, key: VariableKey) -> &[ExternalDependency] {
        self.external.get(&key).map_or(&[], Vec::as_slice)
    }

    fn name(&self, key: VariableKey) -> String {
        self.names.get(&key).cloned().unwrap_or_else(|| key.to_string())
    }

    fn dependents(&self, key: VariableKey) -> Vec<VariableKey> {
        self.graph.dependents_of(key).into_iter().map(|node| node.key).collect()
    }

    fn transitive_dependents(&self, key: VariableKey) -> Vec<VariableKey> {
        self.graph.transitive_dependents(key).into_iter().map(|node| node.key).collect()
    }
}

enum Blocker {
    None,
    Local,
    /// Waiting on an ancestor variable; `progressing` while the ancestor set
    /// still has work that settles on its own
    External {
        progressing: bool,
    },
    Failed(String),
}

impl VariableSet {
    /// Start building a set.
    pub fn builder() -> VariableSetBuilder {
        VariableSetBuilder::default()
    }

    /// Display name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the variables, in order.
    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.inner.variables()
    }

    /// Local variable called `name`. Ancestors are not searched.
    pub fn get(&self, name: &str) -> Option<Arc<Variable>> {
        self.inner.local(name)
    }

    /// The nearest variable called `name` in this set or its ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::VariableNotFound`] with close matches from the
    /// whole scope chain.
    pub fn find(&self, name: &str) -> Result<Arc<Variable>, VariableError> {
        if let Some(variable) = self.inner.lookup(name) {
            return Ok(variable);
        }

        let mut visible = Vec::new();
        let mut scope = Some(self);
        while let Some(set) = scope {
            visible.extend(set.variables().iter().map(|variable| variable.name()));
            scope = set.parent();
        }
        Err(VariableError::VariableNotFound {
            name: name.to_string(),
            suggestions: similar_names(name, visible.iter().map(String::as_str)),
        })
    }

    /// The enclosing set, if any.
    pub fn parent(&self) -> Option<&VariableSet> {
        self.inner.parent.as_ref()
    }

    /// Engine configuration of this set.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Interpolator of this set.
    pub fn interpolator(&self) -> &Interpolator {
        &self.inner.interpolator
    }

    /// Collaborators used by updates, inherited from ancestors when unset.
    pub fn services(&self) -> Services {
        self.inner.services()
    }

    /// Whether the scheduler is running.
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Interpolate `template` against this set and its ancestors.
    pub fn interpolate(&self, template: &str) -> String {
        self.inner.interpolator.interpolate(template, self.inner.as_ref())
    }

    /// Interpolate with `format` for references that do not name one.
    pub fn interpolate_with_format(&self, template: &str, format: &str) -> String {
        self.inner.interpolator.interpolate_with_format(template, self.inner.as_ref(), Some(format))
    }

    /// Start the scheduler: subscribe, queue every variable that fetches
    /// options and start what can start.
    ///
    /// Must be called from within a tokio runtime; otherwise a warning is
    /// logged and the set stays inactive. Activating an active set is a no-op.
    pub fn activate(&self) {
        self.inner.activate();
    }

    /// Stop the scheduler. In-flight updates are aborted and never commit;
    /// values and options are kept.
    pub fn deactivate(&self) {
        self.inner.deactivate();
    }

    /// Select a value for the local variable `name`.
    ///
    /// Returns whether the value changed. Dependents are requeued when the set
    /// is active.
    pub fn set_value(&self, name: &str, value: impl Into<VariableValue>) -> bool {
        let Some(variable) = self.inner.local(name) else {
            warn!(target: "scheduler", "Scene '{}' has no variable named '{}'", self.inner.name, name);
            return false;
        };
        variable.change_value_to(value.into(), None)
    }

    /// Re-run the update of `name` and everything depending on it.
    ///
    /// Returns false when the variable does not exist or the set is inactive.
    pub fn refresh(&self, name: &str) -> bool {
        self.inner.refresh(name)
    }

    /// Replace the time range. Query variables refreshing on time range
    /// changes are requeued together with their dependents.
    pub fn set_time_range(&self, range: TimeRange) {
        self.inner.set_time_range(range);
    }

    /// Time range of this set or its nearest ancestor that has one.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.inner.time_range()
    }

    /// Append a variable. When active, it is updated and variables that
    /// referenced its name are requeued.
    pub fn add_variable(&self, variable: Arc<Variable>) {
        self.inner.add_variable(variable);
    }

    /// Remove the local variable `name`, aborting its update.
    pub fn remove_variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.inner.remove_variable(name)
    }

    /// Scheduling status of the local variable `name`.
    pub fn status_of(&self, name: &str) -> Option<UpdateStatus> {
        let variable = self.inner.local(name)?;
        Some(self.inner.lock().status(variable.key()))
    }

    /// Whether no update is in flight or about to start.
    ///
    /// Variables blocked by an errored dependency (or a cycle) do not count.
    pub fn is_settled(&self) -> bool {
        self.inner.lock().pending() == 0
    }

    /// Wait until [`is_settled`](Self::is_settled) holds.
    pub async fn settled(&self) {
        let mut receiver = self.inner.pending.subscribe();
        let _ = receiver.wait_for(|pending| *pending == 0).await;
    }

    /// Dependency graph of the local variables, including edges to
    /// referenced ancestor variables.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let variables = self.inner.variables();
        self.inner.dependency_map(&variables).graph
    }

    /// Dependency trees of every variable nothing depends on.
    pub fn to_tree_string(&self) -> String {
        let graph = self.dependency_graph();
        graph.roots().iter().map(|root| graph.to_tree_string(root)).collect()
    }
}

impl VariableLookup for VariableSet {
    fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.inner.lookup(name)
    }

    fn time_range(&self) -> Option<TimeRange> {
        VariableLookup::time_range(self.inner.as_ref())
    }
}

impl fmt::Debug for VariableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableSet")
            .field("name", &self.inner.name)
            .field("variables", &self.inner.variables().len())
            .field("has_parent", &self.inner.parent.is_some())
            .finish_non_exhaustive()
    }
}

impl VariableLookup for SetInner {
    fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.local(name).or_else(|| self.parent.as_ref().and_then(|parent| parent.lookup(name)))
    }

    fn time_range(&self) -> Option<TimeRange> {
        let own = *self.time_range.read().unwrap_or_else(PoisonError::into_inner);
        own.or_else(|| self.parent.as_ref().and_then(VariableLookup::time_range))
    }
}

impl SetInner {
    fn lock(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn variables(&self) -> Vec<Arc<Variable>> {
        self.variables.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn local(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|variable| variable.name() == name)
            .cloned()
    }

    fn variable_by_key(&self, key: VariableKey) -> Option<Arc<Variable>> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|variable| variable.key() == key)
            .cloned()
    }

    fn services(&self) -> Services {
        match (&self.services, &self.parent) {
            (Some(services), _) => services.clone(),
            (None, Some(parent)) => parent.inner.services(),
            (None, None) => Services::default(),
        }
    }

    fn status(&self, key: VariableKey) -> UpdateStatus {
        self.lock().status(key)
    }

    /// Status of a local variable and whether this set has pending work.
    fn schedule_state(&self, key: VariableKey) -> (UpdateStatus, bool) {
        let sched = self.lock();
        (sched.status(key), sched.pending() > 0)
    }

    fn resolve_in_ancestors(&self, name: &str) -> Option<ExternalDependency> {
        let mut current = self.parent.clone();
        while let Some(set) = current {
            if let Some(variable) = set.inner.local(name) {
                return Some(ExternalDependency {
                    owner: set,
                    variable,
                });
            }
            current = set.inner.parent.clone();
        }
        None
    }

    fn dependency_map(&self, variables: &[Arc<Variable>]) -> DependencyMap {
        let mut map = DependencyMap::default();
        let mut by_name: HashMap<String, VariableKey> = HashMap::new();
        let mut nodes = Vec::with_capacity(variables.len());

        for variable in variables {
            let node = GraphNode::new(variable.key(), variable.name());
            by_name.entry(node.name.clone()).or_insert(node.key);
            map.names.insert(node.key, node.name.clone());
            map.graph.add_variable(node.clone());
            nodes.push((node, variable));
        }

        for (node, variable) in nodes {
            for dependency in variable.dependencies() {
                if let Some(&dependency_key) = by_name.get(&dependency) {
                    map.local.entry(node.key).or_default().push(dependency_key);
                    map.graph.add_dependency(node.clone(), GraphNode::new(dependency_key, dependency));
                } else if let Some(external) = self.resolve_in_ancestors(&dependency) {
                    map.graph
                        .add_dependency(node.clone(), GraphNode::new(external.variable.key(), dependency));
                    map.external.entry(node.key).or_default().push(external);
                } else {
                    trace!(
                        target: "scheduler",
                        "Reference ${} of '{}' does not resolve in scene '{}'",
                        dependency,
                        node.name,
                        self.name
                    );
                }
            }
        }

        map
    }

    fn activate(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(target: "scheduler", "Scene '{}' not activated: {}", self.name, VariableError::NoRuntime);
            return;
        };

        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if sched.active {
                debug!(target: "scheduler", "Scene '{}' is already active", self.name);
                return;
            }
            sched.active = true;
            sched.epoch += 1;
            sched.runtime = Some(runtime);

            let variables = self.variables();
            if self.config.detect_cycles
                && let Err(err) = self.dependency_map(&variables).graph.detect_cycles()
            {
                warn!(target: "scheduler", "Scene '{}': {}", self.name, err);
            }

            for variable in &variables {
                if !variable.has_update() {
                    continue;
                }
                if variable.skip_on_activation() {
                    trace!(target: "scheduler", "Keeping existing options of '{}'", variable.name());
                    continue;
                }
                sched.statuses.insert(variable.key(), UpdateStatus::Queued);
                sched.queue.push(variable.key());
            }

            debug!(
                target: "scheduler",
                "Activating scene '{}': {} variables, {} queued",
                self.name,
                variables.len(),
                sched.queue.len()
            );
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn deactivate(&self) {
        let (cancelled, subscriptions) = {
            let mut sched = self.lock();
            if !sched.active {
                return;
            }
            sched.active = false;
            sched.epoch += 1;
            sched.runtime = None;

            let mut cancelled = Vec::new();
            for (key, in_flight) in sched.in_flight.drain() {
                in_flight.abort.abort();
                if let Some(variable) = self.variable_by_key(key) {
                    variable.cancel_update();
                    cancelled.push(variable);
                }
            }
            // Nested sets waiting on a queued variable resume on its settle event.
            cancelled.extend(sched.queue.drain(..).filter_map(|key| self.variable_by_key(key)));
            sched.statuses.clear();
            sched.external_waits = 0;
            self.pending.send_replace(0);
            (cancelled, std::mem::take(&mut sched.subscriptions))
        };
        drop(subscriptions);

        debug!(
            target: "scheduler",
            "Deactivated scene '{}', cancelled {} updates",
            self.name,
            cancelled.len()
        );
        for variable in cancelled {
            variable.publish(&VariableEvent::UpdateSettled(variable.key()));
        }
    }

    fn refresh(self: &Arc<Self>, name: &str) -> bool {
        let Some(variable) = self.local(name) else {
            warn!(target: "scheduler", "Scene '{}' has no variable named '{}'", self.name, name);
            return false;
        };

        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active {
                return false;
            }
            let map = self.dependency_map(&self.variables());
            self.enqueue_with_dependents(&mut sched, &map, variable.key());
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
        true
    }

    fn set_time_range(self: &Arc<Self>, range: TimeRange) {
        *self.time_range.write().unwrap_or_else(PoisonError::into_inner) = Some(range);

        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active {
                return;
            }
            let variables = self.variables();
            let map = self.dependency_map(&variables);
            for variable in variables.iter().filter(|v| v.refreshes_on_time_range()) {
                self.enqueue_with_dependents(&mut sched, &map, variable.key());
            }
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn add_variable(self: &Arc<Self>, variable: Arc<Variable>) {
        let key = variable.key();
        {
            let mut variables = self.variables.write().unwrap_or_else(PoisonError::into_inner);
            if variables.iter().any(|existing| existing.name() == variable.name()) {
                warn!(
                    target: "scheduler",
                    "Scene '{}' already has a variable named '{}'; the first one wins",
                    self.name,
                    variable.name()
                );
            }
            variables.push(variable);
        }

        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active {
                return;
            }
            let map = self.dependency_map(&self.variables());
            self.enqueue_with_dependents(&mut sched, &map, key);
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn remove_variable(self: &Arc<Self>, name: &str) -> Option<Arc<Variable>> {
        let removed = {
            let mut variables = self.variables.write().unwrap_or_else(PoisonError::into_inner);
            let index = variables.iter().position(|variable| variable.name() == name)?;
            variables.remove(index)
        };
        let key = removed.key();

        let mut outbox = Outbox::new();
        let subscription = {
            let mut sched = self.lock();
            if let Some(in_flight) = sched.in_flight.remove(&key) {
                in_flight.abort.abort();
                removed.cancel_update();
            }
            sched.dequeue(key);
            sched.statuses.remove(&key);
            let subscription = sched.subscriptions.remove(&key);
            self.run_queue(&mut sched, &mut outbox);
            subscription
        };
        drop(subscription);
        self.flush(outbox);

        debug!(target: "scheduler", "Removed '{}' from scene '{}'", name, self.name);
        Some(removed)
    }

    fn handle_event(self: &Arc<Self>, event: &VariableEvent) {
        let key = event.key();
        let local = self.variable_by_key(key).is_some();
        match event {
            VariableEvent::ValueChanged(_) if local => self.on_value_changed(key),
            VariableEvent::ValueChanged(_) => self.on_external_changed(key),
            VariableEvent::UpdateSettled(_) if !local => self.resume(),
            VariableEvent::UpdateSettled(_) => {}
        }
    }

    fn on_value_changed(self: &Arc<Self>, key: VariableKey) {
        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active {
                return;
            }
            let map = self.dependency_map(&self.variables());
            let dependents = map.transitive_dependents(key);

            if sched.status(key) == UpdateStatus::Updating {
                // The sweep after this update settles starts them.
                trace!(target: "scheduler", "'{}' changed while updating", map.name(key));
                for dependent in dependents {
                    self.enqueue(&mut sched, dependent);
                }
                return;
            }

            if sched.status(key) == UpdateStatus::Errored {
                sched.statuses.remove(&key);
            }
            debug!(
                target: "scheduler",
                "'{}' changed, requeueing {} dependents",
                map.name(key),
                dependents.len()
            );
            for dependent in dependents {
                self.enqueue(&mut sched, dependent);
            }
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn on_external_changed(self: &Arc<Self>, key: VariableKey) {
        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active {
                return;
            }
            let map = self.dependency_map(&self.variables());
            let dependents = map.transitive_dependents(key);
            if dependents.is_empty() {
                return;
            }
            debug!(
                target: "scheduler",
                "Ancestor variable '{}' changed, requeueing {} variables of scene '{}'",
                map.name(key),
                dependents.len(),
                self.name
            );
            for dependent in dependents {
                self.enqueue(&mut sched, dependent);
            }
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn resume(self: &Arc<Self>) {
        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if !sched.active || sched.queue.is_empty() {
                return;
            }
            self.run_queue(&mut sched, &mut outbox);
        }
        self.flush(outbox);
    }

    fn enqueue_with_dependents(&self, sched: &mut Scheduler, map: &DependencyMap, key: VariableKey) {
        self.enqueue(sched, key);
        for dependent in map.transitive_dependents(key) {
            self.enqueue(sched, dependent);
        }
    }

    fn enqueue(&self, sched: &mut Scheduler, key: VariableKey) {
        let Some(variable) = self.variable_by_key(key) else {
            return;
        };
        if !variable.has_update() {
            return;
        }

        match sched.status(key) {
            UpdateStatus::Queued => return,
            UpdateStatus::Updating => {
                if let Some(in_flight) = sched.in_flight.remove(&key) {
                    in_flight.abort.abort();
                    variable.cancel_update();
                    debug!(
                        target: "scheduler",
                        "Restarting update of '{}' after a dependency changed",
                        variable.name()
                    );
                }
            }
            UpdateStatus::Idle | UpdateStatus::Errored => {}
        }
        sched.statuses.insert(key, UpdateStatus::Queued);
        sched.queue.push(key);
    }

    fn blocker(&self, sched: &Scheduler, map: &DependencyMap, key: VariableKey) -> Blocker {
        for &dependency in map.local(key) {
            match sched.status(dependency) {
                UpdateStatus::Queued | UpdateStatus::Updating => return Blocker::Local,
                UpdateStatus::Errored => match self.config.dependency_error_policy {
                    DependencyErrorPolicy::Wait => return Blocker::Local,
                    DependencyErrorPolicy::Fail => return Blocker::Failed(map.name(dependency)),
                    DependencyErrorPolicy::Proceed => {}
                },
                UpdateStatus::Idle => {}
            }
        }

        let mut external_blocker = None;
        for external in map.external(key) {
            let (status, ancestor_busy) = external.owner.inner.schedule_state(external.variable.key());
            let progressing = if external.variable.is_loading() || status == UpdateStatus::Updating {
                true
            } else if status == UpdateStatus::Queued {
                ancestor_busy
            } else {
                continue;
            };
            *external_blocker.get_or_insert(false) |= progressing;
        }

        match external_blocker {
            Some(progressing) => Blocker::External {
                progressing,
            },
            None => Blocker::None,
        }
    }

    /// Start every queued variable whose dependencies have settled, until a
    /// sweep makes no progress.
    fn run_queue(self: &Arc<Self>, sched: &mut Scheduler, outbox: &mut Outbox) {
        if !sched.active {
            return;
        }
        let Some(runtime) = sched.runtime.clone() else {
            return;
        };
        let variables = self.variables();
        let map = self.dependency_map(&variables);
        self.ensure_subscriptions(sched, &variables, &map);

        loop {
            let mut progressed = false;
            let mut external_waits = 0;

            for key in sched.queue.clone() {
                let Some(variable) = variables.iter().find(|v| v.key() == key) else {
                    sched.dequeue(key);
                    sched.statuses.remove(&key);
                    continue;
                };

                match self.blocker(sched, &map, key) {
                    Blocker::None => {
                        sched.dequeue(key);
                        self.start_update(sched, variable, &runtime, outbox);
                        progressed = true;
                    }
                    Blocker::Local => {}
                    Blocker::External {
                        progressing,
                    } => {
                        if progressing {
                            external_waits += 1;
                        }
                    }
                    Blocker::Failed(dependency) => {
                        sched.dequeue(key);
                        variable.commit_error(VariableError::DependencyBlocked {
                            variable: variable.name(),
                            dependency,
                        });
                        sched.statuses.insert(key, UpdateStatus::Errored);
                        outbox.push((Arc::clone(variable), VariableEvent::UpdateSettled(key)));
                        progressed = true;
                    }
                }
            }

            sched.external_waits = external_waits;
            if !progressed {
                break;
            }
        }

        if !sched.queue.is_empty() {
            trace!(
                target: "scheduler",
                "Scene '{}': {} queued, {} in flight",
                self.name,
                sched.queue.len(),
                sched.in_flight.len()
            );
        }
    }

    fn ensure_subscriptions(
        self: &Arc<Self>,
        sched: &mut Scheduler,
        variables: &[Arc<Variable>],
        map: &DependencyMap,
    ) {
        let externals = map.external.values().flatten().map(|external| &external.variable);
        for variable in variables.iter().chain(externals) {
            if sched.subscriptions.contains_key(&variable.key()) {
                continue;
            }
            let weak = Arc::downgrade(self);
            let subscription = variable.subscribe(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event(event);
                }
            });
            sched.subscriptions.insert(variable.key(), subscription);
        }
    }

    fn start_update(
        self: &Arc<Self>,
        sched: &mut Scheduler,
        variable: &Arc<Variable>,
        runtime: &Handle,
        outbox: &mut Outbox,
    ) {
        let key = variable.key();
        sched.statuses.insert(key, UpdateStatus::Updating);
        variable.begin_update();

        let services = self.services();
        let context = UpdateContext {
            scope: self.as_ref(),
            interpolator: &self.interpolator,
            services: &services,
            time_range: self.time_range(),
        };
        let future = match variable.prepare_update(&context) {
            Ok(future) => future,
            Err(error) => {
                variable.commit_error(error);
                sched.statuses.insert(key, UpdateStatus::Errored);
                outbox.push((Arc::clone(variable), VariableEvent::UpdateSettled(key)));
                return;
            }
        };

        sched.next_token += 1;
        let token = sched.next_token;
        let epoch = sched.epoch;
        let weak = Arc::downgrade(self);
        debug!(target: "scheduler", "Updating '{}' in scene '{}'", variable.name(), self.name);

        let task = runtime.spawn(async move {
            let result = future.await;
            if let Some(inner) = weak.upgrade() {
                inner.complete_update(key, token, epoch, result);
            }
        });
        sched.in_flight.insert(
            key,
            InFlight {
                token,
                abort: task.abort_handle(),
            },
        );
    }

    fn complete_update(
        self: &Arc<Self>,
        key: VariableKey,
        token: u64,
        epoch: u64,
        result: Result<Vec<VariableOption>, VariableError>,
    ) {
        let (variable, changed, succeeded) = {
            let mut sched = self.lock();
            if sched.in_flight.get(&key).is_none_or(|in_flight| in_flight.token != token) {
                trace!(target: "scheduler", "Discarding superseded update of {}", key);
                return;
            }
            sched.in_flight.remove(&key);
            let Some(variable) = self.variable_by_key(key) else {
                return;
            };
            match result {
                Ok(options) => {
                    let changed = variable.commit_options(options);
                    (variable, changed, true)
                }
                Err(error) => {
                    variable.commit_error(error);
                    (variable, false, false)
                }
            }
        };

        // Still Updating here, so this set only queues the dependents.
        if changed {
            variable.publish(&VariableEvent::ValueChanged(key));
        }

        let mut outbox = Outbox::new();
        {
            let mut sched = self.lock();
            if sched.epoch != epoch || !sched.active {
                return;
            }
            if sched.status(key) == UpdateStatus::Updating {
                if succeeded {
                    sched.statuses.remove(&key);
                    let map = self.dependency_map(&self.variables());
                    for dependent in map.dependents(key) {
                        let blocked = self.variable_by_key(dependent).is_some_and(|v| {
                            matches!(v.error(), Some(VariableError::DependencyBlocked { .. }))
                        });
                        if blocked && sched.status(dependent) == UpdateStatus::Errored {
                            self.enqueue(&mut sched, dependent);
                        }
                    }
                } else {
                    sched.statuses.insert(key, UpdateStatus::Errored);
                }
            }
            self.run_queue(&mut sched, &mut outbox);
        }

        outbox.insert(0, (variable, VariableEvent::UpdateSettled(key)));
        self.flush(outbox);
    }

    /// Publish collected events, then report the pending count.
    ///
    /// When the set goes idle with variables still queued behind errored
    /// dependencies, those variables publish `UpdateSettled` so nested sets
    /// stop counting them as pending.
    fn flush(&self, outbox: Outbox) {
        for (variable, event) in outbox {
            variable.publish(&event);
        }
        let parked: Vec<Arc<Variable>> = {
            let sched = self.lock();
            let pending = sched.pending();
            let previous = self.pending.send_replace(pending);
            if previous > 0 && pending == 0 {
                sched.queue.iter().filter_map(|&key| self.variable_by_key(key)).collect()
            } else {
                Vec::new()
            }
        };
        for variable in parked {
            variable.publish(&VariableEvent::UpdateSettled(variable.key()));
        }
    }
}

impl Drop for SetInner {
    fn drop(&mut self) {
        let sched = self.scheduler.get_mut().unwrap_or_else(PoisonError::into_inner);
        let variables = self.variables.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (key, in_flight) in sched.in_flight.drain() {
            in_flight.abort.abort();
            if let Some(variable) = variables.iter().find(|v| v.key() == key) {
                variable.cancel_update();
            }
        }
    }
}

/// Builder for [`VariableSet`].
#[derive(Default)]
pub struct VariableSetBuilder {
    name: Option<String>,
    variables: Vec<Arc<Variable>>,
    parent: Option<VariableSet>,
    services: Option<Services>,
    config: Option<EngineConfig>,
    formats: Option<Arc<FormatRegistry>>,
    time_range: Option<TimeRange>,
}

impl VariableSetBuilder {
    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a variable.
    pub fn variable(mut self, variable: Arc<Variable>) -> Self {
        self.variables.push(variable);
        self
    }

    /// Append several variables.
    pub fn variables<I>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = Arc<Variable>>,
    {
        self.variables.extend(variables);
        self
    }

    /// Nest inside `parent`. Unset services, configuration and formats are
    /// inherited from it.
    pub fn parent(mut self, parent: &VariableSet) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Collaborators used by updates.
    pub fn services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    /// Engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Format registry used for interpolation.
    pub fn formats(mut self, formats: Arc<FormatRegistry>) -> Self {
        self.formats = Some(formats);
        self
    }

    /// Initial time range.
    pub const fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Create the (inactive) set.
    pub fn build(self) -> VariableSet {
        let config = self
            .config
            .or_else(|| self.parent.as_ref().map(|parent| parent.inner.config.clone()))
            .unwrap_or_default();
        let interpolator = match (self.formats, &self.parent) {
            (Some(formats), _) => Interpolator::new(formats),
            (None, Some(parent)) => parent.inner.interpolator.clone(),
            (None, None) => Interpolator::default(),
        }
        .with_default_format(config.default_format.clone());
        let (pending, _) = watch::channel(0);

        VariableSet {
            inner: Arc::new(SetInner {
                name: self.name.unwrap_or_else(|| "scene".to_string()),
                variables: RwLock::new(self.variables),
                parent: self.parent,
                services: self.services,
                config,
                interpolator,
                time_range: RwLock::new(self.time_range),
                scheduler: Mutex::new(Scheduler::default()),
                pending,
            }),
        }
    }
}
