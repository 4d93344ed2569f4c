use scenevars::scene::{UpdateStatus, VariableSet};
use scenevars::test_utils::{gated, instant, wait_until};
use scenevars::variables::{UpdateGate, Variable, VariableEvent, VariableValue};
use std::sync::{Arc, Mutex};

/// A chain `a <- b <- c` updates strictly one link at a time
#[tokio::test]
async fn test_chain_updates_in_dependency_order() {
    let (ga, gb, gc) = (UpdateGate::new(), UpdateGate::new(), UpdateGate::new());
    let a = gated("a", "1, 2", &ga);
    let b = gated("b", "${a}0", &gb);
    let c = gated("c", "${b}0", &gc);
    // Declared out of order on purpose
    let set = VariableSet::builder().variables([c.clone(), b.clone(), a.clone()]).build();

    set.activate();
    assert_eq!((ga.started(), gb.started(), gc.started()), (1, 0, 0));
    assert_eq!(set.status_of("b"), Some(UpdateStatus::Queued));
    assert_eq!(set.status_of("c"), Some(UpdateStatus::Queued));

    ga.release(1);
    assert!(wait_until(|| gb.started() == 1).await);
    assert_eq!(gc.started(), 0);
    assert!(!a.is_loading());
    assert!(b.is_loading());

    gb.release(1);
    assert!(wait_until(|| gc.started() == 1).await);
    gc.release(1);
    set.settled().await;

    assert_eq!(a.value(), VariableValue::single("1"));
    assert_eq!(b.value(), VariableValue::single("10"));
    assert_eq!(c.value(), VariableValue::single("100"));
    assert_eq!(gc.queries(), vec!["100"]);
}

/// After a change of `a`, `c` stays queued and idle while `b` re-runs
#[tokio::test]
async fn test_chain_value_change_restarts_one_link_at_a_time() {
    let (gb, gc) = (UpdateGate::new(), UpdateGate::new());
    let a = instant("a", "1, 2");
    let b = gated("b", "${a}0", &gb);
    let c = gated("c", "${b}0", &gc);
    let set = VariableSet::builder().variables([a.clone(), b.clone(), c.clone()]).build();

    set.activate();
    gb.release(1);
    gc.release(1);
    set.settled().await;
    assert_eq!(c.value(), VariableValue::single("100"));

    assert!(set.set_value("a", "2"));
    assert!(wait_until(|| gb.started() == 2).await);
    assert!(b.is_loading());
    assert!(!c.is_loading());
    assert_eq!(set.status_of("c"), Some(UpdateStatus::Queued));
    assert_eq!(gc.started(), 1);

    gb.release(1);
    assert!(wait_until(|| gc.started() == 2).await);
    assert!(!b.is_loading());
    gc.release(1);
    set.settled().await;

    assert_eq!(b.value(), VariableValue::single("20"));
    assert_eq!(c.value(), VariableValue::single("200"));
    assert_eq!(gc.queries(), vec!["100", "200"]);
}

/// Selecting a value while the variable's own update runs keeps that update
/// and requeues its dependents with the new selection
#[tokio::test]
async fn test_value_change_during_own_update() {
    let gate = UpdateGate::new();
    let a = gated("a", "1, 2", &gate);
    let b = instant("b", "${a}0");
    let set = VariableSet::builder().variables([a.clone(), b.clone()]).build();

    set.activate();
    assert!(a.is_loading());
    assert!(set.set_value("a", "2"));
    assert_eq!(set.status_of("a"), Some(UpdateStatus::Updating));
    assert_eq!(set.status_of("b"), Some(UpdateStatus::Queued));

    gate.release(1);
    set.settled().await;
    assert_eq!(gate.started(), 1);
    assert_eq!(a.value(), VariableValue::single("2"));
    assert_eq!(b.value(), VariableValue::single("20"));
}

/// B and C depend on A, D depends on nothing: A and D start together, B and C
/// start together once A completes, and D is left alone afterwards
#[tokio::test]
async fn test_fan_out_and_unrelated_sibling() {
    let (ga, gbc, gd) = (UpdateGate::new(), UpdateGate::new(), UpdateGate::new());
    let a = gated("a", "x, y", &ga);
    let b = gated("b", "b-$a", &gbc);
    let c = gated("c", "c-$a", &gbc);
    let d = gated("d", "d", &gd);
    let set = VariableSet::builder().variables([a.clone(), b.clone(), c.clone(), d.clone()]).build();

    set.activate();
    assert_eq!(ga.started(), 1);
    assert_eq!(gd.started(), 1);
    assert_eq!(gbc.started(), 0);

    ga.release(1);
    assert!(wait_until(|| gbc.started() == 2).await);
    assert!(b.is_loading() && c.is_loading());

    gbc.release(2);
    gd.release(1);
    set.settled().await;
    assert_eq!(b.value(), VariableValue::single("b-x"));
    assert_eq!(c.value(), VariableValue::single("c-x"));

    gbc.release(2);
    assert!(set.set_value("a", "y"));
    set.settled().await;
    assert_eq!(gbc.started(), 4);
    assert_eq!(gd.started(), 1);
    assert_eq!(b.value(), VariableValue::single("b-y"));
    assert_eq!(c.value(), VariableValue::single("c-y"));
}

/// Changing a dependency while its dependent is loading cancels the stale
/// update; only the restarted one commits
#[tokio::test]
async fn test_value_change_cancels_in_flight_dependent() {
    let gate = UpdateGate::new();
    let a = instant("a", "a1, a2");
    let b = gated("b", "${a}-x", &gate);
    let set = VariableSet::builder().variables([a.clone(), b.clone()]).build();

    set.activate();
    assert!(wait_until(|| gate.started() == 1).await);

    assert!(set.set_value("a", "a2"));
    assert_eq!(gate.started(), 2);
    assert_eq!(gate.queries(), vec!["a1-x", "a2-x"]);

    gate.release(1);
    set.settled().await;
    assert_eq!(b.value(), VariableValue::single("a2-x"));
    assert_eq!(gate.completed(), 1);
    assert_eq!(set.status_of("b"), Some(UpdateStatus::Idle));
}

/// Listeners see a dependency's value change before the dependent's
#[tokio::test]
async fn test_value_changes_are_published_in_dependency_order() {
    let a = instant("a", "1");
    let b = instant("b", "$a-b");
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut subscriptions = Vec::new();
    for variable in [&a, &b] {
        let log = log.clone();
        let name = variable.name();
        subscriptions.push(variable.subscribe(move |event| {
            if matches!(event, VariableEvent::ValueChanged(_)) {
                log.lock().unwrap().push(name.clone());
            }
        }));
    }

    let set = VariableSet::builder().variables([b.clone(), a.clone()]).build();
    set.activate();
    set.settled().await;

    assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    drop(subscriptions);
}

/// Deactivating aborts updates; activating again starts over
#[tokio::test]
async fn test_reactivation_restarts_updates() {
    let gate = UpdateGate::new();
    let a = gated("a", "x", &gate);
    let set = VariableSet::builder().variable(a.clone()).build();

    set.activate();
    assert!(a.is_loading());
    set.deactivate();
    assert!(!a.is_loading());
    assert!(set.is_settled());

    set.activate();
    assert_eq!(gate.started(), 2);
    gate.release(2);
    set.settled().await;
    assert_eq!(a.value(), VariableValue::single("x"));
    assert_eq!(gate.completed(), 1);
}

/// Variables without an update (constants, text boxes) never block dependents
#[tokio::test]
async fn test_static_variables_do_not_block() {
    let prefix = Variable::constant("prefix", "svc").build();
    let filter = Variable::textbox("filter", "api").build();
    let name = instant("name", "${prefix}-${filter}");
    let set = VariableSet::builder().variables([prefix, filter.clone(), name.clone()]).build();

    set.activate();
    set.settled().await;
    assert_eq!(name.value(), VariableValue::single("svc-api"));

    assert!(set.set_value("filter", "web"));
    set.settled().await;
    assert_eq!(name.value(), VariableValue::single("svc-web"));
}

/// A variable added while active is updated and unblocks variables that
/// already referenced its name
#[tokio::test]
async fn test_adding_variable_while_active() {
    let late = instant("late", "${region}-x");
    let set = VariableSet::builder().variable(late.clone()).build();
    set.activate();
    set.settled().await;
    // Unresolved references stay in place
    assert_eq!(late.value(), VariableValue::single("${region}-x"));

    set.add_variable(instant("region", "eu"));
    set.settled().await;
    assert_eq!(late.value(), VariableValue::single("eu-x"));

    let removed = set.remove_variable("region");
    assert!(removed.is_some());
    assert!(set.get("region").is_none());
}

/// Cycles are logged, not fatal: the rest of the set still settles
#[tokio::test]
async fn test_cycle_does_not_block_other_variables() {
    let a = instant("a", "$b");
    let b = instant("b", "$a");
    let free = instant("free", "ok");
    let set = VariableSet::builder().variables([a, b, free.clone()]).build();

    assert!(set.dependency_graph().detect_cycles().is_err());
    set.activate();
    set.settled().await;
    assert_eq!(free.value(), VariableValue::single("ok"));
}
