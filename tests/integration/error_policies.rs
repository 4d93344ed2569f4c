use scenevars::config::{DependencyErrorPolicy, EngineConfig};
use scenevars::core::VariableError;
use scenevars::scene::{UpdateStatus, VariableSet};
use scenevars::test_utils::{failing, instant};
use scenevars::variables::{Variable, VariableKind, VariableValue};
use std::sync::Arc;

fn with_policy(policy: DependencyErrorPolicy, variables: Vec<Arc<Variable>>) -> VariableSet {
    let config = EngineConfig {
        dependency_error_policy: policy,
        ..EngineConfig::default()
    };
    VariableSet::builder().config(config).variables(variables).build()
}

fn recover(variable: &Variable) {
    variable.update_config(|kind| {
        if let VariableKind::Test(config) = kind {
            config.fail_with = None;
        }
    });
}

/// A failed update keeps the previous value and records the error
#[tokio::test]
async fn test_failed_update_is_recorded_on_variable() {
    let a = Variable::test("a", Default::default()).value("kept").build();
    a.update_config(|kind| {
        if let VariableKind::Test(config) = kind {
            config.fail_with = Some("datasource down".to_string());
        }
    });
    let set = VariableSet::builder().variable(a.clone()).build();

    set.activate();
    set.settled().await;

    assert_eq!(set.status_of("a"), Some(UpdateStatus::Errored));
    assert_eq!(a.value(), VariableValue::single("kept"));
    assert!(!a.is_loading());
    assert_eq!(
        a.error(),
        Some(VariableError::UpdateFailed {
            variable: "a".to_string(),
            reason: "datasource down".to_string(),
        })
    );
}

/// Under `wait` the dependent stays queued until the dependency recovers
#[tokio::test]
async fn test_wait_policy_resumes_after_recovery() {
    let a = failing("a", "ok", "boom");
    let b = instant("b", "$a-b");
    let set = with_policy(DependencyErrorPolicy::Wait, vec![a.clone(), b.clone()]);

    set.activate();
    set.settled().await;
    assert_eq!(set.status_of("b"), Some(UpdateStatus::Queued));
    assert!(b.options().is_empty());

    recover(&a);
    assert!(set.refresh("a"));
    set.settled().await;
    assert_eq!(set.status_of("a"), Some(UpdateStatus::Idle));
    assert!(a.error().is_none());
    assert_eq!(b.value(), VariableValue::single("ok-b"));
}

/// Under `fail` the blocked error propagates down the chain and clears once
/// the dependency recovers
#[tokio::test]
async fn test_fail_policy_blocks_and_retries() {
    let a = failing("a", "ok", "boom");
    let b = instant("b", "$a-b");
    let c = instant("c", "$b-c");
    let set = with_policy(DependencyErrorPolicy::Fail, vec![a.clone(), b.clone(), c.clone()]);

    set.activate();
    set.settled().await;
    assert_eq!(
        b.error(),
        Some(VariableError::DependencyBlocked {
            variable: "b".to_string(),
            dependency: "a".to_string(),
        })
    );
    assert_eq!(
        c.error(),
        Some(VariableError::DependencyBlocked {
            variable: "c".to_string(),
            dependency: "b".to_string(),
        })
    );

    recover(&a);
    set.refresh("a");
    set.settled().await;
    assert!(b.error().is_none());
    assert!(c.error().is_none());
    assert_eq!(c.value(), VariableValue::single("ok-b-c"));
}

/// Under `proceed` dependents update against the last good value
#[tokio::test]
async fn test_proceed_policy_uses_last_value() {
    let a = Variable::test("a", Default::default()).value("old").build();
    a.update_config(|kind| {
        if let VariableKind::Test(config) = kind {
            config.query = "new".to_string();
            config.fail_with = Some("boom".to_string());
        }
    });
    let b = instant("b", "$a-b");
    let set = with_policy(DependencyErrorPolicy::Proceed, vec![a.clone(), b.clone()]);

    set.activate();
    set.settled().await;
    assert_eq!(set.status_of("a"), Some(UpdateStatus::Errored));
    assert_eq!(set.status_of("b"), Some(UpdateStatus::Idle));
    assert_eq!(b.value(), VariableValue::single("old-b"));
}

/// An error in one branch does not hold back an unrelated branch
#[tokio::test]
async fn test_errors_are_isolated_to_their_dependents() {
    let broken = failing("broken", "x", "boom");
    let blocked = instant("blocked", "$broken");
    let healthy = instant("healthy", "fine");
    let downstream = instant("downstream", "$healthy!");
    let set = VariableSet::builder().variables([broken, blocked.clone(), healthy, downstream.clone()]).build();

    set.activate();
    set.settled().await;
    assert_eq!(downstream.value(), VariableValue::single("fine!"));
    assert!(blocked.options().is_empty());
}
