use chrono::DateTime;
use scenevars::scene::{UpdateStatus, VariableSet};
use scenevars::test_utils::{RecordingQueryRunner, gated, instant};
use scenevars::variables::{
    DataSourceRef, QueryConfig, Services, TimeRange, UpdateGate, Variable, VariableValue,
};
use std::sync::Arc;

fn fixed_range() -> TimeRange {
    let from = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
    let to = DateTime::from_timestamp_millis(1_700_003_600_000).unwrap();
    TimeRange::new(from, to)
}

/// A local variable shadows an ancestor variable of the same name
#[tokio::test]
async fn test_local_variable_shadows_ancestor() {
    let parent = VariableSet::builder()
        .name("dashboard")
        .variables([instant("env", "prod, dev"), instant("region", "eu")])
        .build();
    let local_env = instant("env", "staging");
    let label = instant("label", "$env@$region");
    let child = VariableSet::builder().name("panel").parent(&parent).variables([local_env, label.clone()]).build();

    parent.activate();
    child.activate();
    parent.settled().await;
    child.settled().await;

    assert_eq!(label.value(), VariableValue::single("staging@eu"));
    assert_eq!(parent.interpolate("$env"), "prod");
    assert_eq!(child.interpolate("$env"), "staging");

    // The shadowed ancestor variable is not a dependency of the child
    parent.set_value("env", "dev");
    parent.settled().await;
    child.settled().await;
    assert_eq!(label.value(), VariableValue::single("staging@eu"));
}

/// References resolve through every level of the scope chain
#[tokio::test]
async fn test_three_level_scope_chain() {
    let root = VariableSet::builder().name("root").variable(instant("org", "acme")).build();
    let middle = VariableSet::builder().name("row").parent(&root).variable(instant("team", "${org}-infra")).build();
    let service = instant("service", "${team}/api");
    let leaf = VariableSet::builder().name("panel").parent(&middle).variable(service.clone()).build();

    for set in [&root, &middle, &leaf] {
        set.activate();
    }
    for set in [&root, &middle, &leaf] {
        set.settled().await;
    }

    assert_eq!(service.value(), VariableValue::single("acme-infra/api"));
    assert_eq!(leaf.interpolate("${org}|${team}|${service}"), "acme|acme-infra|acme-infra/api");
    assert!(leaf.find("org").is_ok());
    assert!(root.find("service").is_err());
}

/// Children inherit the query runner and time range of their ancestors
#[tokio::test]
async fn test_child_inherits_services_and_time_range() {
    let runner = RecordingQueryRunner::with_rows(["api", "web"]);
    let parent = VariableSet::builder()
        .name("dashboard")
        .services(Services::new().with_query_runner(Arc::new(runner.clone())))
        .time_range(fixed_range())
        .variable(instant("env", "prod"))
        .build();

    let query = QueryConfig::new(DataSourceRef::uid("prom"), "label_values(up{env=\"$env\"}, job)");
    let job = Variable::query("job", query).build();
    let child = VariableSet::builder().name("panel").parent(&parent).variable(job.clone()).build();

    parent.activate();
    child.activate();
    parent.settled().await;
    child.settled().await;

    assert_eq!(job.value(), VariableValue::single("api"));
    let requests = runner.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].time_range, Some(fixed_range()));
    assert_eq!(runner.queries(), vec!["label_values(up{env=\"prod\"}, job)"]);
    assert_eq!(child.interpolate("${__from}"), "1700000000000");
}

/// Deactivating the ancestor releases children waiting on it
#[tokio::test]
async fn test_parent_deactivation_releases_waiting_child() {
    let gate = UpdateGate::new();
    let parent = VariableSet::builder().name("dashboard").variable(gated("env", "prod", &gate)).build();
    let service = instant("service", "api-$env");
    let child = VariableSet::builder().name("panel").parent(&parent).variable(service.clone()).build();

    parent.activate();
    child.activate();
    assert_eq!(child.status_of("service"), Some(UpdateStatus::Queued));

    parent.deactivate();
    child.settled().await;
    assert_eq!(child.status_of("service"), Some(UpdateStatus::Idle));
    assert_eq!(service.value(), VariableValue::single("api-"));
    assert_eq!(gate.completed(), 0);
}

/// An inactive child does not react to ancestor changes
#[tokio::test]
async fn test_inactive_child_ignores_ancestor_changes() {
    let parent = VariableSet::builder().name("dashboard").variable(instant("env", "prod, dev")).build();
    let gate = UpdateGate::new();
    gate.release(10);
    let child = VariableSet::builder().name("panel").parent(&parent).variable(gated("svc", "$env-svc", &gate)).build();

    parent.activate();
    child.activate();
    parent.settled().await;
    child.settled().await;
    assert_eq!(gate.started(), 1);

    child.deactivate();
    parent.set_value("env", "dev");
    parent.settled().await;
    assert_eq!(gate.started(), 1);
}
