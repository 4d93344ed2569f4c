use chrono::Duration;
use scenevars::core::VariableError;
use scenevars::scene::{UpdateStatus, VariableSet};
use scenevars::test_utils::{RecordingQueryRunner, instant};
use scenevars::variables::{
    DataSourceInstance, DataSourceRef, MetricFindValue, QueryConfig, Services, TimeRange, Variable,
    VariableOption, VariableRefresh, VariableSort, VariableValue,
};
use std::sync::Arc;

fn services(runner: &RecordingQueryRunner) -> Services {
    Services::new().with_query_runner(Arc::new(runner.clone()))
}

fn prom(query: &str) -> QueryConfig {
    QueryConfig::new(DataSourceRef::uid("prom"), query)
}

/// Only variables refreshing on time range changes re-query, and their
/// dependents follow
#[tokio::test]
async fn test_time_range_change_refreshes_matching_queries() {
    let runner = RecordingQueryRunner::with_rows(["a", "b"]);
    let on_range = Variable::query("pods", prom("pods").with_refresh(VariableRefresh::OnTimeRangeChange)).build();
    let on_load = Variable::query("nodes", prom("nodes")).build();
    let dependent = instant("pod_label", "pod-$pods");
    let set = VariableSet::builder()
        .services(services(&runner))
        .time_range(TimeRange::last(Duration::hours(1)))
        .variables([on_range, on_load, dependent.clone()])
        .build();

    set.activate();
    set.settled().await;
    assert_eq!(runner.count(), 2);
    assert_eq!(dependent.value(), VariableValue::single("pod-a"));

    let range = TimeRange::last(Duration::hours(6));
    set.set_time_range(range);
    set.settled().await;
    let queries = runner.queries();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries.iter().filter(|q| q.as_str() == "pods").count(), 2);
    let last = runner.requests().pop().unwrap();
    assert_eq!(last.variable, "pods");
    assert_eq!(last.time_range, Some(range));
    assert_eq!(set.time_range(), Some(range));
}

/// Regex extraction, deduplication and sorting of query rows
#[tokio::test]
async fn test_regex_extraction_and_sort() {
    let runner = RecordingQueryRunner::with_rows(["host-10.eu", "host-2.us", "host-2.eu", "db-1.eu"]);
    let config = prom("hosts").with_regex("/host-(\\d+)/").with_sort(VariableSort::NumericalAsc);
    let hosts = Variable::query("hosts", config).build();
    let set = VariableSet::builder().services(services(&runner)).variable(hosts.clone()).build();

    set.activate();
    set.settled().await;

    let values: Vec<String> = hosts.options().into_iter().map(|o| o.value).collect();
    assert_eq!(values, vec!["2", "10"]);
    assert_eq!(hosts.value(), VariableValue::single("2"));
}

/// Named `text` / `value` groups split labels from values
#[tokio::test]
async fn test_named_groups_and_templated_regex() {
    let runner = RecordingQueryRunner::new(|_| {
        Ok(vec![
            MetricFindValue::text("prod/api=uid-1"),
            MetricFindValue::text("prod/web=uid-2"),
            MetricFindValue::text("dev/api=uid-3"),
        ])
    });
    let env = Variable::custom("env", "prod, dev").build();
    let config = prom("services").with_regex("/^${env}/(?<text>\\w+)=(?<value>.+)$/");
    let service = Variable::query("service", config).build();
    let set = VariableSet::builder().services(services(&runner)).variables([env, service.clone()]).build();

    set.activate();
    set.settled().await;
    assert_eq!(service.value(), VariableValue::single("uid-1"));
    assert_eq!(service.text(), VariableValue::single("api"));
    assert_eq!(service.options().len(), 2);

    set.set_value("env", "dev");
    set.settled().await;
    assert_eq!(service.value(), VariableValue::single("uid-3"));
    assert_eq!(set.interpolate("${service:text}"), "api");
}

/// A query error is stored on the variable and leaves its options alone
#[tokio::test]
async fn test_query_error_keeps_previous_options() {
    let runner = RecordingQueryRunner::new(|request| {
        if request.query.as_str() == Some("broken") {
            anyhow::bail!("connection refused");
        }
        Ok(vec![MetricFindValue::text("ok")])
    });
    let target = Variable::custom("target", "fine, broken").build();
    let probe = Variable::query("probe", prom("$target")).build();
    let set = VariableSet::builder().services(services(&runner)).variables([target, probe.clone()]).build();

    set.activate();
    set.settled().await;
    assert_eq!(probe.value(), VariableValue::single("ok"));

    set.set_value("target", "broken");
    set.settled().await;
    assert_eq!(set.status_of("probe"), Some(UpdateStatus::Errored));
    assert_eq!(probe.value(), VariableValue::single("ok"));
    assert_eq!(probe.options().len(), 1);
    assert!(matches!(probe.error(), Some(VariableError::UpdateFailed { ref reason, .. }) if reason.contains("connection refused")));
}

/// Query variables without a runner fail with a clear error
#[tokio::test]
async fn test_missing_query_runner() {
    let job = Variable::query("job", prom("up")).build();
    let set = VariableSet::builder().variable(job.clone()).build();

    set.activate();
    set.settled().await;
    assert_eq!(
        job.error(),
        Some(VariableError::MissingService {
            variable: "job".to_string(),
            service: "query runner".to_string(),
        })
    );
}

/// Multi-select keeps the surviving part of the selection across refreshes
#[tokio::test]
async fn test_multi_selection_survives_refresh() {
    let rows = Arc::new(std::sync::Mutex::new(vec!["a", "b", "c"]));
    let source = rows.clone();
    let runner = RecordingQueryRunner::new(move |_| {
        Ok(source.lock().unwrap().iter().map(|row| MetricFindValue::text(*row)).collect())
    });
    let pods = Variable::query("pods", prom("pods")).multi(true).value(vec!["b", "c"]).build();
    let set = VariableSet::builder().services(services(&runner)).variable(pods.clone()).build();

    set.activate();
    set.settled().await;
    assert_eq!(pods.value(), VariableValue::multi(["b", "c"]));

    *rows.lock().unwrap() = vec!["c", "d"];
    set.refresh("pods");
    set.settled().await;
    assert_eq!(pods.value(), VariableValue::multi(["c"]));

    *rows.lock().unwrap() = vec!["x"];
    set.refresh("pods");
    set.settled().await;
    assert_eq!(pods.value(), VariableValue::multi(["x"]));
}

/// Datasource variables list instances of one plugin by uid
#[tokio::test]
async fn test_datasource_variable_drives_query_datasource() {
    let catalog = vec![
        DataSourceInstance {
            uid: "p-eu".to_string(),
            name: "Prometheus EU".to_string(),
            plugin_id: "prometheus".to_string(),
            is_default: true,
        },
        DataSourceInstance {
            uid: "p-us".to_string(),
            name: "Prometheus US".to_string(),
            plugin_id: "prometheus".to_string(),
            is_default: false,
        },
    ];
    let runner = RecordingQueryRunner::with_rows(["api"]);
    let ds = Variable::datasource("ds", "prometheus").build();
    let job = Variable::query("job", QueryConfig::new(DataSourceRef::uid("${ds}"), "label_values(job)")).build();
    let set = VariableSet::builder()
        .services(services(&runner).with_datasources(Arc::new(catalog)))
        .variables([ds.clone(), job])
        .build();

    set.activate();
    set.settled().await;
    assert_eq!(ds.value(), VariableValue::single("p-eu"));
    assert_eq!(ds.text(), VariableValue::single("Prometheus EU"));
    assert_eq!(runner.requests()[0].datasource.uid, "p-eu");

    set.set_value("ds", "p-us");
    set.settled().await;
    assert_eq!(runner.requests()[1].datasource.uid, "p-us");
}

/// Never-refreshing queries with stored options are not re-run on activation
#[tokio::test]
async fn test_never_refresh_skips_activation() {
    let runner = RecordingQueryRunner::with_rows(["fresh"]);
    let config = prom("static").with_refresh(VariableRefresh::Never);
    let stored = Variable::query("stored", config.clone())
        .options(vec![VariableOption::same("cached")])
        .value("cached")
        .build();
    let empty = Variable::query("empty", config).build();
    let set = VariableSet::builder().services(services(&runner)).variables([stored.clone(), empty.clone()]).build();

    set.activate();
    set.settled().await;
    assert_eq!(runner.queries(), vec!["static"]);
    assert_eq!(stored.value(), VariableValue::single("cached"));
    assert_eq!(empty.value(), VariableValue::single("fresh"));

    assert!(set.refresh("stored"));
    set.settled().await;
    assert_eq!(stored.value(), VariableValue::single("fresh"));
}
