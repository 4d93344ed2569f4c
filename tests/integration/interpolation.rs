use chrono::DateTime;
use scenevars::config::EngineConfig;
use scenevars::scene::VariableSet;
use scenevars::templating::FormatRegistry;
use scenevars::test_utils::RecordingQueryRunner;
use scenevars::variables::{
    DataSourceRef, QueryConfig, Services, TimeRange, Variable, VariableValue,
};
use std::sync::Arc;

async fn settled_set(variables: Vec<Arc<Variable>>) -> VariableSet {
    let set = VariableSet::builder().variables(variables).build();
    set.activate();
    set.settled().await;
    set
}

/// A multi-value selection rendered through each list format
#[tokio::test]
async fn test_multi_value_formats() {
    let host = Variable::custom("host", "Web One : web1, Database : db1, Cache : cache1")
        .multi(true)
        .value(vec!["web1", "db1"])
        .build();
    let set = settled_set(vec![host]).await;

    assert_eq!(set.interpolate("$host"), "web1,db1");
    assert_eq!(set.interpolate("${host:csv}"), "web1,db1");
    assert_eq!(set.interpolate("${host:pipe}"), "web1|db1");
    assert_eq!(set.interpolate("${host:regex}"), "(web1|db1)");
    assert_eq!(set.interpolate("${host:glob}"), "{web1,db1}");
    assert_eq!(set.interpolate("${host:lucene}"), "(\"web1\" OR \"db1\")");
    assert_eq!(set.interpolate("${host:queryparam}"), "var-host=web1&var-host=db1");
    assert_eq!(set.interpolate("${host:json}"), "[\"web1\",\"db1\"]");
    assert_eq!(set.interpolate("${host:text}"), "Web One + Database");
    assert_eq!(set.interpolate("[[host:singlequote]]"), "'web1','db1'");
}

/// "All" expands to every option value, except for the text format
#[tokio::test]
async fn test_all_selection_expands_to_options() {
    let env = Variable::custom("env", "dev, prod").include_all(true).value(VariableValue::all()).build();
    let set = settled_set(vec![env.clone()]).await;

    assert!(env.value().is_all());
    assert_eq!(set.interpolate("$env"), "dev,prod");
    assert_eq!(set.interpolate("${env:regex}"), "(dev|prod)");
    assert_eq!(set.interpolate("${env:text}"), "All");
}

/// A custom all value replaces the expansion
#[tokio::test]
async fn test_custom_all_value() {
    let region = Variable::custom("region", "eu, us").all_value(".*").value(VariableValue::all()).build();
    let set = settled_set(vec![region]).await;

    assert_eq!(set.interpolate("$region"), ".*");
    assert_eq!(set.interpolate("${region:regex}"), ".*");
    assert_eq!(set.interpolate("${region:text}"), "All");
    assert_eq!(set.interpolate("${region:queryparam}"), "var-region=All");
}

/// Formats in a query payload are applied before the query runs
#[tokio::test]
async fn test_formatted_values_reach_query_runner() {
    let runner = RecordingQueryRunner::with_rows(["up"]);
    let job = Variable::custom("job", "api, web").multi(true).value(vec!["api", "web"]).build();
    let query = QueryConfig::new(DataSourceRef::uid("prom"), "up{job=~\"${job:regex}\", env=\"$job\"}");
    let metric = Variable::query("metric", query).build();
    let set = VariableSet::builder()
        .services(Services::new().with_query_runner(Arc::new(runner.clone())))
        .variables([job, metric])
        .build();

    set.activate();
    set.settled().await;
    assert_eq!(runner.queries(), vec!["up{job=~\"(api|web)\", env=\"api,web\"}"]);
}

/// Caller and configured default formats apply to references without one
#[tokio::test]
async fn test_caller_and_default_formats() {
    let host = Variable::custom("host", "a, b").multi(true).value(vec!["a", "b"]).build();
    let set = settled_set(vec![host.clone()]).await;
    assert_eq!(set.interpolate_with_format("$host / ${host:csv}", "pipe"), "a|b / a,b");

    let config = EngineConfig {
        default_format: "glob".to_string(),
        ..EngineConfig::default()
    };
    let globbed = VariableSet::builder().config(config).variable(host).build();
    assert_eq!(globbed.interpolate("$host"), "{a,b}");
}

/// Formats registered by the embedder are available to templates and
/// inherited by nested sets
#[tokio::test]
async fn test_registered_format_is_inherited() {
    let mut registry = FormatRegistry::new();
    registry.register("upper", "Upper case", |input, _| input.value.to_string().to_uppercase());
    let parent = VariableSet::builder()
        .formats(Arc::new(registry))
        .variable(Variable::constant("env", "prod").build())
        .build();
    let child = VariableSet::builder().parent(&parent).build();

    assert_eq!(parent.interpolate("${env:upper}"), "PROD");
    assert_eq!(child.interpolate("${env:upper}-${env}"), "PROD-prod");
}

/// `$__from` and `$__to` follow the set's time range
#[tokio::test]
async fn test_time_range_builtins() {
    let from = DateTime::from_timestamp(1_614_834_367, 0).unwrap();
    let to = DateTime::from_timestamp(1_614_837_967, 0).unwrap();
    let set = VariableSet::builder().time_range(TimeRange::new(from, to)).build();

    assert_eq!(set.interpolate("$__from"), "1614834367000");
    assert_eq!(set.interpolate("${__to:date:seconds}"), "1614837967");
    assert_eq!(set.interpolate("${__from:date:iso}"), "2021-03-04T05:06:07.000Z");
    assert_eq!(VariableSet::builder().build().interpolate("$__from"), "$__from");
}
