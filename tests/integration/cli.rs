//! End-to-end tests of the `scenevars` binary against scene files in a
//! temporary directory.

use assert_cmd::Command;
use predicates::prelude::*;
use scenevars::test_utils::write_scene;
use std::path::Path;
use tempfile::TempDir;

const OVERVIEW: &str = r#"
name = "overview"

[[datasources]]
uid = "prom-main"
name = "Prometheus"
type = "prometheus"
is_default = true

[[responses]]
match = "label_values(job)"
rows = [{ text = "api" }, { text = "web" }]

[[variables]]
name = "env"
type = "custom"
query = "dev, prod"
value = "prod"

[[variables]]
name = "job"
type = "query"
datasource = { uid = "prom-main" }
query = "label_values(job)"

[[variables]]
name = "instance"
type = "custom"
query = "$job-$env-1, $job-$env-2"

[[scenes]]
name = "details"
variables = [{ name = "port", type = "constant", value = "9090" }]
"#;

/// The binary with an isolated configuration and colors disabled.
fn scenevars(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scenevars").unwrap();
    cmd.env("NO_COLOR", "1")
        .env("SCENEVARS_CONFIG", dir.join("missing-config.toml"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_resolve_text_output() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("env=prod"))
        .stdout(predicate::str::contains("job=api"))
        .stdout(predicate::str::contains("instance=api-prod-1"))
        .stdout(predicate::str::contains("details/port=9090"));
}

#[test]
fn test_resolve_with_overrides_and_template() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--set", "job=web", "--set", "$env=dev"])
        .args(["--template", "up{instance=\"$instance\"}"])
        .args(["--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("instance=web-dev-1"))
        .stdout(predicate::str::contains("up{instance=\"web-dev-1\"}"));
}

#[test]
fn test_resolve_template_in_nested_scene() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--scene", "details", "--template", "$instance:$port", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api-prod-1:9090"));

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--scene", "detials", "--template", "$port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Did you mean: details?"));
}

#[test]
fn test_resolve_json_output() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    let output = scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let scenes = json["scenes"].as_array().unwrap();
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0]["name"], "overview");
    assert_eq!(scenes[1]["parent"], "overview");
    let names: Vec<&str> =
        scenes[0]["variables"].as_array().unwrap().iter().map(|v| v["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["env", "job", "instance"]);
}

#[test]
fn test_resolve_unknown_override_suggests_names() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--set", "jb=api"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Variable not found: 'jb'"))
        .stderr(predicate::str::contains("Did you mean: job?"));
}

#[test]
fn test_resolve_reports_failed_query() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(
        temp.path(),
        "broken.toml",
        r#"
[[responses]]
match = "up"
error = "connection refused"

[[variables]]
name = "job"
type = "query"
datasource = { uid = "prom" }
query = "up"
"#,
    );

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .assert()
        .failure()
        .stdout(predicate::str::contains("job"))
        .stderr(predicate::str::contains("connection refused"));
}

#[test]
fn test_missing_scene_file() {
    let temp = TempDir::new().unwrap();

    scenevars(temp.path())
        .arg("resolve")
        .arg(temp.path().join("nope.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_deps_tree() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);

    scenevars(temp.path())
        .arg("deps")
        .arg(&scene)
        .assert()
        .success()
        .stdout(predicate::str::contains("overview"))
        .stdout(predicate::str::contains("$instance"))
        .stdout(predicate::str::contains("$job"));

    scenevars(temp.path())
        .arg("deps")
        .arg(&scene)
        .args(["--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("instance: (job env|env job)").unwrap());
}

#[test]
fn test_deps_reports_cycles() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(
        temp.path(),
        "cycle.toml",
        r#"
[[variables]]
name = "a"
type = "custom"
query = "$b"

[[variables]]
name = "b"
type = "custom"
query = "$a"
"#,
    );

    scenevars(temp.path())
        .arg("deps")
        .arg(&scene)
        .assert()
        .success()
        .stdout(predicate::str::contains("warning:"));
}

#[test]
fn test_format_command() {
    let temp = TempDir::new().unwrap();

    scenevars(temp.path())
        .args(["format", "lucene", "api server"])
        .assert()
        .success()
        .stdout(predicate::str::diff("api\\ server\n"));

    scenevars(temp.path())
        .args(["format", "regex", "api", "web"])
        .assert()
        .success()
        .stdout(predicate::str::diff("(api|web)\n"));

    scenevars(temp.path())
        .args(["format", "queryparam", "--name", "env", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::diff("var-env=prod\n"));
}

#[test]
fn test_format_unknown_suggests_close_match() {
    let temp = TempDir::new().unwrap();

    scenevars(temp.path())
        .args(["format", "lucen", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown variable format: 'lucen'"))
        .stderr(predicate::str::contains("lucene"));
}

#[test]
fn test_formats_lists_builtins() {
    let temp = TempDir::new().unwrap();

    scenevars(temp.path())
        .arg("formats")
        .assert()
        .success()
        .stdout(predicate::str::contains("csv"))
        .stdout(predicate::str::contains("queryparam"));
}

#[test]
fn test_config_default_format_applies() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(
        temp.path(),
        "multi.toml",
        r#"
[[variables]]
name = "env"
type = "custom"
query = "a, b, c"
multi = true
value = ["a", "b"]
"#,
    );
    let config = write_scene(temp.path(), "config.toml", "default_format = \"glob\"\n");

    scenevars(temp.path())
        .arg("resolve")
        .arg(&scene)
        .args(["--template", "$env", "--format", "text"])
        .env("SCENEVARS_CONFIG", &config)
        .assert()
        .success()
        .stdout(predicate::str::contains("{a,b}"));

    scenevars(temp.path())
        .arg("--config")
        .arg(&config)
        .arg("resolve")
        .arg(&scene)
        .args(["--template", "${env:pipe}", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a|b"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let scene = write_scene(temp.path(), "overview.toml", OVERVIEW);
    let config = write_scene(temp.path(), "config.toml", "default_format = \"nope\"\n");

    scenevars(temp.path())
        .args(["--config"])
        .arg(&config)
        .arg("resolve")
        .arg(&scene)
        .assert()
        .failure();
}
