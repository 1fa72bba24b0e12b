#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn retasc() -> Command {
    let mut cmd = Command::cargo_bin("retasc").unwrap();
    cmd.env_remove("RETASC_CONFIG")
        .env_remove("RETASC_JIRA_TOKEN")
        .env_remove("RETASC_OPENSHIFT_TOKEN");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

fn write_config(dir: &TempDir, product_pages_url: &str) -> PathBuf {
    std::fs::create_dir_all(dir.path().join("templates")).unwrap();
    write(
        dir.path(),
        "config.yaml",
        &format!(
            r#"
rules_path: {root}/rules
jira_template_path: {root}/templates
product_pages_url: {product_pages_url}
jira_url: http://127.0.0.1:9
jira_label_prefix: retasc-id-
jira_fields:
  summary: summary
  labels: labels
connect_timeout: 1
read_timeout: 1
"#,
            root = dir.path().display()
        ),
    )
}

// ---------------------------------------------------------------------------
// retasc validate-rules
// ---------------------------------------------------------------------------

#[test]
fn validate_rules_succeeds() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "http://127.0.0.1:9");
    write(
        dir.path(),
        "rules/main.yaml",
        "name: main\nprerequisites:\n  - rule: other\n",
    );
    write(
        dir.path(),
        "rules/other.yaml",
        "name: other\nprerequisites:\n  - condition: \"true\"\n",
    );

    retasc()
        .arg("--config")
        .arg(&config)
        .arg("validate-rules")
        .arg(dir.path().join("rules"))
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Validation succeeded: The rule files are valid",
        ));
}

#[test]
fn validate_rules_reports_all_problems() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "http://127.0.0.1:9");
    write(
        dir.path(),
        "rules/main.yaml",
        "name: main\nprerequisites:\n  - rule: missing\n",
    );
    write(dir.path(), "rules/broken.yaml", "name: [\n");

    retasc()
        .env("RETASC_CONFIG", &config)
        .arg("validate-rules")
        .arg(dir.path().join("rules"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Validation failed"))
        .stderr(predicate::str::contains("Dependent rule does not exist: 'missing'"))
        .stderr(predicate::str::contains("Invalid YAML file"));
}

#[test]
fn missing_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let rules = write(dir.path(), "rules.yaml", "name: a\nprerequisites: []\n");

    retasc()
        .arg("validate-rules")
        .arg(rules)
        .assert()
        .failure()
        .stderr(predicate::str::contains("RETASC_CONFIG"));
}

// ---------------------------------------------------------------------------
// retasc generate-schema
// ---------------------------------------------------------------------------

#[test]
fn generate_schema_prints_yaml() {
    retasc()
        .arg("generate-schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("title: ReTaSC rules"))
        .stdout(predicate::str::contains("prerequisites:"));
}

#[test]
fn generate_config_schema_as_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("schema/config.json");

    retasc()
        .args(["generate-schema", "--json", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let schema: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(schema["title"], "Config");
    assert!(schema["properties"]["jira_fields"].is_object());
}

// ---------------------------------------------------------------------------
// retasc run / dry-run
// ---------------------------------------------------------------------------

#[test]
fn run_writes_report_for_active_releases() {
    let mut server = mockito::Server::new();
    let releases = server
        .mock("GET", "/releases/")
        .match_query(mockito::Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"shortname": "rhel-10.0", "phase": 300}, {"shortname": "rhel-8.10", "phase": 1000}]"#)
        .expect(1)
        .create();

    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, &server.url());
    write(
        dir.path(),
        "rules/rules.yaml",
        r#"
- name: new-major
  prerequisites:
    - condition: "major >= 10"
- name: also-rhel
  inputs:
    - product: rhel
  prerequisites:
    - variable: release_name
      value: release
"#,
    );
    let report = dir.path().join("out/report.json");

    retasc()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--report")
        .arg(&report)
        .assert()
        .success();
    releases.assert();

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    let release = &report["ProductPagesRelease(\"rhel-10.0\")"];
    assert_eq!(release["new-major"]["state"], "Completed");
    assert_eq!(
        release["also-rhel"]["Variable(\"release_name\")"]["value"],
        "rhel-10.0"
    );
    assert!(report.get("ProductPagesRelease(\"rhel-8.10\")").is_none());
}

#[test]
fn dry_run_fails_on_evaluation_errors() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "http://127.0.0.1:9");
    let rules = write(
        dir.path(),
        "rules.yaml",
        r#"
name: broken
inputs:
  - variables: {a: 1}
prerequisites:
  - condition: "missing > 1"
"#,
    );

    retasc()
        .arg("--config")
        .arg(&config)
        .arg("dry-run")
        .arg(rules)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "broken -> Condition(\"missing > 1\"): 'missing' is undefined",
        ))
        .stderr(predicate::str::contains("1 error(s) found"));
}
