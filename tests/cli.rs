//! Command-line behaviour

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

const GRAPH: &str = r#"{
  "modules": [
    { "identifier": "./app.js", "size": 1024 },
    { "identifier": "./lib/common.js", "size": 1024 },
    { "identifier": "./lib/xlass.js", "size": 5120 },
    { "identifier": "./lib/other.js", "size": 1024 }
  ],
  "chunks": [
    { "name": "app", "modules": [0, 1, 2, 3], "entry_module": 0 }
  ],
  "entrypoints": [
    { "name": "app", "chunks": [0] }
  ]
}"#;

fn divide() -> Command {
    let mut cmd = Command::cargo_bin("divide").unwrap();
    cmd.env_remove("DIVIDE_CONFIG").env("NO_COLOR", "1");
    cmd
}

#[test]
fn split_prints_loader_json() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("graph.json"), GRAPH).unwrap();
    fs::write(dir.path().join("divide.toml"), "[[plugin]]\ndivide = 3\n").unwrap();

    let output = divide()
        .current_dir(dir.path())
        .args(["split", "graph.json", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let loaders = json["report"]["loaders"].as_array().unwrap();
    assert_eq!(loaders.len(), 1);
    assert_eq!(loaders[0]["identifier"], "ensure divide-entry-module_app");
    assert!(loaders[0]["source"]
        .as_str()
        .unwrap()
        .ends_with("}).catch(__webpack_require__.oe);"));
    assert_eq!(json["report"]["chunks"].as_array().unwrap().len(), 4);
}

#[test]
fn split_with_sync_config_and_html_filter() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("graph.json"), GRAPH).unwrap();
    fs::write(
        dir.path().join("sync.toml"),
        "[[plugin]]\ndivide = 2\nasync = false\nchunks = \"app\"\n",
    )
    .unwrap();

    divide()
        .current_dir(dir.path())
        .args(["--config", "sync.toml", "split", "graph.json", "--html", "app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("divide-chunk_app0"))
        .stdout(predicate::str::contains("Page chunks: divide-chunk_app0, app"));
}

#[test]
fn split_trace_lists_fetches() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("graph.json"), GRAPH).unwrap();

    divide()
        .current_dir(dir.path())
        .args(["split", "graph.json", "--trace"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Load trace"))
        .stdout(predicate::str::contains("fetch   chunk"))
        .stdout(predicate::str::contains("execute module 0"));
}

#[test]
fn split_rejects_broken_graph() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("graph.json"),
        r#"{ "modules": [], "chunks": [{ "name": "app", "modules": [3] }] }"#,
    )
    .unwrap();

    divide()
        .current_dir(dir.path())
        .args(["split", "graph.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid chunk graph"));
}

#[test]
fn split_missing_graph_fails() {
    let dir = tempfile::tempdir().unwrap();

    divide()
        .current_dir(dir.path())
        .args(["split", "missing.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read chunk graph"));
}

#[test]
fn init_writes_samples_once() {
    let dir = tempfile::tempdir().unwrap();

    divide()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    assert!(dir.path().join("divide.toml").exists());
    assert!(dir.path().join("graph.json").exists());

    divide()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    divide()
        .current_dir(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();

    divide()
        .current_dir(dir.path())
        .args(["split", "graph.json", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("divide-chunk_login0"));
}
