use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

const FIXTURE: &str = r#"
location: https://x.com/me
page_size: 3
posts:
  - id: "101"
    kind: original
    text: old thoughts
    posted_at: 2024-03-01T09:00:00Z
  - id: "102"
    kind: reshare
    author: someone
    text: shared once
    posted_at: 2024-04-01T09:00:00Z
  - id: "103"
    kind: reply
    text: fresh reply
    posted_at: 2999-01-01T09:00:00Z
"#;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_feed-sweep");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run feed-sweep --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    Command::cargo_bin("feed-sweep")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fixture"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn rehearses_against_a_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("feed.yaml");
    fs::write(&fixture, FIXTURE).unwrap();

    Command::cargo_bin("feed-sweep")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg("--fixture")
        .arg(&fixture)
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .arg("--state")
        .arg(dir.path().join("state.db"))
        .args(["--cutoff", "2025-01-01", "--fresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run finished"))
        .stdout(predicate::str::contains("deleted         2"))
        .stdout(predicate::str::contains("removed         101, 102"));

    assert!(dir.path().join("state.db").exists());
}

#[test]
fn fixture_is_required() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("feed-sweep")
        .unwrap()
        .arg("--state")
        .arg(dir.path().join("state.db"))
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--fixture"));
}

#[test]
fn rejects_unknown_kinds() {
    Command::cargo_bin("feed-sweep")
        .unwrap()
        .args(["--kinds", "stories"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no known kind"));
}
