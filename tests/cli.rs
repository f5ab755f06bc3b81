use std::fs;

use predicates::prelude::*;
use serde_json::Value;

const PAGE: &str = r#"<html><head><title>T</title></head><body>
<main>
  <h1>First</h1><p>One <a href="/a">link</a>.</p>
  <h1>Second</h1><p>Two.</p>
</main>
</body></html>"#;

fn doclevels() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("doclevels");
    cmd.env_remove("DOCLEVELS_LOG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn extract_prints_sections_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let html = dir.path().join("page.html");
    fs::write(&html, PAGE).expect("write page");

    let assert = doclevels()
        .args(["extract", "--html"])
        .arg(&html)
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout");
    let sections: Value = serde_json::from_str(&stdout).expect("sections json");
    let sections = sections.as_array().expect("array");
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0]["id"], "section-0");
    assert_eq!(sections[0]["title"], "First");
    assert_eq!(sections[0]["content"][1]["type"], "paragraph");
    assert_eq!(sections[0]["content"][1]["links"][0]["href"], "/a");
    assert_eq!(sections[1]["title"], "Second");
}

#[test]
fn extract_honors_split_level() {
    let dir = tempfile::tempdir().expect("tempdir");
    let html = dir.path().join("page.html");
    fs::write(
        &html,
        "<main><h1>Title</h1><p>lead</p><h2>A</h2><p>a</p><h2>B</h2><p>b</p></main>",
    )
    .expect("write page");

    doclevels()
        .args(["extract", "--html"])
        .arg(&html)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"section-2\""));

    doclevels()
        .args(["extract", "--split-level", "1", "--html"])
        .arg(&html)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"section-0\""))
        .stdout(predicate::str::contains("\"section-1\"").not());
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let dir = tempfile::tempdir().expect("tempdir");
    let html = dir.path().join("page.html");
    fs::write(&html, PAGE).expect("write page");

    doclevels()
        .env("RUST_LOG", "debug")
        .args(["extract", "--html"])
        .arg(&html)
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}

#[test]
fn process_without_api_key_fails() {
    doclevels()
        .env_remove("OPENAI_API_KEY")
        .env_remove("AZURE_OPENAI_API_KEY")
        .args(["process", "--url", "https://example.com/docs", "--out", "unused"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}

#[test]
fn batch_requires_an_input() {
    doclevels()
        .args(["batch", "--out", "unused"])
        .assert()
        .failure();
}

#[test]
fn invalid_split_level_is_rejected() {
    doclevels()
        .args(["extract", "--split-level", "9", "--html", "page.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("split level"));
}
