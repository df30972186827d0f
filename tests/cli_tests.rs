//! CLI integration tests
//!
//! Runs the `flatten` binary end to end against the files in test-data/.

#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test-data").join(name)
}

fn flatten_cmd() -> Command {
    let mut cmd = Command::cargo_bin("flatten").unwrap();
    cmd.env_remove("FLATTEN_ROOT_ID")
        .env_remove("FLATTEN_ID_NAME")
        .env_remove("FLATTEN_TIMEZONE");
    cmd
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// HELP AND VERSION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_cli_help() {
    flatten_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("COMMANDS"))
        .stdout(predicate::str::contains("create-template"));
}

#[test]
fn test_cli_version() {
    flatten_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("flatten"));
}

#[test]
fn test_unflatten_help() {
    flatten_cmd()
        .args(["unflatten", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cell-source-map"));
}

// ═══════════════════════════════════════════════════════════════════════════
// CREATE-TEMPLATE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_create_template_all_formats() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("template");

    flatten_cmd()
        .arg("create-template")
        .arg(fixture("release-schema.json"))
        .arg("-o")
        .arg(&output)
        .args(["--format", "all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Template created"));

    assert!(dir.path().join("template.xlsx").exists());
    let main = fs::read_to_string(output.join("main.csv")).unwrap();
    assert!(main.starts_with("ocid,id,date,tag"), "{}", main);
    assert!(output.join("Item.csv").exists());
    assert!(output.join("Organization.csv").exists());
}

#[test]
fn test_create_template_missing_schema() {
    flatten_cmd()
        .args(["create-template", "does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

// ═══════════════════════════════════════════════════════════════════════════
// FLATTEN / UNFLATTEN
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_flatten_then_unflatten_with_source_maps() {
    let dir = TempDir::new().unwrap();
    let flat = dir.path().join("flat");

    flatten_cmd()
        .arg("flatten")
        .arg(fixture("releases.json"))
        .arg("-s")
        .arg(fixture("release-schema.json"))
        .args(["--root-list-path", "releases", "--format", "all", "-o"])
        .arg(&flat)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 read, 0 filtered out"));

    assert!(dir.path().join("flat.xlsx").exists());
    let items = fs::read_to_string(flat.join("Item.csv")).unwrap();
    assert_eq!(items.lines().count(), 4);

    let output = dir.path().join("out.json");
    let cells = dir.path().join("cells.json");
    let headings = dir.path().join("headings.json");
    flatten_cmd()
        .arg("unflatten")
        .arg(&flat)
        .arg("-s")
        .arg(fixture("release-schema.json"))
        .args(["--root-list-path", "releases", "-o"])
        .arg(&output)
        .arg("--cell-source-map")
        .arg(&cells)
        .arg("--heading-source-map")
        .arg(&headings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Records: 2"));

    assert_eq!(read_json(&output), read_json(&fixture("releases.json")));
    let cell_map = read_json(&cells);
    assert_eq!(cell_map["releases/0/tender/items/1/description"][0][0], "Item");
    let heading_map = read_json(&headings);
    assert!(heading_map["releases/tender/items/id"].is_array());
}

#[test]
fn test_unflatten_workbook_to_yaml() {
    let dir = TempDir::new().unwrap();
    let flat = dir.path().join("flat.xlsx");
    flatten_cmd()
        .arg("flatten")
        .arg(fixture("releases.yaml"))
        .args(["--root-list-path", "releases", "-o"])
        .arg(&flat)
        .assert()
        .success();

    let output = dir.path().join("out.yaml");
    flatten_cmd()
        .arg("unflatten")
        .arg(&flat)
        .args(["--root-list-path", "releases", "-o"])
        .arg(&output)
        .assert()
        .success();
    let yaml = fs::read_to_string(&output).unwrap();
    assert!(yaml.contains("ocds-213czf-3"), "{}", yaml);
}

#[test]
fn test_unflatten_legacy_csv_directory() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out.json");
    flatten_cmd()
        .arg("unflatten")
        .arg(fixture("nested"))
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    assert_eq!(read_json(&output)["main"][0]["sub1"][0]["sub2"][0]["testB"], "5");
}

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_flatten_malformed_json_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.json");
    fs::write(&input, "{\"main\": [").unwrap();
    flatten_cmd()
        .arg("flatten")
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join("flat"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed structure"));
}

#[test]
fn test_convert_titles_requires_schema() {
    flatten_cmd()
        .arg("unflatten")
        .arg(fixture("nested"))
        .arg("--convert-titles")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--convert-titles needs --schema"));
}

#[test]
fn test_unknown_output_format_rejected() {
    flatten_cmd()
        .arg("create-template")
        .arg(fixture("release-schema.json"))
        .args(["--format", "ods"])
        .assert()
        .failure();
}

#[test]
fn test_bad_timezone_rejected() {
    flatten_cmd()
        .arg("unflatten")
        .arg(fixture("nested"))
        .args(["--timezone", "Mars/Olympus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}
