//! Hard failures: every error kind surfaces with useful context

mod common;

use common::*;
use royalbit_flatten::config::{parse_timezone, FlattenOptions, OutputFormat, SchemaOptions, UnflattenOptions};
use royalbit_flatten::core::{unflatten, Flattener};
use royalbit_flatten::csvdir::CsvDirImporter;
use royalbit_flatten::diagnostics::Diagnostics;
use royalbit_flatten::error::{FlattenError, MalformedKind};
use royalbit_flatten::excel::ExcelImporter;
use royalbit_flatten::parser::{self, DocumentFormat};
use royalbit_flatten::types::{InputSheet, MemoryRowStore};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_malformed_json_document() {
    let err = parser::parse_document("broken.json", b"{\"main\": [", DocumentFormat::Json).unwrap_err();
    match err {
        FlattenError::MalformedSource { source_name, kind, .. } => {
            assert_eq!(source_name, "broken.json");
            assert_eq!(kind, MalformedKind::Structure);
        }
        other => panic!("expected MalformedSource, got {:?}", other),
    }
}

#[test]
fn test_malformed_encoding_in_csv() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.csv"), b"ocid,title\n1,\xff\xfe\n").unwrap();
    let err = CsvDirImporter::new(dir.path(), "main").import().unwrap_err();
    assert!(
        matches!(err, FlattenError::MalformedSource { kind: MalformedKind::Encoding, .. }),
        "{:?}",
        err
    );
}

#[test]
fn test_workbook_that_is_not_a_workbook() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fake.xlsx");
    fs::write(&path, "ocid,id\n1,2\n").unwrap();
    let err = ExcelImporter::new(&path).import().unwrap_err();
    assert!(err.is_malformed_source(), "{:?}", err);
}

#[test]
fn test_shape_mismatch_names_the_path() {
    let topology = schema_topology(&SchemaOptions::default());
    let main = InputSheet::from_headings("main", &["ocid", "id", "tender/title/text"])
        .with_row(vec![text("o"), text("1"), text("x")]);
    let mut diagnostics = Diagnostics::new();
    let err = unflatten(&[main], &UnflattenOptions::default(), Some(topology), &mut diagnostics).unwrap_err();
    match &err {
        FlattenError::ShapeMismatch { path, expected, found } => {
            assert_eq!(path, "tender/title");
            assert_eq!(expected, "a string");
            assert_eq!(found, "an object");
        }
        other => panic!("expected ShapeMismatch, got {:?}", other),
    }
    assert!(err.to_string().contains("'tender/title'"));
}

#[test]
fn test_ambiguous_identifier_lists_columns() {
    let main = InputSheet::from_headings("main", &["ocid", "id"]).with_row(vec![text("1"), text("2")]);
    let sub = InputSheet::from_headings("sub", &["ocid", "main/a[]/id", "main/b[]/id", "x"])
        .with_row(vec![text("1"), text("3"), text("4"), text("5")]);
    let mut diagnostics = Diagnostics::new();
    let err = unflatten(&[main, sub], &UnflattenOptions::default(), None, &mut diagnostics).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Inconsistent identifier columns in sheet 'sub' row 2: main/a[]/id, main/b[]/id"
    );
}

#[test]
fn test_unsupported_values() {
    let document = json!({"main": "not a list"});
    let err = parser::records_at(&document, "main", false).unwrap_err();
    assert!(matches!(err, FlattenError::UnsupportedValue { .. }), "{:?}", err);

    let record = json!({"ocid": "1", "bad": [{"a": 1}, 2]});
    let mut flattener = Flattener::new(FlattenOptions::default(), None);
    let mut rows = MemoryRowStore::new();
    let mut diagnostics = Diagnostics::new();
    let err = flattener.flatten_record(&record, &mut rows, &mut diagnostics).unwrap_err();
    match err {
        FlattenError::UnsupportedValue { path, .. } => assert_eq!(path, "bad"),
        other => panic!("expected UnsupportedValue, got {:?}", other),
    }
}

#[test]
fn test_invalid_column_path() {
    let main = InputSheet::from_headings("main", &["id", "a//b"]).with_row(vec![text("1"), text("x")]);
    let mut diagnostics = Diagnostics::new();
    let err = unflatten(&[main], &UnflattenOptions::default(), None, &mut diagnostics).unwrap_err();
    match err {
        FlattenError::InvalidPath { path, reason } => {
            assert_eq!(path, "a//b");
            assert!(reason.contains("empty segment"), "{}", reason);
        }
        other => panic!("expected InvalidPath, got {:?}", other),
    }
}

#[test]
fn test_configuration_errors() {
    assert!(matches!("ods".parse::<OutputFormat>(), Err(FlattenError::Config(_))));
    assert!(matches!(parse_timezone("Mars/Olympus"), Err(FlattenError::Config(_))));
}

#[test]
fn test_reference_through_a_value_is_a_shape_mismatch() {
    let main = InputSheet::from_headings("main", &["ocid", "id", "sub1"])
        .with_row(vec![text("1"), text("2"), text("not a list")]);
    let sub2 = InputSheet::from_headings("sub2", &["ocid", "main/id", "main/sub1[]/id", "testB"])
        .with_row(vec![text("1"), text("2"), text("3"), text("5")]);
    let mut diagnostics = Diagnostics::new();
    let err = unflatten(&[main, sub2], &UnflattenOptions::default(), None, &mut diagnostics).unwrap_err();
    match err {
        FlattenError::ShapeMismatch { path, expected, found } => {
            assert_eq!(path, "sub1");
            assert_eq!(expected, "an array");
            assert_eq!(found, "a value");
        }
        other => panic!("expected ShapeMismatch, got {:?}", other),
    }
}
