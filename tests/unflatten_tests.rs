//! Rebuilding records from sheets, including cross-sheet joins

mod common;

use common::*;
use pretty_assertions::assert_eq;
use royalbit_flatten::config::{SchemaOptions, UnflattenOptions};
use royalbit_flatten::core::{unflatten, UnflattenOutput};
use royalbit_flatten::csvdir::CsvDirImporter;
use royalbit_flatten::diagnostics::{DiagnosticKind, Diagnostics};
use royalbit_flatten::types::{CellValue, InputSheet};
use serde_json::json;

fn int(value: i64) -> CellValue {
    CellValue::Integer(value)
}

fn run(sheets: &[InputSheet]) -> (UnflattenOutput, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let output = unflatten(sheets, &UnflattenOptions::default(), None, &mut diagnostics).unwrap();
    (output, diagnostics)
}

#[test]
fn test_flat_main_sheet() {
    let main = InputSheet::from_headings("main", &["ocid", "id", "testA"])
        .with_row(vec![int(1), int(2), int(3)])
        .with_row(vec![int(1), text("2a"), text("3a")])
        .with_row(vec![int(6), int(7), int(8)]);
    let (output, diagnostics) = run(&[main]);
    assert!(diagnostics.is_empty());
    assert_eq!(
        output.data,
        json!({"main": [
            {"ocid": 1, "id": 2, "testA": 3},
            {"ocid": 1, "id": "2a", "testA": "3a"},
            {"ocid": 6, "id": 7, "testA": 8}
        ]})
    );
}

#[test]
fn test_subsheet_join() {
    let main = InputSheet::from_headings("main", &["ocid", "id"]).with_row(vec![int(1), int(2)]);
    let sub = InputSheet::from_headings("sub", &["ocid", "main/id", "testA"])
        .with_row(vec![int(1), int(2), int(11)]);
    let (output, diagnostics) = run(&[main, sub]);
    assert!(diagnostics.is_empty());
    assert_eq!(
        output.data,
        json!({"main": [{"ocid": 1, "id": 2, "sub": [{"testA": 11}]}]})
    );
}

#[test]
fn test_nested_array_via_two_subsheets() {
    let main = InputSheet::from_headings("main", &["ocid", "id"]).with_row(vec![int(1), int(2)]);
    let sub1 = InputSheet::from_headings("sub1", &["ocid", "main/id", "id", "testA"])
        .with_row(vec![int(1), int(2), int(3), int(4)]);
    let sub2 = InputSheet::from_headings("sub2", &["ocid", "main/id", "main/sub1[]/id", "testB"])
        .with_row(vec![int(1), int(2), int(3), int(5)]);
    let (output, diagnostics) = run(&[main, sub1, sub2]);
    assert!(diagnostics.is_empty());
    assert_eq!(
        output.data,
        json!({"main": [{
            "ocid": 1,
            "id": 2,
            "sub1": [{"id": 3, "testA": 4, "sub2": [{"testB": 5}]}]
        }]})
    );
}

#[test]
fn test_nested_subsheet_may_arrive_before_its_parent_rows() {
    let main = InputSheet::from_headings("main", &["ocid", "id"]).with_row(vec![int(1), int(2)]);
    let sub1 = InputSheet::from_headings("sub1", &["ocid", "main/id", "id", "testA"])
        .with_row(vec![int(1), int(2), int(3), int(4)]);
    let sub2 = InputSheet::from_headings("sub2", &["ocid", "main/id", "main/sub1[]/id", "testB"])
        .with_row(vec![int(1), int(2), int(3), int(5)]);
    let (output, _) = run(&[sub2, sub1, main]);
    assert_eq!(
        output.data["main"][0]["sub1"],
        json!([{"id": 3, "sub2": [{"testB": 5}], "testA": 4}])
    );
}

#[test]
fn test_csv_directory_join() {
    let sheets = CsvDirImporter::new(fixture("nested"), "main").import().unwrap();
    let (output, diagnostics) = run(&sheets);
    assert!(diagnostics.is_empty());
    assert_eq!(
        output.data,
        json!({"main": [{
            "ocid": "1",
            "id": "2",
            "sub1": [{"id": "3", "testA": "4", "sub2": [{"testB": "5"}]}]
        }]})
    );
}

#[test]
fn test_merge_keeps_first_value_and_reports_once() {
    let main = InputSheet::from_headings("main", &["ocid", "id", "f"])
        .with_row(vec![int(1), int(2), text("first")])
        .with_row(vec![int(1), int(2), text("second")]);
    let (output, diagnostics) = run(&[main]);
    assert_eq!(output.data, json!({"main": [{"ocid": 1, "id": 2, "f": "first"}]}));
    assert_eq!(diagnostics.count(DiagnosticKind::MergeConflict), 1);
    let conflict = diagnostics.of_kind(DiagnosticKind::MergeConflict).next().unwrap();
    assert!(conflict.message.contains("field \"f\""), "{}", conflict.message);
    assert!(conflict.message.contains("sheet \"main\""));
    assert_eq!(conflict.context.row, Some(3));
}

#[test]
fn test_order_of_distinct_identifiers_is_kept() {
    let mut main = InputSheet::from_headings("main", &["ocid", "id"]);
    for i in 0..20 {
        main.push_row(vec![text(&format!("ocds-{}", i)), int(i)]);
    }
    let (output, _) = run(&[main]);
    let ids: Vec<i64> = output.data["main"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_rows_without_identifier_are_duplicated() {
    let main = InputSheet::from_headings("main", &["ocid", "title"])
        .with_row(vec![int(1), text("a")])
        .with_row(vec![int(1), text("a")]);
    let (output, diagnostics) = run(&[main]);
    assert_eq!(output.records, 2);
    assert!(diagnostics.is_empty());
}

#[test]
fn test_titles_converted_back_to_paths() {
    let schema_options = SchemaOptions {
        use_titles: true,
        ..Default::default()
    };
    let topology = schema_topology(&schema_options);
    let options = UnflattenOptions {
        convert_titles: true,
        root_list_path: "releases".to_string(),
        ..Default::default()
    };
    let main = InputSheet::from_headings(
        "main",
        &["Open Contracting ID", "Release ID", "tender:value:amount", "Release  Tag"],
    )
    .with_row(vec![text("ocds-1"), text("1"), text("10.50"), text("a;b")]);

    let mut diagnostics = Diagnostics::new();
    let output = unflatten(&[main], &options, Some(topology), &mut diagnostics).unwrap();
    let release = &output.data["releases"][0];
    assert_eq!(release["ocid"], json!("ocds-1"));
    assert_eq!(release["tender"]["value"]["amount"].to_string(), "10.50");
    assert_eq!(release["tag"], json!(["a", "b"]));
    assert_eq!(
        output.source_map.headings["releases/tender/value/amount"],
        vec![("main".to_string(), "tender:value:amount".to_string())]
    );
}

#[test]
fn test_schema_types_coerce_sub_sheet_cells() {
    let topology = schema_topology(&SchemaOptions::default());
    let main = InputSheet::from_headings("main", &["ocid", "id"]).with_row(vec![text("o"), text("1")]);
    let items = InputSheet::from_headings(
        "Item",
        &["ocid", "id", "tender/items/0/id", "tender/items/0/quantity"],
    )
    .with_row(vec![text("o"), text("1"), text("a"), text("x")])
    .with_row(vec![text("o"), text("1"), text("b"), CellValue::Float(2.0)]);

    let mut diagnostics = Diagnostics::new();
    let output = unflatten(&[main, items], &UnflattenOptions::default(), Some(topology), &mut diagnostics).unwrap();
    assert_eq!(
        output.data["main"][0]["tender"]["items"],
        json!([{"id": "a", "quantity": "x"}, {"id": "b", "quantity": 2}])
    );
    let coercion = diagnostics.of_kind(DiagnosticKind::TypeCoercion).next().unwrap();
    assert_eq!(coercion.context.sheet.as_deref(), Some("Item"));
    assert_eq!(coercion.context.row, Some(2));
    assert_eq!(coercion.context.path.as_deref(), Some("tender/items/quantity"));
}
