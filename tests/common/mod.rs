//! Shared helpers for integration tests

#![allow(dead_code)]

use royalbit_flatten::config::{FlattenOptions, SchemaOptions};
use royalbit_flatten::core::{topology_from_schema, Flattener, SheetTopology};
use royalbit_flatten::diagnostics::Diagnostics;
use royalbit_flatten::parser;
use royalbit_flatten::types::{CellValue, InputSheet, MemoryRowStore};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test-data").join(name)
}

pub fn release_schema() -> Value {
    parser::load_schema(&fixture("release-schema.json")).unwrap()
}

pub fn release_document() -> Value {
    parser::load_document(&fixture("releases.json")).unwrap()
}

pub fn text(value: &str) -> CellValue {
    CellValue::String(value.to_string())
}

pub fn schema_topology(options: &SchemaOptions) -> SheetTopology {
    let mut diagnostics = Diagnostics::new();
    topology_from_schema(&release_schema(), options, &mut diagnostics).unwrap()
}

/// Flatten `records`, optionally across a schema-derived topology
pub fn flatten_records(
    records: &[&Value],
    options: FlattenOptions,
    topology: Option<SheetTopology>,
) -> (SheetTopology, MemoryRowStore, Diagnostics) {
    let mut rows = MemoryRowStore::new();
    let mut diagnostics = Diagnostics::new();
    let mut flattener = Flattener::new(options, topology);
    flattener
        .flatten_all(records.iter().copied(), &mut rows, &mut diagnostics)
        .unwrap();
    let (topology, _) = flattener.finish(&mut diagnostics);
    (topology, rows, diagnostics)
}

/// What a tabular reader would hand back for flattened rows, main sheet first
pub fn to_input_sheets(topology: &SheetTopology, rows: &MemoryRowStore) -> Vec<InputSheet> {
    topology
        .sheets()
        .map(|sheet| {
            let columns = sheet.column_paths();
            let mut input = InputSheet::from_headings(sheet.name.clone(), &columns);
            for row in rows.rows(&sheet.name) {
                input.push_row(
                    columns
                        .iter()
                        .map(|c| row.get(*c).cloned().unwrap_or(CellValue::Empty))
                        .collect(),
                );
            }
            input
        })
        .collect()
}
