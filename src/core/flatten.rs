//! Flattening engine: nested records → rows across a sheet topology

use super::coerce::FieldType;
use super::path::{join, parent_of, strip_indices, with_hint};
use super::sheet::SheetTopology;
use crate::config::{FlattenOptions, RollUp};
use crate::diagnostics::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink};
use crate::error::{FlattenError, FlattenResult};
use crate::types::{CellValue, FlatRow};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

pub use crate::types::RowSink;

/// Printed in a rolled-up cell when the array has more than one item
pub const ROLL_UP_WARNING: &str =
    "WARNING: More than one value supplied, consult the relevant sub-sheet for the data.";

/// Ancestor identifiers threaded down the recursion, copied on each descent
pub type IdentifierChain = IndexMap<String, CellValue>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenSummary {
    pub records_read: usize,
    pub records_filtered: usize,
    /// Rows written per sheet, in first-written order
    pub rows: IndexMap<String, usize>,
}

/// Turns a stream of records into rows, growing the topology as columns appear
pub struct Flattener {
    options: FlattenOptions,
    topology: SheetTopology,
    schema_backed: bool,
    roll_up_columns: HashSet<String>,
    preserve: Option<HashSet<String>>,
    preserve_seen: HashSet<String>,
    populated: HashSet<(String, String)>,
    summary: FlattenSummary,
}

enum ArrayShape {
    Empty,
    Scalars,
    ScalarLists,
    Objects,
    Mixed,
}

fn classify(items: &[Value]) -> ArrayShape {
    if items.is_empty() {
        return ArrayShape::Empty;
    }
    let is_scalar = |v: &Value| !matches!(v, Value::Array(_) | Value::Object(_));
    if items.iter().all(is_scalar) {
        ArrayShape::Scalars
    } else if items.iter().all(Value::is_object) {
        ArrayShape::Objects
    } else if items
        .iter()
        .all(|v| v.as_array().is_some_and(|inner| inner.iter().all(is_scalar)))
    {
        ArrayShape::ScalarLists
    } else {
        ArrayShape::Mixed
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Guess a column hint from a value when there is no schema to carry types
fn inferred_type(value: &Value) -> Option<FieldType> {
    match value {
        Value::Number(_) => Some(FieldType::Number),
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Array(_) => Some(FieldType::StringArray),
        _ => None,
    }
}

impl Flattener {
    /// Start a pass. With a schema-derived topology its columns come first
    /// and data-only columns are appended as they are seen.
    pub fn new(options: FlattenOptions, topology: Option<SheetTopology>) -> Self {
        let schema_backed = topology.is_some();
        let topology = topology.unwrap_or_else(|| {
            SheetTopology::new(
                &options.main_sheet_name,
                options.root_id.clone(),
                options.truncation_length,
                &options.sheet_prefix,
            )
        });
        let roll_up_columns = topology
            .main
            .columns
            .iter()
            .filter(|c| c.contains("/0/"))
            .cloned()
            .collect();
        let preserve = options.preserve_closure();

        Self {
            options,
            topology,
            schema_backed,
            roll_up_columns,
            preserve,
            preserve_seen: HashSet::new(),
            populated: HashSet::new(),
            summary: FlattenSummary::default(),
        }
    }

    pub fn topology(&self) -> &SheetTopology {
        &self.topology
    }

    /// Flatten every record in order
    pub fn flatten_all<'r, I>(
        &mut self,
        records: I,
        sink: &mut dyn RowSink,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()>
    where
        I: IntoIterator<Item = &'r Value>,
    {
        for record in records {
            self.flatten_record(record, sink, diagnostics)?;
        }
        Ok(())
    }

    /// Flatten one root-level record. Returns false when the filter dropped it.
    pub fn flatten_record(
        &mut self,
        record: &Value,
        sink: &mut dyn RowSink,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<bool> {
        let object = record.as_object().ok_or_else(|| FlattenError::UnsupportedValue {
            path: String::new(),
            kind: format!("top-level {} (records must be objects)", json_kind(record)),
        })?;
        self.summary.records_read += 1;

        if !self.passes_filter(object) {
            self.summary.records_filtered += 1;
            debug!(record = self.summary.records_read, "Record dropped by filter");
            return Ok(false);
        }

        let mut ids = IdentifierChain::new();
        if let Some(root_id) = &self.options.root_id {
            if let Some(value) = object.get(root_id).and_then(CellValue::from_json) {
                ids.insert(root_id.clone(), value);
            }
        }

        let main = self.topology.main.name.clone();
        let mut row = FlatRow::new();
        self.flatten_object(object, &mut row, &main, "", &ids, sink, diagnostics)?;
        self.emit(&main, row, sink);
        Ok(true)
    }

    /// Close the pass: report unseen preserve entries, drop empty schema
    /// columns if asked, and hand back the final topology.
    pub fn finish(mut self, diagnostics: &mut dyn DiagnosticSink) -> (SheetTopology, FlattenSummary) {
        if let Some(fields) = &self.options.preserve_fields {
            for field in fields {
                if !self.preserve_seen.contains(field) {
                    diagnostics.report(
                        Diagnostic::new(
                            DiagnosticKind::PreserveFieldMissing,
                            format!("Field {} was listed to preserve but was not found in the data.", field),
                        )
                        .with_context(DiagnosticContext::new().with_path(field.clone())),
                    );
                }
            }
        }

        if self.options.remove_empty_schema_columns && self.schema_backed {
            let populated = &self.populated;
            let names: Vec<String> = self.topology.sheets().map(|s| s.name.clone()).collect();
            for name in names {
                if let Some(sheet) = self.topology.sheet_mut(&name) {
                    sheet.retain_columns(|c| populated.contains(&(name.clone(), c.to_string())));
                }
            }
        }

        info!(
            records = self.summary.records_read,
            filtered = self.summary.records_filtered,
            sheets = self.topology.sheet_count(),
            "Flatten pass complete"
        );
        (self.topology, self.summary)
    }

    fn passes_filter(&self, object: &Map<String, Value>) -> bool {
        let Some((field, expected)) = &self.options.filter else {
            return true;
        };
        match object.get(field) {
            Some(Value::String(s)) => s == expected,
            Some(other) => other.to_string() == *expected,
            None => false,
        }
    }

    /// Preserve-list check on a de-indexed field path
    fn keep_field(&mut self, typed_path: &str) -> bool {
        let Some(closure) = &self.preserve else {
            return true;
        };
        if closure.contains(typed_path) {
            self.preserve_seen.insert(typed_path.to_string());
            return true;
        }
        if self.options.root_id.as_deref() == Some(typed_path) {
            return true;
        }
        let scope = parent_of(typed_path);
        !closure.iter().any(|entry| parent_of(entry) == scope)
    }

    fn emit(&mut self, sheet: &str, row: FlatRow, sink: &mut dyn RowSink) {
        *self.summary.rows.entry(sheet.to_string()).or_default() += 1;
        sink.write_row(sheet, row);
    }

    fn record_cell(&mut self, sheet: &str, column: &str, value: CellValue, row: &mut FlatRow) {
        if let Some(target) = self.topology.sheet_mut(sheet) {
            target.add_field(column, false);
        }
        if !value.is_blank() {
            self.populated.insert((sheet.to_string(), column.to_string()));
        }
        row.insert(column.to_string(), value);
    }

    fn column_for(&self, path: &str, value: &Value) -> String {
        if self.options.type_hints && !self.schema_backed {
            if let Some(field_type) = inferred_type(value) {
                return with_hint(path, field_type);
            }
        }
        path.to_string()
    }

    #[allow(clippy::too_many_arguments)]
    fn flatten_object(
        &mut self,
        object: &Map<String, Value>,
        row: &mut FlatRow,
        sheet: &str,
        parent: &str,
        parent_ids: &IdentifierChain,
        sink: &mut dyn RowSink,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()> {
        let mut ids = parent_ids.clone();
        if let Some(id) = object.get(&self.options.id_name) {
            if let Some(value) = CellValue::from_json(id).filter(|v| !v.is_blank()) {
                ids.insert(join(parent, &self.options.id_name), value);
            }
        }

        for (key, value) in object {
            let path = join(parent, key);
            let typed_path = strip_indices(&path);
            if !self.keep_field(&typed_path) {
                continue;
            }

            match value {
                Value::Object(child) => {
                    self.flatten_object(child, row, sheet, &path, &ids, sink, diagnostics)?;
                }
                Value::Array(items) => match classify(items) {
                    ArrayShape::Empty => {}
                    ArrayShape::Scalars => {
                        let joined = items.iter().map(scalar_text).collect::<Vec<_>>().join(";");
                        let column = self.column_for(&path, value);
                        self.record_cell(sheet, &column, CellValue::String(joined), row);
                    }
                    ArrayShape::ScalarLists => {
                        let joined = items
                            .iter()
                            .filter_map(Value::as_array)
                            .map(|inner| inner.iter().map(scalar_text).collect::<Vec<_>>().join(","))
                            .collect::<Vec<_>>()
                            .join(";");
                        let column = self.column_for(&path, value);
                        self.record_cell(sheet, &column, CellValue::String(joined), row);
                    }
                    ArrayShape::Objects => {
                        if self.in_roll_up_scope(sheet, parent) {
                            self.roll_up(sheet, &path, &typed_path, items, row, diagnostics);
                        }
                        self.flatten_sub_sheet(parent, key, items, &ids, sink, diagnostics)?;
                    }
                    ArrayShape::Mixed => {
                        return Err(FlattenError::UnsupportedValue {
                            path,
                            kind: "array mixing objects, arrays and values".to_string(),
                        });
                    }
                },
                scalar => {
                    let cell = CellValue::from_json(scalar).unwrap_or(CellValue::Empty);
                    let column = self.column_for(&path, scalar);
                    self.record_cell(sheet, &column, cell, row);
                }
            }
        }
        Ok(())
    }

    fn flatten_sub_sheet(
        &mut self,
        parent: &str,
        key: &str,
        items: &[Value],
        ids: &IdentifierChain,
        sink: &mut dyn RowSink,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()> {
        let sub_sheet = self.topology.sub_sheet_for(parent, key, None)?;
        let item_path = join(&join(parent, key), "0");

        for item in items.iter().filter_map(Value::as_object) {
            let mut row = FlatRow::new();
            for (column, value) in ids {
                if self.options.root_id.as_deref() != Some(column.as_str()) {
                    if let Some(target) = self.topology.sheet_mut(&sub_sheet) {
                        target.add_field(column, true);
                    }
                }
                self.populated.insert((sub_sheet.clone(), column.clone()));
                row.insert(column.clone(), value.clone());
            }
            self.flatten_object(item, &mut row, &sub_sheet, &item_path, ids, sink, diagnostics)?;
            self.emit(&sub_sheet, row, sink);
        }
        Ok(())
    }

    fn in_roll_up_scope(&self, sheet: &str, parent: &str) -> bool {
        self.options.roll_up.is_enabled()
            && self.topology.is_main(sheet)
            && (parent.is_empty() || self.options.roll_up_nested)
    }

    /// Inline the fields of a single-item array into the parent row
    fn roll_up(
        &mut self,
        sheet: &str,
        path: &str,
        typed_path: &str,
        items: &[Value],
        row: &mut FlatRow,
        diagnostics: &mut dyn DiagnosticSink,
    ) {
        let explicit = matches!(&self.options.roll_up, RollUp::Paths(_))
            && self.options.roll_up.lists_path(typed_path);
        let prefix = format!("{}/0/", path);

        let mut columns: Vec<String> = self
            .roll_up_columns
            .iter()
            .filter(|c| c.strip_prefix(&prefix).is_some_and(|rest| !rest.contains("/0/")))
            .cloned()
            .collect();
        if explicit {
            for item in items.iter().filter_map(Value::as_object) {
                for (k, v) in item {
                    let column = format!("{}{}", prefix, k);
                    if !v.is_object() && !v.is_array() && !columns.contains(&column) {
                        columns.push(column);
                    }
                }
            }
        }
        if columns.is_empty() {
            return;
        }

        if items.len() > 1 {
            for column in &columns {
                self.record_cell(sheet, column, CellValue::String(ROLL_UP_WARNING.to_string()), row);
            }
            diagnostics.report(
                Diagnostic::new(
                    DiagnosticKind::RollUpAmbiguous,
                    format!(
                        "More than one value supplied for {}. Could not provide rollup, so adding a warning to the relevant cell(s) in the spreadsheet.",
                        typed_path
                    ),
                )
                .with_context(DiagnosticContext::new().with_sheet(sheet).with_path(path.to_string())),
            );
            return;
        }

        let Some(item) = items.first() else {
            return;
        };
        for column in columns {
            let Some(relative) = column.strip_prefix(&prefix) else {
                continue;
            };
            let value = relative
                .split('/')
                .try_fold(item, |node, part| node.get(part));
            if let Some(cell) = value.and_then(CellValue::from_json) {
                self.record_cell(sheet, &column, cell, row);
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::types::MemoryRowStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(records: Vec<Value>, options: FlattenOptions) -> (SheetTopology, MemoryRowStore, Diagnostics) {
        let mut store = MemoryRowStore::new();
        let mut diagnostics = Diagnostics::new();
        let mut flattener = Flattener::new(options, None);
        flattener
            .flatten_all(records.iter(), &mut store, &mut diagnostics)
            .unwrap();
        let (topology, _) = flattener.finish(&mut diagnostics);
        (topology, store, diagnostics)
    }

    fn s(text: &str) -> CellValue {
        CellValue::String(text.to_string())
    }

    #[test]
    fn test_flat_record_columns_in_first_seen_order() {
        let (topology, store, _) = run(
            vec![
                json!({"ocid": "1", "id": "2", "testA": 3}),
                json!({"ocid": "1", "testB": true, "id": "4"}),
            ],
            FlattenOptions::default(),
        );
        assert_eq!(topology.main.column_paths(), vec!["ocid", "id", "testA", "testB"]);
        assert_eq!(store.row_count("main"), 2);
        assert_eq!(store.rows("main")[1]["testB"], CellValue::Bool(true));
    }

    #[test]
    fn test_nested_objects_share_the_row() {
        let (topology, store, _) = run(
            vec![json!({"ocid": "1", "tender": {"value": {"amount": 10}}})],
            FlattenOptions::default(),
        );
        assert_eq!(topology.sub_sheets.len(), 0);
        assert_eq!(store.rows("main")[0]["tender/value/amount"], CellValue::Integer(10));
    }

    #[test]
    fn test_scalar_arrays_are_joined() {
        let (_, store, _) = run(
            vec![json!({"tags": ["a", "b"], "grid": [[1, 2], [3]]})],
            FlattenOptions::default(),
        );
        let row = &store.rows("main")[0];
        assert_eq!(row["tags"], s("a;b"));
        assert_eq!(row["grid"], s("1,2;3"));
    }

    #[test]
    fn test_object_arrays_get_sub_sheet_rows_with_identifier_chain() {
        let (topology, store, _) = run(
            vec![json!({
                "ocid": "ocds-1",
                "id": "r1",
                "tender": {
                    "id": "t1",
                    "items": [
                        {"id": "i1", "classifications": [{"scheme": "CPV"}]},
                        {"id": "i2"}
                    ]
                }
            })],
            FlattenOptions::default(),
        );
        let items = topology.sheet_name_for_path("tender/items").unwrap();
        assert_eq!(items, "ten_items");
        assert_eq!(
            topology.sub_sheets[items].column_paths(),
            vec!["ocid", "id", "tender/id", "tender/items/0/id"]
        );
        let rows = store.rows(items);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["tender/items/0/id"], s("i2"));
        assert_eq!(rows[1]["tender/id"], s("t1"));

        let classifications = topology
            .sheet_name_for_path("tender/items/classifications")
            .unwrap();
        assert_eq!(classifications, "ten_ite_classifications");
        let row = &store.rows(classifications)[0];
        assert_eq!(
            row.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["ocid", "id", "tender/id", "tender/items/0/id", "tender/items/0/classifications/0/scheme"]
        );
    }

    #[test]
    fn test_sibling_branches_do_not_share_identifiers() {
        let (_, store, _) = run(
            vec![json!({
                "ocid": "1",
                "a": {"id": "A", "xs": [{"v": 1}]},
                "b": {"ys": [{"v": 2}]}
            })],
            FlattenOptions::default(),
        );
        let ys = &store.rows("b_ys")[0];
        assert!(!ys.contains_key("a/id"));
        let xs = &store.rows("a_xs")[0];
        assert_eq!(xs["a/id"], s("A"));
    }

    #[test]
    fn test_filter_drops_records() {
        let options = FlattenOptions {
            filter: Some(("kind".to_string(), "keep".to_string())),
            ..Default::default()
        };
        let mut store = MemoryRowStore::new();
        let mut diagnostics = Diagnostics::new();
        let mut flattener = Flattener::new(options, None);
        let records = vec![
            json!({"kind": "keep", "x": 1}),
            json!({"kind": "drop", "x": 2}),
            json!({"x": 3}),
        ];
        flattener.flatten_all(records.iter(), &mut store, &mut diagnostics).unwrap();
        let (_, summary) = flattener.finish(&mut diagnostics);
        assert_eq!(store.row_count("main"), 1);
        assert_eq!(summary.records_read, 3);
        assert_eq!(summary.records_filtered, 2);
    }

    #[test]
    fn test_roll_up_single_and_ambiguous() {
        let options = FlattenOptions {
            roll_up: RollUp::Paths(vec!["items".to_string()]),
            ..Default::default()
        };
        let (topology, store, diagnostics) = run(
            vec![
                json!({"ocid": "1", "items": [{"B": "only"}]}),
                json!({"ocid": "2", "items": [{"B": "x"}, {"B": "y"}]}),
            ],
            options,
        );
        assert!(topology.main.contains("items/0/B"));
        assert_eq!(store.rows("main")[0]["items/0/B"], s("only"));
        assert_eq!(store.rows("main")[1]["items/0/B"], s(ROLL_UP_WARNING));
        assert_eq!(store.row_count("items"), 3);
        assert_eq!(store.rows("items")[2]["items/0/B"], s("y"));
        assert_eq!(diagnostics.count(DiagnosticKind::RollUpAmbiguous), 1);
    }

    #[test]
    fn test_preserve_fields_prunes_siblings_only_in_mentioned_scopes() {
        let options = FlattenOptions {
            preserve_fields: Some(vec!["tender/title".to_string(), "missing/field".to_string()]),
            ..Default::default()
        };
        let (topology, _, diagnostics) = run(
            vec![json!({
                "ocid": "1",
                "tender": {"title": "T", "status": "active"},
                "date": "2020"
            })],
            options,
        );
        assert!(topology.main.contains("tender/title"));
        assert!(!topology.main.contains("tender/status"));
        assert!(!topology.main.contains("date"));
        assert_eq!(diagnostics.count(DiagnosticKind::PreserveFieldMissing), 1);
    }

    #[test]
    fn test_mixed_array_is_a_hard_error() {
        let mut store = MemoryRowStore::new();
        let mut diagnostics = Diagnostics::new();
        let mut flattener = Flattener::new(FlattenOptions::default(), None);
        let result = flattener.flatten_record(&json!({"bad": [1, {"a": 2}]}), &mut store, &mut diagnostics);
        match result {
            Err(FlattenError::UnsupportedValue { path, .. }) => assert_eq!(path, "bad"),
            other => panic!("expected UnsupportedValue, got {:?}", other),
        }
    }

    #[test]
    fn test_type_hints_without_schema() {
        let options = FlattenOptions {
            type_hints: true,
            ..Default::default()
        };
        let (topology, _, _) = run(vec![json!({"n": 1.5, "b": false, "s": "x", "l": ["a"]})], options);
        assert_eq!(
            topology.main.columns,
            vec!["n:number", "b:boolean", "s", "l:array"]
        );
    }
}
