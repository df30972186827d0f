//! Unflattening engine: sheets of rows → nested records plus provenance
//!
//! Two join styles are understood and may be mixed in one workbook:
//!
//! - **Full paths.** Every column is an absolute path (`tender/items/0/id`)
//!   and parent identifiers are repeated on sub-sheet rows (`id`,
//!   `tender/id`). Rows are grouped by root identifier and merged into the
//!   top-level object with the same `id`.
//! - **Sheet-qualified references.** A sub-sheet row names its parents with
//!   columns such as `main/id` and `main/sub1[]/id`. The row is attached
//!   below the deepest referenced object, under the sheet's array property.

use super::coerce::{convert_type, Conversion, FieldType};
use super::collection::{merge_fields, render_value, seal, to_value, Fields, MergeContext, Node, TemporaryCollection};
use super::path::{join, strip_indices, ColumnPath, Segment};
use super::sheet::SheetTopology;
use super::source_map::SourceMap;
use crate::config::UnflattenOptions;
use crate::diagnostics::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink};
use crate::error::{FlattenError, FlattenResult};
use crate::types::{column_letter, Cell, CellLocation, CellValue, InputSheet};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Reconstructed data with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct UnflattenOutput {
    /// `{root_list_path: [...]}`, or the bare list when `root_is_list`
    pub data: Value,
    pub source_map: SourceMap,
    pub records: usize,
}

/// One usable column of an input sheet
#[derive(Debug, Clone)]
struct Column {
    index: usize,
    letter: String,
    heading: String,
    key: String,
    path: ColumnPath,
}

/// Sheet-qualified parent reference (`main/id`, `main/sub1[]/id`)
#[derive(Debug, Clone)]
struct Reference {
    /// Segments up to but excluding the trailing id
    container: Vec<Segment>,
    cell: Cell,
    heading: String,
}

pub struct Unflattener {
    options: UnflattenOptions,
    topology: Option<SheetTopology>,
    roots: IndexMap<String, TemporaryCollection>,
    rows_read: usize,
}

impl Unflattener {
    pub fn new(options: UnflattenOptions, topology: Option<SheetTopology>) -> Self {
        Self {
            options,
            topology,
            roots: IndexMap::new(),
            rows_read: 0,
        }
    }

    fn field_type(&self, typed_path: &str) -> Option<FieldType> {
        self.topology.as_ref().and_then(|t| t.field_type(typed_path))
    }

    /// Consume every row of one sheet, in order
    pub fn add_sheet(&mut self, sheet: &InputSheet, diagnostics: &mut dyn DiagnosticSink) -> FlattenResult<()> {
        let columns = self.resolve_columns(sheet, diagnostics)?;
        let is_reference = |c: &Column| self.is_reference_column(&sheet.name, c);
        let legacy = columns.iter().any(is_reference);
        debug!(sheet = %sheet.name, columns = columns.len(), legacy, "Unflattening sheet");

        for (offset, raw_row) in sheet.rows.iter().enumerate() {
            let row_number = sheet.first_row + offset as u32;
            let cells: Vec<(&Column, &CellValue)> = columns
                .iter()
                .filter_map(|c| raw_row.get(c.index).filter(|v| !v.is_blank()).map(|v| (c, v)))
                .collect();
            if cells.is_empty() {
                continue;
            }
            self.rows_read += 1;

            if legacy {
                self.add_referenced_row(sheet, row_number, &cells, diagnostics)?;
            } else {
                self.add_full_path_row(sheet, row_number, &cells, diagnostics)?;
            }
        }
        Ok(())
    }

    /// Turn collected roots into the output document
    pub fn finish(self) -> UnflattenOutput {
        let prefix = if self.options.root_is_list {
            String::new()
        } else {
            self.options.root_list_path.clone()
        };

        let mut source_map = SourceMap::new();
        let mut records = Vec::new();
        for (_, collection) in self.roots {
            for item in collection.into_items() {
                let path = join(&prefix, &records.len().to_string());
                records.push(to_value(item, &path, &mut source_map));
            }
        }

        info!(
            rows = self.rows_read,
            records = records.len(),
            "Unflatten pass complete"
        );

        let count = records.len();
        let list = Value::Array(records);
        let data = if self.options.root_is_list {
            list
        } else {
            let mut object = Map::new();
            object.insert(self.options.root_list_path.clone(), list);
            Value::Object(object)
        };
        UnflattenOutput {
            data,
            source_map,
            records: count,
        }
    }

    //--------------------------------------------------------------------------
    // Headings
    //--------------------------------------------------------------------------

    fn heading_to_key(&self, sheet: &str, heading: &str) -> String {
        if !self.options.convert_titles {
            return heading.to_string();
        }
        let Some(topology) = &self.topology else {
            return heading.to_string();
        };
        topology
            .sheet(sheet)
            .and_then(|s| s.path_for_heading(heading))
            .or_else(|| topology.sheets().find_map(|s| s.path_for_heading(heading)))
            .unwrap_or(heading)
            .to_string()
    }

    fn resolve_columns(&self, sheet: &InputSheet, diagnostics: &mut dyn DiagnosticSink) -> FlattenResult<Vec<Column>> {
        let mut columns: Vec<Column> = Vec::new();
        let mut duplicates: IndexMap<String, Vec<String>> = IndexMap::new();

        for (index, heading) in sheet.headings.iter().enumerate() {
            let Some(heading) = heading else {
                continue;
            };
            let key = self.heading_to_key(&sheet.name, heading);
            let letter = column_letter(index);
            if columns.iter().any(|c| c.key == key) {
                duplicates.entry(heading.clone()).or_default().push(letter);
                continue;
            }
            let path = ColumnPath::parse(&key)?;
            columns.push(Column {
                index,
                letter,
                heading: heading.clone(),
                key,
                path,
            });
        }

        for (heading, letters) in duplicates {
            let place = if letters.len() == 1 {
                format!("column {}", letters[0])
            } else {
                format!("columns {}", letters.join(", "))
            };
            diagnostics.report(
                Diagnostic::new(
                    DiagnosticKind::DuplicateHeading,
                    format!(
                        "Duplicate heading \"{}\" found in sheet \"{}\", ignoring the data in {}.",
                        heading, sheet.name, place
                    ),
                )
                .with_context(DiagnosticContext::new().with_sheet(sheet.name.clone()).with_field(heading)),
            );
        }
        Ok(columns)
    }

    fn is_reference_column(&self, sheet: &str, column: &Column) -> bool {
        sheet != self.options.main_sheet_name
            && column.path.len() >= 2
            && column.path.first_name() == Some(self.options.main_sheet_name.as_str())
            && column.path.last_name() == Some(self.options.id_name.as_str())
    }

    fn is_root_id_column(&self, column: &Column) -> bool {
        column.path.len() == 1 && self.options.root_id.as_deref() == column.path.first_name()
    }

    //--------------------------------------------------------------------------
    // Full-path rows
    //--------------------------------------------------------------------------

    fn add_full_path_row(
        &mut self,
        sheet: &InputSheet,
        row_number: u32,
        cells: &[(&Column, &CellValue)],
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()> {
        let mut fields = Fields::new();
        for (column, raw) in cells {
            self.insert_cell(&mut fields, &sheet.name, row_number, column, raw, "", diagnostics)?;
        }

        let root_key = self.root_key(&fields);
        let context = MergeContext {
            id_info: self.id_info(&root_key, fields.get(&self.options.id_name)),
        };
        let fields = seal(fields, &self.options.id_name, &context, diagnostics);
        self.roots
            .entry(root_key)
            .or_insert_with(|| TemporaryCollection::new(self.options.id_name.clone()))
            .add(fields, &context, diagnostics);
        Ok(())
    }

    fn root_key(&self, fields: &Fields) -> String {
        match self.options.root_id.as_ref().and_then(|r| fields.get(r)) {
            Some(Node::Leaf(cell)) => render_value(&cell.value),
            _ => String::new(),
        }
    }

    fn id_info(&self, root_key: &str, id: Option<&Node>) -> String {
        let id_value = match id {
            Some(Node::Leaf(cell)) => render_value(&cell.value),
            _ => "None".to_string(),
        };
        let id_info = format!("{} \"{}\"", self.options.id_name, id_value);
        match &self.options.root_id {
            Some(root_id) => format!("{} \"{}\", {}", root_id, root_key, id_info),
            None => id_info,
        }
    }

    //--------------------------------------------------------------------------
    // Sheet-qualified reference rows
    //--------------------------------------------------------------------------

    fn add_referenced_row(
        &mut self,
        sheet: &InputSheet,
        row_number: u32,
        cells: &[(&Column, &CellValue)],
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()> {
        let mut references: Vec<Reference> = Vec::new();
        let mut root_cell: Option<Cell> = None;
        let mut data: Vec<(&Column, &CellValue)> = Vec::new();

        for (column, raw) in cells {
            let location = CellLocation::new(&sheet.name, &column.letter, row_number, &column.heading);
            if self.is_reference_column(&sheet.name, column) {
                let value = convert_type(None, raw, &self.options.timezone)
                    .into_value()
                    .unwrap_or(Value::Null);
                references.push(Reference {
                    container: column.path.parent_segments().to_vec(),
                    cell: Cell::new(value, location),
                    heading: column.heading.clone(),
                });
            } else if self.is_root_id_column(column) {
                let typed = column.path.deindexed();
                if let Some(value) = convert_type(self.field_type(&typed), raw, &self.options.timezone).into_value() {
                    root_cell = Some(Cell::new(value, location));
                }
            } else {
                data.push((*column, *raw));
            }
        }

        references.sort_by_key(|r| r.container.len());
        for pair in references.windows(2) {
            let (outer, inner) = (&pair[0], &pair[1]);
            if outer.container.len() == inner.container.len()
                || inner.container[..outer.container.len()] != outer.container[..]
            {
                return Err(FlattenError::AmbiguousIdentifier {
                    sheet: sheet.name.clone(),
                    row: row_number,
                    columns: vec![outer.heading.clone(), inner.heading.clone()],
                });
            }
        }
        let deepest = references
            .last()
            .map(|r| r.container.clone())
            .unwrap_or_else(|| vec![Segment::field(self.options.main_sheet_name.clone())]);

        // Row fragment first, so conversion diagnostics do not depend on navigation
        let container_typed: String = deepest
            .iter()
            .skip(1)
            .filter_map(Segment::name)
            .collect::<Vec<_>>()
            .join("/");
        let property = self.sheet_property(&sheet.name, &container_typed);
        let item_typed = join(&container_typed, &property);
        let mut fragment = Fields::new();
        for (column, raw) in &data {
            self.insert_cell(&mut fragment, &sheet.name, row_number, column, raw, &item_typed, diagnostics)?;
        }

        let root_key = root_cell.as_ref().map(|c| render_value(&c.value)).unwrap_or_default();
        let top_id = references
            .iter()
            .find(|r| r.container.len() == 1)
            .map(|r| render_value(&r.cell.value));
        let context = MergeContext {
            id_info: match &self.options.root_id {
                Some(root_id) => format!(
                    "{} \"{}\", {} \"{}\"",
                    root_id,
                    root_key,
                    self.options.id_name,
                    top_id.unwrap_or_else(|| "None".to_string())
                ),
                None => format!("{} \"{}\"", self.options.id_name, top_id.unwrap_or_else(|| "None".to_string())),
            },
        };
        let fragment = seal(fragment, &self.options.id_name, &context, diagnostics);

        let mut by_container: IndexMap<String, Cell> = references
            .into_iter()
            .map(|r| (segments_key(&r.container), r.cell))
            .collect();
        if fragment.is_empty() && by_container.is_empty() {
            return Ok(());
        }

        // Path from the top-level object down to the deepest referenced one
        let mut steps: Vec<(String, bool, Option<Cell>)> = Vec::new();
        let mut typed = String::new();
        for depth in 1..deepest.len() {
            let Some(name) = deepest[depth].name() else {
                continue;
            };
            typed = join(&typed, name);
            let key = segments_key(&deepest[..=depth]);
            let is_list = matches!(deepest[depth], Segment::Field { array: true, .. })
                || self.field_type(&typed) == Some(FieldType::ObjectArray)
                || by_container.contains_key(&key);
            let id = if is_list { by_container.shift_remove(&key) } else { None };
            steps.push((name.to_string(), is_list, id));
        }
        let top_id = by_container.shift_remove(&segments_key(&deepest[..1]));

        let id_name = self.options.id_name.clone();
        let root = self
            .roots
            .entry(root_key)
            .or_insert_with(|| TemporaryCollection::new(id_name.clone()));
        let mut target = root.locate(top_id);
        if let (Some(root_id), Some(cell)) = (self.options.root_id.clone(), root_cell) {
            let mut top = Fields::new();
            top.insert(root_id, Node::Leaf(cell));
            merge_fields(target, top, &context, diagnostics);
        }

        let mut typed = String::new();
        for (name, is_list, id) in steps {
            typed = join(&typed, &name);
            let node = target.entry(name).or_insert_with(|| {
                if is_list {
                    Node::List(TemporaryCollection::new(id_name.clone()))
                } else {
                    Node::Object(Fields::new())
                }
            });
            let found = describe(node);
            target = match node {
                Node::List(list) if is_list => list.locate(id),
                Node::Object(fields) if !is_list => fields,
                _ => {
                    return Err(FlattenError::ShapeMismatch {
                        path: typed,
                        expected: if is_list { "an array" } else { "an object" }.to_string(),
                        found: found.to_string(),
                    })
                }
            };
        }

        // Rows carrying nothing but identifiers only confirm their parents
        if fragment.is_empty() {
            return Ok(());
        }

        let mut parts: Vec<&str> = property.split('/').collect();
        let last = parts.pop().unwrap_or_default();
        for part in parts {
            let node = target
                .entry(part.to_string())
                .or_insert_with(|| Node::Object(Fields::new()));
            let found = describe(node);
            target = match node {
                Node::Object(fields) => fields,
                _ => {
                    return Err(FlattenError::ShapeMismatch {
                        path: join(&container_typed, part),
                        expected: "an object".to_string(),
                        found: found.to_string(),
                    })
                }
            };
        }
        let node = target
            .entry(last.to_string())
            .or_insert_with(|| Node::List(TemporaryCollection::new(id_name.clone())));
        match node {
            Node::List(list) => list.add(fragment, &context, diagnostics),
            other => {
                return Err(FlattenError::ShapeMismatch {
                    path: item_typed,
                    expected: "an array".to_string(),
                    found: describe(other).to_string(),
                })
            }
        }
        Ok(())
    }

    /// Array property that holds this sheet's rows, relative to `container`
    fn sheet_property(&self, sheet: &str, container: &str) -> String {
        let known = self
            .topology
            .as_ref()
            .and_then(|t| t.sheet(sheet))
            .and_then(|s| {
                s.array_paths.iter().find_map(|array_path| {
                    if container.is_empty() {
                        Some(array_path.clone())
                    } else {
                        array_path
                            .strip_prefix(container)
                            .and_then(|rest| rest.strip_prefix('/'))
                            .map(str::to_string)
                    }
                })
            });
        known.unwrap_or_else(|| sheet.to_string())
    }

    //--------------------------------------------------------------------------
    // Per-cell insertion
    //--------------------------------------------------------------------------

    /// Walk `column`'s path from `root`, creating objects and array slots,
    /// and store the coerced leaf. `type_prefix` is the de-indexed path of
    /// `root` itself, used for schema type lookups.
    #[allow(clippy::too_many_arguments)]
    fn insert_cell(
        &self,
        root: &mut Fields,
        sheet: &str,
        row_number: u32,
        column: &Column,
        raw: &CellValue,
        type_prefix: &str,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<()> {
        let location = CellLocation::new(sheet, &column.letter, row_number, &column.heading);
        let ignore = |diagnostics: &mut dyn DiagnosticSink, message: String| {
            diagnostics.report(
                Diagnostic::new(DiagnosticKind::IgnoredColumn, message).with_context(
                    DiagnosticContext::new()
                        .with_sheet(sheet)
                        .with_row(row_number)
                        .with_field(column.heading.clone()),
                ),
            );
        };

        let segments = &column.path.segments;
        if segments.first().is_some_and(Segment::is_index) {
            ignore(
                diagnostics,
                format!("Column \"{}\" has been ignored because it is a number.", column.heading),
            );
            return Ok(());
        }

        let mut current = root;
        let mut typed = type_prefix.to_string();
        let mut i = 0;
        while i < segments.len() {
            let (name, array_marker) = match &segments[i] {
                Segment::Field { name, array } => (name.as_str(), *array),
                Segment::Index(_) => {
                    i += 1;
                    continue;
                }
            };
            typed = join(&typed, name);
            let schema_type = self.field_type(&typed);
            let next = segments.get(i + 1);

            let slot = match next {
                Some(Segment::Index(n)) => Some((i64::try_from(*n).unwrap_or(i64::MAX), 2)),
                _ if array_marker || schema_type == Some(FieldType::ObjectArray) => Some((-1, 1)),
                _ => None,
            };

            if let Some((slot, consumed)) = slot {
                if let Some(expected) = schema_type.filter(|t| *t != FieldType::ObjectArray) {
                    return Err(shape_mismatch(&typed, expected, "an array"));
                }
                if i + consumed >= segments.len() {
                    ignore(
                        diagnostics,
                        format!("Column {} has been ignored, because it has no field after the array index.", column.heading),
                    );
                    return Ok(());
                }
                let node = current
                    .entry(name.to_string())
                    .or_insert_with(|| Node::Slots(BTreeMap::new()));
                current = match node {
                    Node::Slots(slots) => slots.entry(slot).or_default(),
                    _ => {
                        ignore(
                            diagnostics,
                            format!(
                                "Column {} has been ignored, because it treats {} as an array, but another column does not.",
                                column.heading, typed
                            ),
                        );
                        return Ok(());
                    }
                };
                i += consumed;
                continue;
            }

            if next.is_some() {
                if let Some(expected) = schema_type.filter(|t| t.is_leaf()) {
                    return Err(shape_mismatch(&typed, expected, "an object"));
                }
                let node = current
                    .entry(name.to_string())
                    .or_insert_with(|| Node::Object(Fields::new()));
                current = match node {
                    Node::Object(fields) => fields,
                    _ => {
                        ignore(
                            diagnostics,
                            format!(
                                "Column {} has been ignored, because it treats {} as an object, but another column does not.",
                                column.heading, typed
                            ),
                        );
                        return Ok(());
                    }
                };
                i += 1;
                continue;
            }

            // Leaf
            if let Some(expected) = schema_type.filter(|t| !t.is_leaf()) {
                return Err(shape_mismatch(&typed, expected, "a value"));
            }
            if matches!(current.get(name), Some(Node::Object(_) | Node::Slots(_) | Node::List(_))) {
                ignore(
                    diagnostics,
                    format!(
                        "Column {} has been ignored, because another column treats it as an array or object.",
                        column.heading
                    ),
                );
                return Ok(());
            }

            if matches!(current.get(name), Some(Node::Leaf(_))) {
                ignore(
                    diagnostics,
                    format!(
                        "Column {} has been ignored, because another column in the same row already set {}.",
                        column.heading, typed
                    ),
                );
                return Ok(());
            }

            let value = match convert_type(schema_type.or(column.path.hint), raw, &self.options.timezone) {
                Conversion::Empty => return Ok(()),
                Conversion::Value(value) => value,
                Conversion::Fallback { value, reason } => {
                    diagnostics.report(
                        Diagnostic::new(DiagnosticKind::TypeCoercion, reason).with_context(
                            DiagnosticContext::new()
                                .with_sheet(sheet)
                                .with_row(row_number)
                                .with_path(typed.clone())
                                .with_field(column.heading.clone()),
                        ),
                    );
                    value
                }
            };
            current.insert(name.to_string(), Node::Leaf(Cell::new(value, location)));
            return Ok(());
        }
        Ok(())
    }
}

fn segments_key(segments: &[Segment]) -> String {
    strip_indices(
        &segments
            .iter()
            .map(Segment::to_string)
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn describe(node: &Node) -> &'static str {
    match node {
        Node::Leaf(_) => "a value",
        Node::Object(_) => "an object",
        Node::Slots(_) | Node::List(_) => "an array",
    }
}

fn shape_mismatch(path: &str, expected: FieldType, found: &str) -> FlattenError {
    FlattenError::ShapeMismatch {
        path: path.to_string(),
        expected: expected.describe().to_string(),
        found: found.to_string(),
    }
}

/// Unflatten a whole workbook. The main sheet is read first, then the
/// others in the order given.
pub fn unflatten(
    sheets: &[InputSheet],
    options: &UnflattenOptions,
    topology: Option<SheetTopology>,
    diagnostics: &mut dyn DiagnosticSink,
) -> FlattenResult<UnflattenOutput> {
    let mut unflattener = Unflattener::new(options.clone(), topology);
    let main = sheets.iter().filter(|s| s.name == options.main_sheet_name);
    let rest = sheets.iter().filter(|s| s.name != options.main_sheet_name);
    for sheet in main.chain(rest) {
        unflattener.add_sheet(sheet, diagnostics)?;
    }
    Ok(unflattener.finish())
}
