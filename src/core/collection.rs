//! In-flight record tree and identifier-keyed merging
//!
//! Rows are first built into [`Fields`] trees whose arrays are index-keyed
//! [`Node::Slots`]. Once a row is complete the slots are sealed into
//! [`TemporaryCollection`]s, and rows are merged into each other by the
//! value of their identifier field. The first value seen always wins.

use super::path::join;
use super::source_map::SourceMap;
use crate::diagnostics::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink};
use crate::types::Cell;
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Fields = IndexMap<String, Node>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Cell),
    Object(Fields),
    /// Array items of a single row, by explicit index (`-1` when implicit)
    Slots(BTreeMap<i64, Fields>),
    List(TemporaryCollection),
}

impl Node {
    fn shape(&self) -> &'static str {
        match self {
            Node::Leaf(_) => "a value",
            Node::Object(_) => "an object",
            Node::Slots(_) | Node::List(_) => "an array",
        }
    }

    /// Every leaf cell below this node, in tree order
    fn collect_cells<'a>(&'a self, out: &mut Vec<&'a Cell>) {
        match self {
            Node::Leaf(cell) => out.push(cell),
            Node::Object(fields) => collect_field_cells(fields, out),
            Node::Slots(slots) => slots.values().for_each(|f| collect_field_cells(f, out)),
            Node::List(list) => list.items().for_each(|f| collect_field_cells(f, out)),
        }
    }
}

fn collect_field_cells<'a>(fields: &'a Fields, out: &mut Vec<&'a Cell>) {
    for node in fields.values() {
        node.collect_cells(out);
    }
}

/// Context attached to merge diagnostics
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    /// e.g. `ocid "1", id "2"`
    pub id_info: String,
}

/// Text used to key and report a JSON scalar
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Objects merged by the value of `key_field`; items without one are kept apart
#[derive(Debug, Clone, PartialEq)]
pub struct TemporaryCollection {
    key_field: String,
    keyed: IndexMap<String, Fields>,
    unkeyed: Vec<Fields>,
}

impl TemporaryCollection {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            keyed: IndexMap::new(),
            unkeyed: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keyed.len() + self.unkeyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keyed items in first-seen order, then unkeyed items
    pub fn items(&self) -> impl Iterator<Item = &Fields> {
        self.keyed.values().chain(self.unkeyed.iter())
    }

    pub fn into_items(self) -> impl Iterator<Item = Fields> {
        self.keyed.into_values().chain(self.unkeyed)
    }

    fn key_of(&self, item: &Fields) -> Option<String> {
        match item.get(&self.key_field) {
            Some(Node::Leaf(cell)) => Some(render_value(&cell.value)),
            _ => None,
        }
    }

    /// Merge `item` into the entry with the same key, or append it
    pub fn add(&mut self, item: Fields, context: &MergeContext, diagnostics: &mut dyn DiagnosticSink) {
        match self.key_of(&item) {
            Some(key) => match self.keyed.entry(key) {
                Entry::Occupied(entry) => merge_fields(entry.into_mut(), item, context, diagnostics),
                Entry::Vacant(entry) => {
                    entry.insert(item);
                }
            },
            None => self.unkeyed.push(item),
        }
    }

    /// The item whose key equals `id`'s value, creating `{key_field: id}` if
    /// absent. Without an id a fresh unkeyed item is appended.
    pub fn locate(&mut self, id: Option<Cell>) -> &mut Fields {
        let Some(cell) = id else {
            self.unkeyed.push(Fields::new());
            let last = self.unkeyed.len() - 1;
            return &mut self.unkeyed[last];
        };
        let key_field = self.key_field.clone();
        match self.keyed.entry(render_value(&cell.value)) {
            Entry::Occupied(entry) => {
                let item = entry.into_mut();
                match item.get_mut(&key_field) {
                    Some(Node::Leaf(existing)) => existing.absorb(cell),
                    _ => {
                        item.insert(key_field, Node::Leaf(cell));
                    }
                }
                item
            }
            Entry::Vacant(entry) => {
                let mut item = Fields::new();
                item.insert(key_field, Node::Leaf(cell));
                entry.insert(item)
            }
        }
    }

    fn merge(&mut self, other: TemporaryCollection, context: &MergeContext, diagnostics: &mut dyn DiagnosticSink) {
        for (key, item) in other.keyed {
            match self.keyed.entry(key) {
                Entry::Occupied(entry) => merge_fields(entry.into_mut(), item, context, diagnostics),
                Entry::Vacant(entry) => {
                    entry.insert(item);
                }
            }
        }
        self.unkeyed.extend(other.unkeyed);
    }
}

/// Recursively merge `other` into `base`; on conflict the base value stays
pub fn merge_fields(
    base: &mut Fields,
    other: Fields,
    context: &MergeContext,
    diagnostics: &mut dyn DiagnosticSink,
) {
    for (key, incoming) in other {
        let Some(existing) = base.get_mut(&key) else {
            base.insert(key, incoming);
            continue;
        };

        match (existing, incoming) {
            (Node::List(list), Node::List(more)) => list.merge(more, context, diagnostics),
            (Node::Object(fields), Node::Object(more)) => merge_fields(fields, more, context, diagnostics),
            (Node::Leaf(cell), Node::Leaf(other_cell)) => {
                if cell.value == other_cell.value {
                    cell.absorb(other_cell);
                } else {
                    diagnostics.report(
                        Diagnostic::new(
                            DiagnosticKind::MergeConflict,
                            format!(
                                "You may have a duplicate Identifier: We couldn't merge these rows with the {}: field \"{}\" in sheet \"{}\": one cell has the value: \"{}\", the other cell has the value: \"{}\"",
                                context.id_info,
                                key,
                                other_cell.location.sheet,
                                render_value(&cell.value),
                                render_value(&other_cell.value)
                            ),
                        )
                        .with_context(
                            DiagnosticContext::new()
                                .with_sheet(other_cell.location.sheet.clone())
                                .with_row(other_cell.location.row)
                                .with_field(key.clone()),
                        ),
                    );
                }
            }
            (existing, incoming) => {
                let mut cells = Vec::new();
                incoming.collect_cells(&mut cells);
                for cell in cells {
                    diagnostics.report(
                        Diagnostic::new(
                            DiagnosticKind::IgnoredColumn,
                            format!(
                                "Column {} has been ignored, because it treats {} as {}, but another column treats it as {}.",
                                cell.location.heading,
                                key,
                                incoming.shape(),
                                existing.shape()
                            ),
                        )
                        .with_context(
                            DiagnosticContext::new()
                                .with_sheet(cell.location.sheet.clone())
                                .with_row(cell.location.row)
                                .with_field(cell.location.heading.clone()),
                        ),
                    );
                }
            }
        }
    }
}

/// Turn every `Slots` node into a keyed collection, items in index order
pub fn seal(fields: Fields, key_field: &str, context: &MergeContext, diagnostics: &mut dyn DiagnosticSink) -> Fields {
    fields
        .into_iter()
        .map(|(key, node)| {
            let node = match node {
                Node::Object(inner) => Node::Object(seal(inner, key_field, context, diagnostics)),
                Node::Slots(slots) => {
                    let mut list = TemporaryCollection::new(key_field);
                    for item in slots.into_values() {
                        list.add(seal(item, key_field, context, diagnostics), context, diagnostics);
                    }
                    Node::List(list)
                }
                other => other,
            };
            (key, node)
        })
        .collect()
}

/// Materialise a sealed tree as JSON, recording provenance under `path`
pub fn to_value(fields: Fields, path: &str, source_map: &mut SourceMap) -> Value {
    materialise(fields, path, source_map).0
}

type RowRefs = Vec<(String, u32)>;

fn extend_unique(rows: &mut RowRefs, more: RowRefs) {
    for row in more {
        if !rows.contains(&row) {
            rows.push(row);
        }
    }
}

/// Every object and list element is recorded against the rows of all the
/// cells below it, so containers without a direct leaf are covered too.
fn materialise(fields: Fields, path: &str, source_map: &mut SourceMap) -> (Value, RowRefs) {
    let mut object = Map::new();
    let mut rows = RowRefs::new();
    for (key, node) in fields {
        let child_path = join(path, &key);
        let (value, child_rows) = match node {
            Node::Leaf(cell) => {
                source_map.record_leaf(&child_path, &cell);
                let cell_rows: RowRefs = cell.locations().map(|l| (l.sheet.clone(), l.row)).collect();
                (cell.value, cell_rows)
            }
            Node::Object(inner) => materialise(inner, &child_path, source_map),
            Node::List(list) => items_to_value(list.into_items(), &child_path, source_map),
            Node::Slots(slots) => items_to_value(slots.into_values(), &child_path, source_map),
        };
        extend_unique(&mut rows, child_rows);
        object.insert(key, value);
    }
    source_map.record_rows(path, &rows);
    (Value::Object(object), rows)
}

fn items_to_value<I: Iterator<Item = Fields>>(items: I, path: &str, source_map: &mut SourceMap) -> (Value, RowRefs) {
    let mut rows = RowRefs::new();
    let values = items
        .enumerate()
        .map(|(i, item)| {
            let (value, item_rows) = materialise(item, &join(path, &i.to_string()), source_map);
            extend_unique(&mut rows, item_rows);
            value
        })
        .collect();
    (Value::Array(values), rows)
}
