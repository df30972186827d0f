//! Provenance index built while reconstructed records are materialised

use super::path::{parent_of, strip_indices};
use crate::types::{Cell, CellLocation};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

/// Cell, row and heading provenance, keyed by output path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMap {
    /// Indexed leaf path → every physical cell that produced the value
    pub cells: IndexMap<String, Vec<CellLocation>>,
    /// Indexed container path → `(sheet, row)` of the rows that built it
    pub rows: IndexMap<String, Vec<(String, u32)>>,
    /// De-indexed path → `(sheet, heading)` of every column that fed it
    pub headings: IndexMap<String, Vec<(String, String)>>,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Record a materialised leaf at `path` together with all its aliases
    pub fn record_leaf(&mut self, path: &str, cell: &Cell) {
        let container = parent_of(path).to_string();
        let heading_path = strip_indices(path);

        for location in cell.locations() {
            push_unique(self.cells.entry(path.to_string()).or_default(), location.clone());
            push_unique(
                self.rows.entry(container.clone()).or_default(),
                (location.sheet.clone(), location.row),
            );
            push_unique(
                self.headings.entry(heading_path.clone()).or_default(),
                (location.sheet.clone(), location.heading.clone()),
            );
        }
    }

    /// Record the rows that built the container at `path`
    pub fn record_rows(&mut self, path: &str, rows: &[(String, u32)]) {
        if rows.is_empty() {
            return;
        }
        let entry = self.rows.entry(path.to_string()).or_default();
        for row in rows {
            push_unique(entry, row.clone());
        }
    }

    /// Total number of cell locations across all leaves
    pub fn cell_location_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// `{path: [[sheet, column, row, heading], ...], container: [[sheet, row], ...]}`
    pub fn cell_map_json(&self) -> Value {
        let mut map = Map::new();
        for (path, locations) in &self.cells {
            let entries = locations
                .iter()
                .map(|l| json!([l.sheet, l.column, l.row, l.heading]))
                .collect();
            map.insert(path.clone(), Value::Array(entries));
        }
        for (path, rows) in &self.rows {
            let entries = rows.iter().map(|(sheet, row)| json!([sheet, row])).collect();
            map.insert(path.clone(), Value::Array(entries));
        }
        Value::Object(map)
    }

    /// `{path: [[sheet, heading], ...]}`
    pub fn heading_map_json(&self) -> Value {
        let map = self
            .headings
            .iter()
            .map(|(path, pairs)| {
                let entries = pairs
                    .iter()
                    .map(|(sheet, heading)| json!([sheet, heading]))
                    .collect();
                (path.clone(), Value::Array(entries))
            })
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }
}
