use chrono::NaiveDateTime;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

//==============================================================================
// Cell values
//==============================================================================

/// A raw spreadsheet cell, as read from or written to a tabular format
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    String(String),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Empty cells and whitespace-only text count as blank
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Convert a JSON scalar. Returns `None` for objects and arrays.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(CellValue::Empty),
            serde_json::Value::Bool(b) => Some(CellValue::Bool(*b)),
            serde_json::Value::String(s) => Some(CellValue::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(CellValue::Integer(i));
                }
                let text = n.to_string();
                if let Ok(d) = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
                    return Some(CellValue::Decimal(d));
                }
                n.as_f64().map(CellValue::Float)
            }
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::String(_) => "string",
            CellValue::Integer(_) => "integer",
            CellValue::Float(_) | CellValue::Decimal(_) => "number",
            CellValue::Bool(_) => "boolean",
            CellValue::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::String(s) => write!(f, "{}", s),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{}", v)
                }
            }
            CellValue::Decimal(d) => write!(f, "{}", d),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

//==============================================================================
// Provenance
//==============================================================================

/// Physical origin of a cell: sheet, column letter, 1-based row, heading text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CellLocation {
    pub sheet: String,
    pub column: String,
    pub row: u32,
    pub heading: String,
}

impl CellLocation {
    pub fn new(
        sheet: impl Into<String>,
        column: impl Into<String>,
        row: u32,
        heading: impl Into<String>,
    ) -> Self {
        Self {
            sheet: sheet.into(),
            column: column.into(),
            row,
            heading: heading.into(),
        }
    }
}

impl fmt::Display for CellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}{}", self.sheet, self.column, self.row)
    }
}

/// A converted value together with every physical cell that produced it.
///
/// `aliases` collects cells that independently carried the same value, e.g.
/// a parent field repeated on several sub-sheet rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: serde_json::Value,
    pub location: CellLocation,
    pub aliases: Vec<CellLocation>,
}

impl Cell {
    pub fn new(value: serde_json::Value, location: CellLocation) -> Self {
        Self {
            value,
            location,
            aliases: Vec::new(),
        }
    }

    /// Primary location first, then aliases in arrival order
    pub fn locations(&self) -> impl Iterator<Item = &CellLocation> {
        std::iter::once(&self.location).chain(self.aliases.iter())
    }

    /// Absorb another cell holding the same value
    pub fn absorb(&mut self, other: Cell) {
        self.aliases.push(other.location);
        self.aliases.extend(other.aliases);
    }
}

//==============================================================================
// Rows
//==============================================================================

/// One flattened row: column path → raw value, in first-written order
pub type FlatRow = IndexMap<String, CellValue>;

/// Destination for flattened rows, one ordered stream per sheet
pub trait RowSink {
    fn write_row(&mut self, sheet: &str, row: FlatRow);
}

/// Append-only in-memory row store
#[derive(Debug, Default, Clone)]
pub struct MemoryRowStore {
    sheets: IndexMap<String, Vec<FlatRow>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of one sheet in insertion order
    pub fn rows(&self, sheet: &str) -> &[FlatRow] {
        self.sheets.get(sheet).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }

    pub fn row_count(&self, sheet: &str) -> usize {
        self.rows(sheet).len()
    }

    /// Hand over the rows of a sheet and free them from the store
    pub fn release(&mut self, sheet: &str) -> Vec<FlatRow> {
        self.sheets
            .get_mut(sheet)
            .map(std::mem::take)
            .unwrap_or_default()
    }
}

impl RowSink for MemoryRowStore {
    fn write_row(&mut self, sheet: &str, row: FlatRow) {
        self.sheets.entry(sheet.to_string()).or_default().push(row);
    }
}

/// One sheet as delivered by a tabular reader
#[derive(Debug, Clone, PartialEq)]
pub struct InputSheet {
    pub name: String,
    /// Heading per physical column; `None` for blank headings
    pub headings: Vec<Option<String>>,
    pub rows: Vec<Vec<CellValue>>,
    /// 1-based spreadsheet row number of `rows[0]`
    pub first_row: u32,
}

impl InputSheet {
    pub fn new(name: impl Into<String>, headings: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            headings,
            rows: Vec::new(),
            first_row: 2,
        }
    }

    /// Build a sheet from string headings, mostly for tests and fixtures
    pub fn from_headings<S: AsRef<str>>(name: impl Into<String>, headings: &[S]) -> Self {
        let headings = headings
            .iter()
            .map(|h| {
                let h = h.as_ref().trim();
                if h.is_empty() {
                    None
                } else {
                    Some(h.to_string())
                }
            })
            .collect();
        Self::new(name, headings)
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) {
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: Vec<CellValue>) -> Self {
        self.rows.push(row);
        self
    }
}

/// Convert column index to spreadsheet column letter (0→A, 25→Z, 26→AA)
pub fn column_letter(index: usize) -> String {
    let mut result = String::new();
    let mut num = index;

    loop {
        let remainder = num % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if num < 26 {
            break;
        }
        num = num / 26 - 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_cell_value_from_json() {
        assert_eq!(CellValue::from_json(&json!(null)), Some(CellValue::Empty));
        assert_eq!(CellValue::from_json(&json!(3)), Some(CellValue::Integer(3)));
        assert_eq!(
            CellValue::from_json(&json!("a")),
            Some(CellValue::String("a".to_string()))
        );
        assert_eq!(
            CellValue::from_json(&json!(1.5)),
            Some(CellValue::Decimal(Decimal::from_str("1.5").unwrap()))
        );
        assert_eq!(CellValue::from_json(&json!({"a": 1})), None);
        assert_eq!(CellValue::from_json(&json!([1])), None);
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Float(3.0).to_string(), "3");
        assert_eq!(CellValue::Float(2.5).to_string(), "2.5");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
        assert_eq!(CellValue::Empty.to_string(), "");
    }

    #[test]
    fn test_is_blank() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::String("  ".to_string()).is_blank());
        assert!(!CellValue::Integer(0).is_blank());
    }

    #[test]
    fn test_memory_row_store_order_and_release() {
        let mut store = MemoryRowStore::new();
        let mut row = FlatRow::new();
        row.insert("a".to_string(), CellValue::Integer(1));
        store.write_row("main", row.clone());
        row.insert("a".to_string(), CellValue::Integer(2));
        store.write_row("main", row);

        assert_eq!(store.row_count("main"), 2);
        assert_eq!(store.rows("main")[1]["a"], CellValue::Integer(2));
        let released = store.release("main");
        assert_eq!(released.len(), 2);
        assert_eq!(store.row_count("main"), 0);
    }

    #[test]
    fn test_cell_absorb_keeps_order() {
        let mut cell = Cell::new(json!(1), CellLocation::new("main", "A", 2, "id"));
        let mut other = Cell::new(json!(1), CellLocation::new("sub", "B", 2, "main/id"));
        other.aliases.push(CellLocation::new("sub", "B", 3, "main/id"));
        cell.absorb(other);
        let rows: Vec<u32> = cell.locations().map(|l| l.row).collect();
        assert_eq!(rows, vec![2, 2, 3]);
    }
}
