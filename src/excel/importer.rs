//! Excel importer: .xlsx → input sheets

use crate::error::{FlattenError, FlattenResult, MalformedKind};
use crate::types::{CellValue, InputSheet};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads every worksheet of a workbook as headings plus raw rows
pub struct ExcelImporter {
    path: PathBuf,
}

impl ExcelImporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Import all sheets in workbook order
    pub fn import(&self) -> FlattenResult<Vec<InputSheet>> {
        let source_name = self.path.display().to_string();
        let mut workbook: Xlsx<_> = open_workbook(&self.path).map_err(|e| {
            FlattenError::malformed(&source_name, MalformedKind::Structure, format!("Failed to open Excel file: {}", e))
        })?;

        let mut sheets = Vec::new();
        for sheet_name in workbook.sheet_names().to_vec() {
            let range = workbook
                .worksheet_range(&sheet_name)
                .map_err(|e| FlattenError::Import(format!("Failed to read sheet '{}': {}", sheet_name, e)))?;
            sheets.push(read_range(&sheet_name, &range));
        }
        Ok(sheets)
    }
}

/// First row is the heading row; every later row is data
fn read_range(sheet_name: &str, range: &Range<Data>) -> InputSheet {
    // Ranges start at the first used cell, not necessarily A1
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let (height, width) = range.get_size();
    let offset = start_col as usize;

    let mut headings: Vec<Option<String>> = vec![None; offset];
    for col in 0..width {
        let heading = range
            .get((0, col))
            .map(to_cell_value)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_string().trim().to_string());
        headings.push(heading);
    }

    let mut sheet = InputSheet::new(sheet_name, headings);
    sheet.first_row = start_row + 2;
    for row in 1..height {
        let mut values = vec![CellValue::Empty; offset];
        for col in 0..width {
            values.push(range.get((row, col)).map(to_cell_value).unwrap_or(CellValue::Empty));
        }
        sheet.push_row(values);
    }
    debug!(sheet = sheet_name, rows = sheet.rows.len(), "Imported worksheet");
    sheet
}

fn to_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::String(s.clone()),
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::DateTime(value),
            None => CellValue::Float(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            Ok(value) => CellValue::DateTime(value),
            Err(_) => CellValue::String(s.clone()),
        },
        Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => CellValue::String(e.to_string()),
    }
}
