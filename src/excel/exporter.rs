//! Excel exporter: sheet topology (+ optional rows) → .xlsx

use crate::core::sheet::{Sheet, SheetTopology};
use crate::error::{FlattenError, FlattenResult};
use crate::types::{CellValue, MemoryRowStore};
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::path::Path;
use tracing::debug;

/// Writes one worksheet per sheet of a topology, main sheet first
pub struct ExcelExporter<'a> {
    topology: &'a SheetTopology,
    rows: Option<&'a MemoryRowStore>,
    use_titles: bool,
}

impl<'a> ExcelExporter<'a> {
    /// Exporter for a template: headings only
    pub fn new(topology: &'a SheetTopology, use_titles: bool) -> Self {
        Self {
            topology,
            rows: None,
            use_titles,
        }
    }

    /// Also write the flattened rows held in `rows`
    pub fn with_rows(mut self, rows: &'a MemoryRowStore) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn export(&self, output_path: &Path) -> FlattenResult<()> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        for sheet in self.topology.sheets() {
            let worksheet = workbook.add_worksheet();
            self.export_sheet(worksheet, sheet, &bold)?;
        }

        workbook
            .save(output_path)
            .map_err(|e| FlattenError::Export(format!("Failed to save Excel file: {}", e)))?;
        Ok(())
    }

    fn export_sheet(&self, worksheet: &mut Worksheet, sheet: &Sheet, bold: &Format) -> FlattenResult<()> {
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| FlattenError::Export(format!("Failed to set worksheet name '{}': {}", sheet.name, e)))?;

        let columns = sheet.column_paths();
        for (index, path) in columns.iter().enumerate() {
            let heading = if self.use_titles { sheet.heading(path) } else { *path };
            worksheet
                .write_string_with_format(0, column_index(index)?, heading, bold)
                .map_err(|e| FlattenError::Export(format!("Failed to write heading: {}", e)))?;
        }

        let Some(store) = self.rows else {
            return Ok(());
        };
        let rows = store.rows(&sheet.name);
        debug!(sheet = %sheet.name, rows = rows.len(), "Writing worksheet");
        for (offset, row) in rows.iter().enumerate() {
            let row_index = u32::try_from(offset + 1)
                .map_err(|_| FlattenError::Export(format!("Too many rows in sheet '{}'", sheet.name)))?;
            for (index, path) in columns.iter().enumerate() {
                if let Some(value) = row.get(*path) {
                    write_cell_value(worksheet, row_index, column_index(index)?, value)?;
                }
            }
        }
        Ok(())
    }
}

fn column_index(index: usize) -> FlattenResult<u16> {
    u16::try_from(index).map_err(|_| FlattenError::Export(format!("Column {} is beyond the sheet width", index)))
}

/// Write a single cell value based on its kind
fn write_cell_value(worksheet: &mut Worksheet, row: u32, col: u16, value: &CellValue) -> FlattenResult<()> {
    let result = match value {
        CellValue::Empty => return Ok(()),
        CellValue::String(text) => worksheet.write_string(row, col, text),
        CellValue::Integer(i) => worksheet.write_number(row, col, *i as f64),
        CellValue::Float(f) => worksheet.write_number(row, col, *f),
        // Decimals that do not survive f64 are kept as text
        CellValue::Decimal(d) => match d.to_f64().filter(|f| f.to_string() == d.to_string()) {
            Some(f) => worksheet.write_number(row, col, f),
            None => worksheet.write_string(row, col, d.to_string()),
        },
        CellValue::Bool(b) => worksheet.write_boolean(row, col, *b),
        CellValue::DateTime(_) => worksheet.write_string(row, col, value.to_string()),
    };
    result
        .map(|_| ())
        .map_err(|e| FlattenError::Export(format!("Failed to write cell: {}", e)))
}
