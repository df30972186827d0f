//! Excel reader and writer
//!
//! - Export: sheet topology and flattened rows → .xlsx
//! - Import: .xlsx → input sheets for unflattening

mod exporter;
mod importer;

pub use exporter::ExcelExporter;
pub use importer::ExcelImporter;
