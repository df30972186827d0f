//! CSV directory reader and writer: one `<sheet>.csv` per sheet

use crate::core::sheet::SheetTopology;
use crate::error::{FlattenError, FlattenResult, MalformedKind};
use crate::types::{CellValue, InputSheet, MemoryRowStore};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes a topology (and optionally its rows) as a directory of CSV files
pub struct CsvDirExporter<'a> {
    topology: &'a SheetTopology,
    rows: Option<&'a MemoryRowStore>,
    use_titles: bool,
}

impl<'a> CsvDirExporter<'a> {
    pub fn new(topology: &'a SheetTopology, use_titles: bool) -> Self {
        Self {
            topology,
            rows: None,
            use_titles,
        }
    }

    pub fn with_rows(mut self, rows: &'a MemoryRowStore) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Create `dir` if needed and write every sheet into it
    pub fn export(&self, dir: &Path) -> FlattenResult<()> {
        std::fs::create_dir_all(dir)?;
        for sheet in self.topology.sheets() {
            let path = dir.join(format!("{}.csv", sheet.name));
            let mut writer = WriterBuilder::new()
                .from_path(&path)
                .map_err(|e| FlattenError::Export(format!("Failed to create '{}': {}", path.display(), e)))?;

            let columns = sheet.column_paths();
            let headings: Vec<&str> = columns
                .iter()
                .map(|path| if self.use_titles { sheet.heading(path) } else { *path })
                .collect();
            writer
                .write_record(&headings)
                .map_err(|e| FlattenError::Export(e.to_string()))?;

            if let Some(store) = self.rows {
                for row in store.rows(&sheet.name) {
                    let record: Vec<String> = columns
                        .iter()
                        .map(|path| row.get(*path).map(CellValue::to_string).unwrap_or_default())
                        .collect();
                    writer
                        .write_record(&record)
                        .map_err(|e| FlattenError::Export(e.to_string()))?;
                }
            }
            writer.flush()?;
            debug!(sheet = %sheet.name, path = %path.display(), "Wrote CSV sheet");
        }
        Ok(())
    }
}

/// Reads every `*.csv` file of a directory as one sheet
pub struct CsvDirImporter {
    dir: PathBuf,
    main_sheet_name: String,
}

impl CsvDirImporter {
    pub fn new<P: AsRef<Path>>(dir: P, main_sheet_name: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            main_sheet_name: main_sheet_name.into(),
        }
    }

    /// Main sheet first, the rest in file-name order
    pub fn import(&self) -> FlattenResult<Vec<InputSheet>> {
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort_by(|(a, _), (b, _)| {
            (a != &self.main_sheet_name)
                .cmp(&(b != &self.main_sheet_name))
                .then_with(|| a.cmp(b))
        });

        files
            .iter()
            .map(|(name, path)| read_sheet(name, path))
            .collect()
    }
}

fn read_sheet(name: &str, path: &Path) -> FlattenResult<InputSheet> {
    let source_name = path.display().to_string();
    let malformed = |e: csv::Error| {
        let kind = match e.kind() {
            csv::ErrorKind::Utf8 { .. } => MalformedKind::Encoding,
            _ => MalformedKind::Structure,
        };
        FlattenError::malformed(&source_name, kind, e.to_string())
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(malformed)?;

    let mut records = reader.records();
    let headings: Vec<String> = match records.next() {
        Some(record) => record.map_err(malformed)?.iter().map(str::to_string).collect(),
        None => Vec::new(),
    };
    let mut sheet = InputSheet::from_headings(name, &headings);
    for record in records {
        let record = record.map_err(malformed)?;
        sheet.push_row(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        CellValue::Empty
                    } else {
                        CellValue::String(field.to_string())
                    }
                })
                .collect(),
        );
    }
    debug!(sheet = name, rows = sheet.rows.len(), "Read CSV sheet");
    Ok(sheet)
}
