//! Flatten - nested JSON records to spreadsheets and back
//!
//! A JSON Schema (or the data itself) decides the sheet layout: the main
//! sheet holds one row per record, and every list of objects gets its own
//! sub-sheet whose rows carry the identifiers of their parents. Unflattening
//! joins those rows back into records and keeps a source map from every
//! output value to the cells it came from.
//!
//! # Example
//!
//! ```no_run
//! use royalbit_flatten::config::FlattenOptions;
//! use royalbit_flatten::core::Flattener;
//! use royalbit_flatten::diagnostics::Diagnostics;
//! use royalbit_flatten::types::MemoryRowStore;
//! use serde_json::json;
//!
//! let records = vec![json!({"ocid": "1", "items": [{"id": "a"}, {"id": "b"}]})];
//! let mut diagnostics = Diagnostics::new();
//! let mut rows = MemoryRowStore::new();
//!
//! let mut flattener = Flattener::new(FlattenOptions::default(), None);
//! flattener.flatten_all(&records, &mut rows, &mut diagnostics)?;
//! let (topology, _summary) = flattener.finish(&mut diagnostics);
//!
//! for sheet in topology.sheets() {
//!     println!("{}: {} rows", sheet.name, rows.row_count(&sheet.name));
//! }
//! # Ok::<(), royalbit_flatten::error::FlattenError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod csvdir;
pub mod diagnostics;
pub mod error;
pub mod excel;
pub mod parser;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Diagnostics};
pub use error::{FlattenError, FlattenResult};
pub use types::{CellValue, InputSheet, MemoryRowStore};
