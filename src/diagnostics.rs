//! Non-fatal problems found while building templates, flattening or unflattening
//!
//! The engines never print anything themselves. Every recoverable problem is
//! handed to a [`DiagnosticSink`] as a structured [`Diagnostic`], and the caller
//! decides how to show it.

use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Closed set of non-fatal problem kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Schema property with a type the walker cannot map to columns
    UnsupportedSchemaType,
    /// A `rollUp` entry names a field the item schema does not have
    MissingRollUpField,
    /// Roll-up requested on an array holding more than one item
    RollUpAmbiguous,
    /// Title mode is on and a field has no title
    MissingTitle,
    /// Two different paths would print the same title in one sheet
    DuplicateTitle,
    /// A cell could not be converted to its column type and was kept as text
    TypeCoercion,
    /// Two rows for the same identifier disagree on a scalar field
    MergeConflict,
    /// The same heading appears more than once in a sheet
    DuplicateHeading,
    /// A column was skipped because its data cannot be placed
    IgnoredColumn,
    /// A preserve-field entry never matched any data
    PreserveFieldMissing,
    /// Input data does not validate against the supplied schema
    SchemaValidation,
    /// A `$ref` cycle was cut while resolving the schema
    RecursiveSchema,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UnsupportedSchemaType => "unsupported schema type",
            DiagnosticKind::MissingRollUpField => "missing roll-up field",
            DiagnosticKind::RollUpAmbiguous => "ambiguous roll-up",
            DiagnosticKind::MissingTitle => "missing title",
            DiagnosticKind::DuplicateTitle => "duplicate title",
            DiagnosticKind::TypeCoercion => "type coercion",
            DiagnosticKind::MergeConflict => "merge conflict",
            DiagnosticKind::DuplicateHeading => "duplicate heading",
            DiagnosticKind::IgnoredColumn => "ignored column",
            DiagnosticKind::PreserveFieldMissing => "preserve field missing",
            DiagnosticKind::SchemaValidation => "schema validation",
            DiagnosticKind::RecursiveSchema => "recursive schema",
        };
        write!(f, "{}", name)
    }
}

/// Where a diagnostic was raised
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn with_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub context: DiagnosticContext,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: DiagnosticContext::default(),
        }
    }

    pub fn with_context(mut self, context: DiagnosticContext) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Receiver for every non-fatal diagnostic
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// In-memory collector that also logs each entry as a warning
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one kind, in the order they were reported
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        warn!(kind = %diagnostic.kind, "{}", diagnostic.message);
        self.entries.push(diagnostic);
    }
}
