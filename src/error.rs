use std::fmt;
use thiserror::Error;

pub type FlattenResult<T> = Result<T, FlattenError>;

/// What was wrong with an input document that could not be read at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    /// Bytes are not valid text in the expected encoding
    Encoding,
    /// Text is valid but the document structure is not (bad JSON, bad CSV quoting)
    Structure,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedKind::Encoding => write!(f, "encoding"),
            MalformedKind::Structure => write!(f, "structure"),
        }
    }
}

#[derive(Error, Debug)]
pub enum FlattenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed {kind} in '{source_name}': {message}")]
    MalformedSource {
        source_name: String,
        kind: MalformedKind,
        message: String,
    },

    #[error("There is {found} at '{path}' but the schema says it should be {expected}")]
    ShapeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Inconsistent identifier columns in sheet '{sheet}' row {row}: {}", columns.join(", "))]
    AmbiguousIdentifier {
        sheet: String,
        row: u32,
        columns: Vec<String>,
    },

    #[error("Unsupported value at '{path}': {kind}")]
    UnsupportedValue { path: String, kind: String },

    #[error("Invalid column path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlattenError {
    pub fn malformed(
        source_name: impl Into<String>,
        kind: MalformedKind,
        message: impl Into<String>,
    ) -> Self {
        FlattenError::MalformedSource {
            source_name: source_name.into(),
            kind,
            message: message.into(),
        }
    }

    /// True for the errors caused by unreadable input rather than by its content
    pub fn is_malformed_source(&self) -> bool {
        matches!(self, FlattenError::MalformedSource { .. })
    }
}
