use crate::diagnostics::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink};
use crate::error::{FlattenError, FlattenResult, MalformedKind};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Syntax of a record or schema document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yaml` and `.yml` are YAML, everything else is read as JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

/// Read a JSON or YAML document from disk.
///
/// Invalid UTF-8 and invalid syntax are both reported as
/// [`FlattenError::MalformedSource`], distinguished by [`MalformedKind`].
pub fn load_document(path: &Path) -> FlattenResult<Value> {
    let bytes = std::fs::read(path)?;
    parse_document(&path.display().to_string(), &bytes, DocumentFormat::from_path(path))
}

/// Parse an in-memory document; `source_name` is only used in errors
pub fn parse_document(source_name: &str, bytes: &[u8], format: DocumentFormat) -> FlattenResult<Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FlattenError::malformed(source_name, MalformedKind::Encoding, e.to_string()))?;

    let value = match format {
        DocumentFormat::Json => serde_json::from_str::<Value>(text)
            .map_err(|e| FlattenError::malformed(source_name, MalformedKind::Structure, e.to_string()))?,
        DocumentFormat::Yaml => serde_yaml::from_str::<Value>(text)
            .map_err(|e| FlattenError::malformed(source_name, MalformedKind::Structure, e.to_string()))?,
    };
    debug!(source = source_name, "Parsed document");
    Ok(value)
}

/// Follow a slash-delimited path of object keys and array indices
pub fn navigate<'a>(root: &'a Value, path: &str) -> FlattenResult<&'a Value> {
    let mut current = root;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| FlattenError::Import(format!("Root path '{}' not found at '{}'", path, part)))?;
    }
    Ok(current)
}

/// The root-level records of a document.
///
/// With `root_is_list` the document itself is the list; otherwise the list
/// sits at `root_list_path`. A single object found there counts as one record.
pub fn records_at<'a>(document: &'a Value, root_list_path: &str, root_is_list: bool) -> FlattenResult<Vec<&'a Value>> {
    let target = if root_is_list {
        document
    } else {
        navigate(document, root_list_path)?
    };
    match target {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(_) => Ok(vec![target]),
        other => Err(FlattenError::UnsupportedValue {
            path: root_list_path.to_string(),
            kind: format!("expected a list of records, found {}", json_type(other)),
        }),
    }
}

/// Load a JSON Schema document (JSON or YAML)
pub fn load_schema(path: &Path) -> FlattenResult<Value> {
    let schema = load_document(path)?;
    if !schema.is_object() {
        return Err(FlattenError::Schema(format!(
            "'{}' does not contain a schema object",
            path.display()
        )));
    }
    Ok(schema)
}

/// Validate each record against `schema`; failures become diagnostics.
///
/// Invalid data is never rejected here. Returns the number of records with
/// at least one failure.
pub fn validate_records(
    schema: &Value,
    records: &[&Value],
    diagnostics: &mut dyn DiagnosticSink,
) -> FlattenResult<usize> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| FlattenError::Schema(format!("Failed to compile schema: {}", e)))?;

    let mut invalid = 0;
    for (index, record) in records.iter().enumerate() {
        if let Err(errors) = compiled.validate(record) {
            invalid += 1;
            for error in errors {
                let pointer = error.instance_path.to_string();
                diagnostics.report(
                    Diagnostic::new(
                        DiagnosticKind::SchemaValidation,
                        format!("Record {} at '{}': {}", index, pointer, error),
                    )
                    .with_context(DiagnosticContext::new().with_path(pointer)),
                );
            }
        }
    }
    info!(records = records.len(), invalid, "Validated records against schema");
    Ok(invalid)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
