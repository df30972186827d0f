use crate::core::SourceMap;
use crate::error::FlattenResult;
use crate::parser::DocumentFormat;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Write unflattened data; `.yaml`/`.yml` paths get YAML, everything else JSON
pub fn write_document(path: &Path, value: &Value) -> FlattenResult<()> {
    let content = render_document(value, DocumentFormat::from_path(path))?;
    fs::write(path, content)?;
    Ok(())
}

/// Serialize a document the way [`write_document`] writes it
pub fn render_document(value: &Value, format: DocumentFormat) -> FlattenResult<String> {
    let mut content = match format {
        DocumentFormat::Json => serde_json::to_string_pretty(value)?,
        DocumentFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| crate::error::FlattenError::Export(format!("Failed to serialize YAML: {}", e)))?,
    };
    if !content.ends_with('\n') {
        content.push('\n');
    }
    Ok(content)
}

/// Write the cell and heading source maps; either path may be omitted
pub fn write_source_maps(
    source_map: &SourceMap,
    cell_map_path: Option<&Path>,
    heading_map_path: Option<&Path>,
) -> FlattenResult<()> {
    if let Some(path) = cell_map_path {
        write_document(path, &source_map.cell_map_json())?;
    }
    if let Some(path) = heading_map_path {
        write_document(path, &source_map.heading_map_json())?;
    }
    Ok(())
}
