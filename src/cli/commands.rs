use crate::config::{FlattenOptions, OutputFormat, SchemaOptions, UnflattenOptions};
use crate::core::{topology_from_schema, Flattener, SheetTopology};
use crate::csvdir::{CsvDirExporter, CsvDirImporter};
use crate::diagnostics::Diagnostics;
use crate::error::FlattenResult;
use crate::excel::{ExcelExporter, ExcelImporter};
use crate::parser;
use crate::types::{InputSheet, MemoryRowStore};
use crate::writer;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the spreadsheet outputs go for a given base path and format.
///
/// `out.xlsx` and `out` both give `out.xlsx` for the workbook and `out/` for
/// the CSV directory.
pub fn output_targets(output: &Path, format: OutputFormat) -> (Option<PathBuf>, Option<PathBuf>) {
    let base = match output.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => output.with_extension(""),
        _ => output.to_path_buf(),
    };
    let xlsx = format.writes_xlsx().then(|| base.with_extension("xlsx"));
    let csv = format.writes_csv().then(|| base.clone());
    (xlsx, csv)
}

fn write_spreadsheets(
    topology: &SheetTopology,
    rows: Option<&MemoryRowStore>,
    output: &Path,
    format: OutputFormat,
    use_titles: bool,
) -> FlattenResult<()> {
    let (xlsx, csv) = output_targets(output, format);
    if let Some(path) = xlsx {
        let mut exporter = ExcelExporter::new(topology, use_titles);
        if let Some(rows) = rows {
            exporter = exporter.with_rows(rows);
        }
        exporter.export(&path)?;
        println!("   Excel file: {}", path.display());
    }
    if let Some(dir) = csv {
        let mut exporter = CsvDirExporter::new(topology, use_titles);
        if let Some(rows) = rows {
            exporter = exporter.with_rows(rows);
        }
        exporter.export(&dir)?;
        println!("   CSV directory: {}", dir.display());
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &Diagnostics, verbose: bool) {
    if diagnostics.is_empty() {
        return;
    }
    println!(
        "{}",
        format!("⚠️  {} warning(s)", diagnostics.len()).yellow().bold()
    );
    let limit = if verbose { usize::MAX } else { 10 };
    for diagnostic in diagnostics.entries().iter().take(limit) {
        println!("   {}", diagnostic.to_string().yellow());
    }
    if diagnostics.len() > limit {
        println!("   ... {} more (use --verbose to list all)", diagnostics.len() - limit);
    }
    println!();
}

fn print_topology(topology: &SheetTopology) {
    for sheet in topology.sheets() {
        println!(
            "   📄 {} ({} columns)",
            sheet.name.bright_blue().bold(),
            sheet.len()
        );
    }
}

/// Execute the create-template command
pub fn create_template(
    schema: PathBuf,
    output: PathBuf,
    format: OutputFormat,
    options: SchemaOptions,
    verbose: bool,
) -> FlattenResult<()> {
    println!("{}", "📐 Flatten - Create Template".bold().green());
    println!("   Schema: {}", schema.display());
    println!();

    let schema_doc = parser::load_schema(&schema)?;
    let mut diagnostics = Diagnostics::new();
    let topology = topology_from_schema(&schema_doc, &options, &mut diagnostics)?;

    if verbose {
        print_topology(&topology);
        println!();
    }
    print_diagnostics(&diagnostics, verbose);

    write_spreadsheets(&topology, None, &output, format, options.use_titles)?;
    info!(sheets = topology.sheet_count(), "Template written");
    println!("{}", "✅ Template created".bold().green());
    Ok(())
}

/// Execute the flatten command
#[allow(clippy::too_many_arguments)]
pub fn flatten(
    input: PathBuf,
    output: PathBuf,
    schema: Option<PathBuf>,
    root_list_path: String,
    root_is_list: bool,
    format: OutputFormat,
    options: FlattenOptions,
    verbose: bool,
) -> FlattenResult<()> {
    println!("{}", "📊 Flatten - Records to sheets".bold().green());
    println!("   Input:  {}", input.display());
    println!();

    let document = parser::load_document(&input)?;
    let records = parser::records_at(&document, &root_list_path, root_is_list)?;
    let mut diagnostics = Diagnostics::new();

    let topology = match &schema {
        Some(path) => {
            let schema_doc = parser::load_schema(path)?;
            let invalid = parser::validate_records(&schema_doc, &records, &mut diagnostics)?;
            if invalid > 0 {
                println!(
                    "{}",
                    format!("⚠️  {} record(s) do not match the schema; flattening anyway", invalid).yellow()
                );
            }
            Some(topology_from_schema(&schema_doc, &options.schema_options(), &mut diagnostics)?)
        }
        None => None,
    };

    let use_titles = options.use_titles;
    let mut flattener = Flattener::new(options, topology);
    let mut rows = MemoryRowStore::new();
    flattener.flatten_all(records.iter().copied(), &mut rows, &mut diagnostics)?;
    let (topology, summary) = flattener.finish(&mut diagnostics);

    println!(
        "   Records: {} read, {} filtered out",
        summary.records_read, summary.records_filtered
    );
    if verbose {
        for (sheet, count) in &summary.rows {
            println!("   📄 {}: {} row(s)", sheet.bright_blue(), count);
        }
    }
    println!();
    print_diagnostics(&diagnostics, verbose);

    write_spreadsheets(&topology, Some(&rows), &output, format, use_titles)?;
    println!("{}", "✅ Flatten complete".bold().green());
    Ok(())
}

/// Read a workbook (`.xlsx`) or a CSV directory
pub fn read_sheets(input: &Path, main_sheet_name: &str) -> FlattenResult<Vec<InputSheet>> {
    if input.is_dir() {
        CsvDirImporter::new(input, main_sheet_name).import()
    } else {
        ExcelImporter::new(input).import()
    }
}

/// Execute the unflatten command
#[allow(clippy::too_many_arguments)]
pub fn unflatten(
    input: PathBuf,
    output: PathBuf,
    schema: Option<PathBuf>,
    options: UnflattenOptions,
    cell_source_map: Option<PathBuf>,
    heading_source_map: Option<PathBuf>,
    verbose: bool,
) -> FlattenResult<()> {
    println!("{}", "🌳 Flatten - Sheets to records".bold().green());
    println!("   Input:  {}", input.display());
    println!("   Output: {}", output.display());
    println!();

    let sheets = read_sheets(&input, &options.main_sheet_name)?;
    let mut diagnostics = Diagnostics::new();

    let topology = match &schema {
        Some(path) => {
            let schema_doc = parser::load_schema(path)?;
            let schema_options = SchemaOptions {
                root_id: options.root_id.clone(),
                id_name: options.id_name.clone(),
                main_sheet_name: options.main_sheet_name.clone(),
                use_titles: options.convert_titles,
                ..SchemaOptions::default()
            };
            Some(topology_from_schema(&schema_doc, &schema_options, &mut diagnostics)?)
        }
        None => None,
    };

    if verbose {
        for sheet in &sheets {
            println!("   📄 {}: {} row(s)", sheet.name.bright_blue(), sheet.rows.len());
        }
        println!();
    }

    let result = crate::core::unflatten(&sheets, &options, topology, &mut diagnostics)?;
    println!("   Records: {}", result.records);
    println!();
    print_diagnostics(&diagnostics, verbose);

    writer::write_document(&output, &result.data)?;
    writer::write_source_maps(
        &result.source_map,
        cell_source_map.as_deref(),
        heading_source_map.as_deref(),
    )?;
    if let Some(path) = &cell_source_map {
        println!("   Cell source map: {}", path.display());
    }
    if let Some(path) = &heading_source_map {
        println!("   Heading source map: {}", path.display());
    }
    println!("{}", "✅ Unflatten complete".bold().green());
    Ok(())
}
