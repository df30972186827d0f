use clap::{Args, Parser, Subcommand};
use royalbit_flatten::cli;
use royalbit_flatten::config::{
    non_empty, parse_timezone, FlattenOptions, OutputFormat, RollUp, SchemaOptions, UnflattenOptions,
    DEFAULT_ID_NAME, DEFAULT_MAIN_SHEET_NAME, DEFAULT_ROOT_ID, DEFAULT_TRUNCATION_LENGTH,
};
use royalbit_flatten::error::{FlattenError, FlattenResult};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flatten")]
#[command(about = "Convert between nested JSON records and spreadsheets")]
#[command(long_about = "Flatten - JSON records <-> spreadsheets, driven by JSON Schema

COMMANDS:
  create-template - Empty workbook whose sheets and columns follow a schema
  flatten         - JSON/YAML records to .xlsx and/or a CSV directory
  unflatten       - .xlsx or CSV directory back to JSON, with source maps

EXAMPLES:
  flatten create-template release-schema.json -o template.xlsx
  flatten flatten releases.json -s release-schema.json -o flat --format all
  flatten unflatten flat.xlsx -o releases.json --cell-source-map cells.json

Logging goes to stderr; set RUST_LOG=royalbit_flatten=debug for per-sheet detail.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Identifier options shared by every command
#[derive(Args)]
struct IdArgs {
    /// Root identifier column placed first on every sheet (empty to disable)
    #[arg(long, env = "FLATTEN_ROOT_ID", default_value = DEFAULT_ROOT_ID)]
    root_id: String,

    /// Field that identifies an object inside its list
    #[arg(long, env = "FLATTEN_ID_NAME", default_value = DEFAULT_ID_NAME)]
    id_name: String,

    /// Name of the main sheet
    #[arg(long, default_value = DEFAULT_MAIN_SHEET_NAME)]
    main_sheet_name: String,
}

/// Sheet layout options for template and flatten
#[derive(Args)]
struct LayoutArgs {
    /// Roll single-item lists up into the parent sheet; optionally list the array paths
    #[arg(long, num_args = 0.., value_delimiter = ',')]
    rollup: Option<Vec<String>>,

    /// Print schema titles instead of paths as headings
    #[arg(long)]
    use_titles: bool,

    /// Characters kept from each parent segment in sub-sheet names
    #[arg(long, default_value_t = DEFAULT_TRUNCATION_LENGTH)]
    truncation_length: usize,

    /// Prefix for sub-sheet names
    #[arg(long, default_value = "")]
    sheet_prefix: String,

    /// Tag non-string columns with `:type` suffixes
    #[arg(long)]
    type_hints: bool,

    /// Output format: xlsx, csv or all
    #[arg(short, long, default_value = "xlsx")]
    format: OutputFormat,
}

impl LayoutArgs {
    fn roll_up(&self) -> RollUp {
        match &self.rollup {
            None => RollUp::Disabled,
            Some(paths) => RollUp::from_cli(true, paths.clone()),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty spreadsheet template from a JSON Schema
    CreateTemplate {
        /// Path to the JSON Schema (JSON or YAML)
        schema: PathBuf,

        /// Output base path (`.xlsx` file and/or CSV directory)
        #[arg(short, long, default_value = "template")]
        output: PathBuf,

        #[command(flatten)]
        ids: IdArgs,

        #[command(flatten)]
        layout: LayoutArgs,

        /// Leave out properties marked deprecated
        #[arg(long)]
        no_deprecated_fields: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Flatten JSON/YAML records into sheets
    Flatten {
        /// Path to the input document
        input: PathBuf,

        /// Output base path (`.xlsx` file and/or CSV directory)
        #[arg(short, long, default_value = "flattened")]
        output: PathBuf,

        /// JSON Schema that fixes the sheet layout
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Slash-delimited path to the list of records
        #[arg(long, default_value = DEFAULT_MAIN_SHEET_NAME)]
        root_list_path: String,

        /// The document itself is the list of records
        #[arg(long)]
        root_is_list: bool,

        #[command(flatten)]
        ids: IdArgs,

        #[command(flatten)]
        layout: LayoutArgs,

        /// Also roll up lists below the top level of the main sheet
        #[arg(long)]
        rollup_nested: bool,

        /// Keep only records where FIELD equals VALUE
        #[arg(long, num_args = 2, value_names = ["FIELD", "VALUE"])]
        filter: Option<Vec<String>>,

        /// File listing the field paths to keep, one per line
        #[arg(long)]
        preserve_fields: Option<PathBuf>,

        /// Drop schema columns that no record populated
        #[arg(long)]
        remove_empty_schema_columns: bool,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Rebuild JSON records from sheets
    Unflatten {
        /// Path to an .xlsx workbook or a directory of CSV files
        input: PathBuf,

        /// Output document (`.json`, or `.yaml` for YAML)
        #[arg(short, long, default_value = "unflattened.json")]
        output: PathBuf,

        /// JSON Schema used for types and titles
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Key of the output list
        #[arg(long, default_value = DEFAULT_MAIN_SHEET_NAME)]
        root_list_path: String,

        /// Write a bare list instead of an object
        #[arg(long)]
        root_is_list: bool,

        #[command(flatten)]
        ids: IdArgs,

        /// Headings are schema titles (needs --schema)
        #[arg(long)]
        convert_titles: bool,

        /// UTC offset for spreadsheet dates without a zone (e.g. +01:00)
        #[arg(long, env = "FLATTEN_TIMEZONE", default_value = "UTC")]
        timezone: String,

        /// Write the cell source map here
        #[arg(long)]
        cell_source_map: Option<PathBuf>,

        /// Write the heading source map here
        #[arg(long)]
        heading_source_map: Option<PathBuf>,

        #[arg(short, long)]
        verbose: bool,
    },
}

fn read_preserve_fields(path: &Path) -> FlattenResult<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(|line| line.trim().trim_matches('/').to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

fn run(cli: Cli) -> FlattenResult<()> {
    match cli.command {
        Commands::CreateTemplate {
            schema,
            output,
            ids,
            layout,
            no_deprecated_fields,
            verbose,
        } => {
            let options = SchemaOptions {
                root_id: non_empty(ids.root_id),
                id_name: ids.id_name,
                main_sheet_name: ids.main_sheet_name,
                roll_up: layout.roll_up(),
                use_titles: layout.use_titles,
                truncation_length: layout.truncation_length,
                exclude_deprecated: no_deprecated_fields,
                type_hints: layout.type_hints,
                sheet_prefix: layout.sheet_prefix,
            };
            cli::create_template(schema, output, layout.format, options, verbose)
        }

        Commands::Flatten {
            input,
            output,
            schema,
            root_list_path,
            root_is_list,
            ids,
            layout,
            rollup_nested,
            filter,
            preserve_fields,
            remove_empty_schema_columns,
            verbose,
        } => {
            let filter = match filter.as_deref() {
                Some([field, value]) => Some((field.clone(), value.clone())),
                Some(_) => {
                    return Err(FlattenError::Config("--filter takes FIELD and VALUE".to_string()));
                }
                None => None,
            };
            let preserve_fields = preserve_fields
                .as_deref()
                .map(read_preserve_fields)
                .transpose()?;
            let options = FlattenOptions {
                root_id: non_empty(ids.root_id),
                id_name: ids.id_name,
                main_sheet_name: ids.main_sheet_name,
                roll_up: layout.roll_up(),
                roll_up_nested: rollup_nested,
                use_titles: layout.use_titles,
                truncation_length: layout.truncation_length,
                sheet_prefix: layout.sheet_prefix,
                filter,
                preserve_fields,
                type_hints: layout.type_hints,
                remove_empty_schema_columns,
            };
            cli::flatten(
                input,
                output,
                schema,
                root_list_path,
                root_is_list,
                layout.format,
                options,
                verbose,
            )
        }

        Commands::Unflatten {
            input,
            output,
            schema,
            root_list_path,
            root_is_list,
            ids,
            convert_titles,
            timezone,
            cell_source_map,
            heading_source_map,
            verbose,
        } => {
            if convert_titles && schema.is_none() {
                return Err(FlattenError::Config("--convert-titles needs --schema".to_string()));
            }
            let options = UnflattenOptions {
                root_id: non_empty(ids.root_id),
                id_name: ids.id_name,
                main_sheet_name: ids.main_sheet_name,
                root_list_path,
                root_is_list,
                timezone: parse_timezone(&timezone)?,
                convert_titles,
            };
            cli::unflatten(
                input,
                output,
                schema,
                options,
                cell_source_map,
                heading_source_map,
                verbose,
            )
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("royalbit_flatten=info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
