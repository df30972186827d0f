//! Run configuration for the three passes
//!
//! Defaults match the command-line defaults, so library callers and the CLI
//! behave the same unless told otherwise.

use crate::error::{FlattenError, FlattenResult};
use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashSet;

pub const DEFAULT_ROOT_ID: &str = "ocid";
pub const DEFAULT_ID_NAME: &str = "id";
pub const DEFAULT_MAIN_SHEET_NAME: &str = "main";
pub const DEFAULT_TRUNCATION_LENGTH: usize = 3;

/// Which arrays get their single item inlined into the parent row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RollUp {
    #[default]
    Disabled,
    /// Use the `rollUp` field lists declared in the schema
    Schema,
    /// Roll up every scalar field of the arrays at these paths
    Paths(Vec<String>),
}

impl RollUp {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RollUp::Disabled)
    }

    /// True when `path` (de-indexed) was listed explicitly
    pub fn lists_path(&self, path: &str) -> bool {
        match self {
            RollUp::Paths(paths) => paths.iter().any(|p| p == path),
            _ => false,
        }
    }

    /// Build from the CLI form: no flag, bare flag, or flag with paths
    pub fn from_cli(enabled: bool, paths: Vec<String>) -> Self {
        if !paths.is_empty() {
            RollUp::Paths(paths)
        } else if enabled {
            RollUp::Schema
        } else {
            RollUp::Disabled
        }
    }
}

/// Spreadsheet container written by `create-template` and `flatten`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Xlsx,
    /// A directory holding one `<sheet>.csv` per sheet
    Csv,
    All,
}

impl OutputFormat {
    pub fn writes_xlsx(&self) -> bool {
        matches!(self, OutputFormat::Xlsx | OutputFormat::All)
    }

    pub fn writes_csv(&self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::All)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = FlattenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xlsx" => Ok(OutputFormat::Xlsx),
            "csv" => Ok(OutputFormat::Csv),
            "all" => Ok(OutputFormat::All),
            other => Err(FlattenError::Config(format!(
                "Unknown output format '{}' (expected xlsx, csv or all)",
                other
            ))),
        }
    }
}

/// Options for deriving a sheet topology from a schema
#[derive(Debug, Clone)]
pub struct SchemaOptions {
    /// Cross-record join column placed first on every sheet; `None` disables it
    pub root_id: Option<String>,
    /// Field that identifies an object inside its array
    pub id_name: String,
    pub main_sheet_name: String,
    pub roll_up: RollUp,
    pub use_titles: bool,
    pub truncation_length: usize,
    pub exclude_deprecated: bool,
    /// Tag non-string scalar columns with `:type` suffixes
    pub type_hints: bool,
    pub sheet_prefix: String,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            root_id: Some(DEFAULT_ROOT_ID.to_string()),
            id_name: DEFAULT_ID_NAME.to_string(),
            main_sheet_name: DEFAULT_MAIN_SHEET_NAME.to_string(),
            roll_up: RollUp::Disabled,
            use_titles: false,
            truncation_length: DEFAULT_TRUNCATION_LENGTH,
            exclude_deprecated: false,
            type_hints: false,
            sheet_prefix: String::new(),
        }
    }
}

/// Options for the flattening pass
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub root_id: Option<String>,
    pub id_name: String,
    pub main_sheet_name: String,
    pub roll_up: RollUp,
    /// Roll up arrays anywhere in the main-sheet row, not only top-level ones
    pub roll_up_nested: bool,
    pub use_titles: bool,
    pub truncation_length: usize,
    pub sheet_prefix: String,
    /// Keep only records whose top-level `field` equals `value`
    pub filter: Option<(String, String)>,
    /// Allow-list of field paths to keep (de-indexed, slash separated)
    pub preserve_fields: Option<Vec<String>>,
    pub type_hints: bool,
    pub remove_empty_schema_columns: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            root_id: Some(DEFAULT_ROOT_ID.to_string()),
            id_name: DEFAULT_ID_NAME.to_string(),
            main_sheet_name: DEFAULT_MAIN_SHEET_NAME.to_string(),
            roll_up: RollUp::Disabled,
            roll_up_nested: false,
            use_titles: false,
            truncation_length: DEFAULT_TRUNCATION_LENGTH,
            sheet_prefix: String::new(),
            filter: None,
            preserve_fields: None,
            type_hints: false,
            remove_empty_schema_columns: false,
        }
    }
}

impl FlattenOptions {
    /// The preserve list plus every ancestor path of each entry
    pub fn preserve_closure(&self) -> Option<HashSet<String>> {
        self.preserve_fields.as_ref().map(|fields| {
            let mut all = HashSet::new();
            for field in fields {
                let parts: Vec<&str> = field.split('/').collect();
                for end in 1..=parts.len() {
                    all.insert(parts[..end].join("/"));
                }
            }
            all
        })
    }

    /// Schema options that produce a topology matching these flatten options
    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            root_id: self.root_id.clone(),
            id_name: self.id_name.clone(),
            main_sheet_name: self.main_sheet_name.clone(),
            roll_up: self.roll_up.clone(),
            use_titles: self.use_titles,
            truncation_length: self.truncation_length,
            exclude_deprecated: false,
            type_hints: false,
            sheet_prefix: self.sheet_prefix.clone(),
        }
    }
}

/// Options for the unflattening pass
#[derive(Debug, Clone)]
pub struct UnflattenOptions {
    pub root_id: Option<String>,
    pub id_name: String,
    pub main_sheet_name: String,
    /// Key of the output list, also the first segment of source-map paths
    pub root_list_path: String,
    /// Emit a bare list instead of `{root_list_path: [...]}`
    pub root_is_list: bool,
    /// Offset applied to spreadsheet datetimes that carry no zone
    pub timezone: FixedOffset,
    /// Headings are schema titles and must be converted to paths
    pub convert_titles: bool,
}

impl Default for UnflattenOptions {
    fn default() -> Self {
        Self {
            root_id: Some(DEFAULT_ROOT_ID.to_string()),
            id_name: DEFAULT_ID_NAME.to_string(),
            main_sheet_name: DEFAULT_MAIN_SHEET_NAME.to_string(),
            root_list_path: DEFAULT_MAIN_SHEET_NAME.to_string(),
            root_is_list: false,
            timezone: utc(),
            convert_titles: false,
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse `UTC`, `Z`, `+01:00`, `-0530` into a fixed offset
pub fn parse_timezone(text: &str) -> FlattenResult<FixedOffset> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
        return Ok(utc());
    }

    let invalid = || FlattenError::Config(format!("Unrecognised timezone offset: '{}'", text));

    let (sign, rest) = match trimmed.chars().next() {
        Some('+') => (1, &trimmed[1..]),
        Some('-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Treat an empty string as "not configured"
pub fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("+01:00").unwrap().local_minus_utc(), 3600);
        assert_eq!(parse_timezone("-0530").unwrap().local_minus_utc(), -19800);
        assert!(parse_timezone("Europe/London").is_err());
        assert!(parse_timezone("+1").is_err());
    }

    #[test]
    fn test_roll_up_from_cli() {
        assert_eq!(RollUp::from_cli(false, vec![]), RollUp::Disabled);
        assert_eq!(RollUp::from_cli(true, vec![]), RollUp::Schema);
        assert_eq!(
            RollUp::from_cli(false, vec!["tender/items".to_string()]),
            RollUp::Paths(vec!["tender/items".to_string()])
        );
        assert!(RollUp::Paths(vec!["a".to_string()]).lists_path("a"));
        assert!(!RollUp::Schema.lists_path("a"));
    }

    #[test]
    fn test_preserve_closure_includes_ancestors() {
        let options = FlattenOptions {
            preserve_fields: Some(vec!["tender/items/id".to_string()]),
            ..Default::default()
        };
        let closure = options.preserve_closure().unwrap();
        assert!(closure.contains("tender"));
        assert!(closure.contains("tender/items"));
        assert!(closure.contains("tender/items/id"));
        assert!(!closure.contains("tender/id"));
    }

    #[test]
    fn test_output_format() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("all".parse::<OutputFormat>().unwrap().writes_xlsx());
        assert!(!OutputFormat::Xlsx.writes_csv());
        assert!("ods".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("".to_string()), None);
        assert_eq!(non_empty("ocid".to_string()), Some("ocid".to_string()));
    }
}
