//! Sheets and the topology that ties them to schema paths

use super::coerce::FieldType;
use crate::error::{FlattenError, FlattenResult};
use indexmap::IndexMap;
use regex::Regex;

/// Longest sheet name a `.xlsx` workbook accepts
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// One tabular unit: the main sheet or one repeating array-of-objects
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub root_id: Option<String>,
    /// Parent identifier columns, always printed before data columns
    pub id_columns: Vec<String>,
    pub columns: Vec<String>,
    /// Column path → printed title (title mode only)
    pub titles: IndexMap<String, String>,
    /// De-indexed paths of the arrays whose items are rows of this sheet
    pub array_paths: Vec<String>,
    title_index: IndexMap<String, String>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, root_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            root_id,
            id_columns: Vec::new(),
            columns: Vec::new(),
            titles: IndexMap::new(),
            array_paths: Vec::new(),
            title_index: IndexMap::new(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.root_id.as_deref() == Some(field)
            || self.id_columns.iter().any(|c| c == field)
            || self.columns.iter().any(|c| c == field)
    }

    /// Append a column unless the sheet already has it; returns true when added
    pub fn add_field(&mut self, field: &str, id_field: bool) -> bool {
        if self.contains(field) {
            return false;
        }
        if id_field {
            self.id_columns.push(field.to_string());
        } else {
            self.columns.push(field.to_string());
        }
        true
    }

    /// Every column path in print order: root id, parent ids, data
    pub fn column_paths(&self) -> Vec<&str> {
        self.root_id
            .iter()
            .map(String::as_str)
            .chain(self.id_columns.iter().map(String::as_str))
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.column_paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `title` for `path`. Fails with the path already holding that title.
    pub fn set_title(&mut self, path: &str, title: &str) -> Result<(), String> {
        let key = normalize_heading(title);
        match self.title_index.get(&key) {
            Some(existing) if existing != path => Err(existing.clone()),
            _ => {
                self.title_index.insert(key, path.to_string());
                self.titles.insert(path.to_string(), title.to_string());
                Ok(())
            }
        }
    }

    /// The printed heading for a column path
    pub fn heading<'a>(&'a self, path: &'a str) -> &'a str {
        self.titles.get(path).map(String::as_str).unwrap_or(path)
    }

    /// Reverse title lookup, ignoring case and repeated whitespace
    pub fn path_for_heading(&self, heading: &str) -> Option<&str> {
        self.title_index
            .get(&normalize_heading(heading))
            .map(String::as_str)
    }

    /// Drop data columns for which `keep` returns false
    pub fn retain_columns<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.columns.retain(|c| keep(c));
    }
}

/// Lowercase and collapse whitespace so headings compare loosely
pub fn normalize_heading(heading: &str) -> String {
    heading
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The sheets derived from a schema (or discovered in data) plus path metadata
#[derive(Debug, Clone)]
pub struct SheetTopology {
    pub main: Sheet,
    pub sub_sheets: IndexMap<String, Sheet>,
    field_types: IndexMap<String, FieldType>,
    sheet_for_path: IndexMap<String, String>,
    sheet_for_reference: IndexMap<String, String>,
    truncation_length: usize,
    sheet_prefix: String,
}

impl SheetTopology {
    pub fn new(
        main_sheet_name: &str,
        root_id: Option<String>,
        truncation_length: usize,
        sheet_prefix: &str,
    ) -> Self {
        Self {
            main: Sheet::new(main_sheet_name, root_id),
            sub_sheets: IndexMap::new(),
            field_types: IndexMap::new(),
            sheet_for_path: IndexMap::new(),
            sheet_for_reference: IndexMap::new(),
            truncation_length,
            sheet_prefix: sheet_prefix.to_string(),
        }
    }

    pub fn is_main(&self, name: &str) -> bool {
        self.main.name == name
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        if self.is_main(name) {
            Some(&self.main)
        } else {
            self.sub_sheets.get(name)
        }
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        if self.main.name == name {
            Some(&mut self.main)
        } else {
            self.sub_sheets.get_mut(name)
        }
    }

    /// Main sheet first, then sub-sheets in creation order
    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        std::iter::once(&self.main).chain(self.sub_sheets.values())
    }

    pub fn sheet_count(&self) -> usize {
        1 + self.sub_sheets.len()
    }

    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.field_types.get(path).copied()
    }

    pub fn set_field_type(&mut self, path: &str, field_type: FieldType) {
        self.field_types.insert(path.to_string(), field_type);
    }

    pub fn field_types(&self) -> &IndexMap<String, FieldType> {
        &self.field_types
    }

    /// Sheet holding the items of the array at this de-indexed path
    pub fn sheet_name_for_path(&self, array_path: &str) -> Option<&str> {
        self.sheet_for_path.get(array_path).map(String::as_str)
    }

    /// Find or create the sub-sheet for the array `property` under `parent_path`.
    ///
    /// `parent_path` is the indexed path of the object holding the array (`""`
    /// at the root, `tender/items/0` deeper down). When `reference` names the
    /// item schema, every array sharing that reference lands in one sheet.
    pub fn sub_sheet_for(
        &mut self,
        parent_path: &str,
        property: &str,
        reference: Option<&str>,
    ) -> FlattenResult<String> {
        let array_path = super::path::strip_indices(&super::path::join(parent_path, property));
        if let Some(name) = self.sheet_for_path.get(&array_path) {
            return Ok(name.clone());
        }

        if let Some(reference) = reference {
            if let Some(name) = self.sheet_for_reference.get(reference).cloned() {
                self.link(&array_path, &name);
                return Ok(name);
            }
        }

        let base = match reference {
            Some(reference) => reference_name(reference),
            None => make_sub_sheet_name(parent_path, property, self.truncation_length),
        };
        let name = self.unique_sheet_name(&format!("{}{}", self.sheet_prefix, base))?;

        let mut sheet = Sheet::new(name.clone(), self.main.root_id.clone());
        sheet.array_paths.push(array_path.clone());
        self.sub_sheets.insert(name.clone(), sheet);
        self.sheet_for_path.insert(array_path, name.clone());
        if let Some(reference) = reference {
            self.sheet_for_reference
                .insert(reference.to_string(), name.clone());
        }
        Ok(name)
    }

    fn link(&mut self, array_path: &str, name: &str) {
        self.sheet_for_path
            .insert(array_path.to_string(), name.to_string());
        if let Some(sheet) = self.sub_sheets.get_mut(name) {
            if !sheet.array_paths.iter().any(|p| p == array_path) {
                sheet.array_paths.push(array_path.to_string());
            }
        }
    }

    fn name_taken(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.sheets().any(|s| s.name.to_lowercase() == lower)
    }

    /// Sanitise, cap at the workbook limit, then add `_2`, `_3`... on collision
    fn unique_sheet_name(&self, candidate: &str) -> FlattenResult<String> {
        let invalid = Regex::new(r"[\[\]:*?/\\]")
            .map_err(|e| FlattenError::Schema(format!("Regex error: {}", e)))?;
        let clean = invalid.replace_all(candidate, "_").to_string();
        let base: String = clean.chars().take(MAX_SHEET_NAME_LEN).collect();
        if !self.name_taken(&base) {
            return Ok(base);
        }

        let mut n = 2usize;
        loop {
            let suffix = format!("_{}", n);
            let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.len());
            let stem: String = clean.chars().take(keep).collect();
            let name = format!("{}{}", stem, suffix);
            if !self.name_taken(&name) {
                return Ok(name);
            }
            n += 1;
        }
    }
}

/// `ten_ite_` style name: each parent segment cut to `truncation_length`
pub fn make_sub_sheet_name(parent_path: &str, property: &str, truncation_length: usize) -> String {
    let parts: Vec<String> = parent_path
        .split('/')
        .filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.chars().take(truncation_length).collect())
        .collect();
    if parts.is_empty() {
        property.to_string()
    } else {
        format!("{}_{}", parts.join("_"), property)
    }
}

/// Last component of a JSON pointer reference: `#/definitions/Item` → `Item`
pub fn reference_name(reference: &str) -> String {
    reference
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(reference)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> SheetTopology {
        SheetTopology::new("main", Some("ocid".to_string()), 3, "")
    }

    #[test]
    fn test_make_sub_sheet_name() {
        assert_eq!(make_sub_sheet_name("", "items", 3), "items");
        assert_eq!(make_sub_sheet_name("tender", "items", 3), "ten_items");
        assert_eq!(
            make_sub_sheet_name("tender/items/0", "additionalClassifications", 3),
            "ten_ite_additionalClassifications"
        );
    }

    #[test]
    fn test_add_field_dedupes_against_root_id() {
        let mut sheet = Sheet::new("main", Some("ocid".to_string()));
        assert!(!sheet.add_field("ocid", false));
        assert!(sheet.add_field("id", true));
        assert!(sheet.add_field("title", false));
        assert!(!sheet.add_field("title", false));
        assert_eq!(sheet.column_paths(), vec!["ocid", "id", "title"]);
    }

    #[test]
    fn test_truncation_collision_is_disambiguated() {
        let mut topology = topology();
        let a = topology.sub_sheet_for("tender", "items", None).unwrap();
        let b = topology.sub_sheet_for("tenderers", "items", None).unwrap();
        assert_eq!(a, "ten_items");
        assert_eq!(b, "ten_items_2");
        assert_eq!(topology.sheet_name_for_path("tenderers/items"), Some("ten_items_2"));
        // Same path again reuses its sheet
        assert_eq!(topology.sub_sheet_for("tender", "items", None).unwrap(), "ten_items");
    }

    #[test]
    fn test_reference_shares_sheet() {
        let mut topology = topology();
        let a = topology
            .sub_sheet_for("", "parties", Some("#/definitions/Organization"))
            .unwrap();
        let b = topology
            .sub_sheet_for("tender", "tenderers", Some("#/definitions/Organization"))
            .unwrap();
        assert_eq!(a, "Organization");
        assert_eq!(a, b);
        assert_eq!(
            topology.sub_sheets["Organization"].array_paths,
            vec!["parties".to_string(), "tender/tenderers".to_string()]
        );
    }

    #[test]
    fn test_long_names_capped() {
        let mut topology = topology();
        let name = topology
            .sub_sheet_for("", "aVeryLongPropertyNameThatKeepsGoingOnAndOn", None)
            .unwrap();
        assert_eq!(name.chars().count(), MAX_SHEET_NAME_LEN);
        let other = topology
            .sub_sheet_for("", "aVeryLongPropertyNameThatKeepsGoingOnAndOnAgain", None)
            .unwrap();
        assert_ne!(name, other);
        assert!(other.ends_with("_2"));
        assert_eq!(other.chars().count(), MAX_SHEET_NAME_LEN);
    }

    #[test]
    fn test_prefix_and_sanitising() {
        let mut topology = SheetTopology::new("main", None, 3, "x_");
        let name = topology.sub_sheet_for("", "a:b", None).unwrap();
        assert_eq!(name, "x_a_b");
    }

    #[test]
    fn test_title_bijection() {
        let mut sheet = Sheet::new("main", None);
        sheet.set_title("id", "Identifier").unwrap();
        assert_eq!(sheet.set_title("other/id", "identifier"), Err("id".to_string()));
        assert_eq!(sheet.heading("id"), "Identifier");
        assert_eq!(sheet.heading("title"), "title");
        assert_eq!(sheet.path_for_heading("  IDENTIFIER "), Some("id"));
    }
}
