//! Schema graph and the walker that derives a [`SheetTopology`] from it
//!
//! [`SchemaNode::from_json`] resolves local `$ref` pointers once and produces
//! an immutable tree. [`SchemaParser`] walks that tree: scalars and nested
//! objects become columns on the current sheet, arrays of scalars become one
//! joined column, and arrays of objects open (or reuse) a sub-sheet whose
//! rows carry every ancestor identifier.

use super::coerce::FieldType;
use super::path::{join, strip_indices, with_hint};
use super::sheet::SheetTopology;
use crate::config::{RollUp, SchemaOptions};
use crate::diagnostics::{Diagnostic, DiagnosticContext, DiagnosticKind, DiagnosticSink};
use crate::error::{FlattenError, FlattenResult};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
    Date,
}

impl ScalarKind {
    pub fn field_type(self) -> FieldType {
        match self {
            ScalarKind::String => FieldType::String,
            ScalarKind::Number => FieldType::Number,
            ScalarKind::Integer => FieldType::Integer,
            ScalarKind::Boolean => FieldType::Boolean,
            ScalarKind::Date => FieldType::Date,
        }
    }

    pub fn array_field_type(self) -> FieldType {
        match self {
            ScalarKind::Number => FieldType::NumberArray,
            ScalarKind::Integer => FieldType::IntegerArray,
            ScalarKind::Boolean => FieldType::BooleanArray,
            ScalarKind::String | ScalarKind::Date => FieldType::StringArray,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scalar(ScalarKind),
    Object(IndexMap<String, SchemaNode>),
    ScalarArray(ScalarKind),
    NestedScalarArray(ScalarKind),
    ObjectArray {
        item: Box<SchemaNode>,
        roll_up: Vec<String>,
        reference: Option<String>,
    },
    /// Types the walker cannot map; carries a description for the diagnostic
    Unsupported(String),
}

/// One node of a fully dereferenced schema
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub title: Option<String>,
    pub deprecated: bool,
    pub kind: NodeKind,
}

impl SchemaNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            title: None,
            deprecated: false,
            kind,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn properties(&self) -> Option<&IndexMap<String, SchemaNode>> {
        match &self.kind {
            NodeKind::Object(properties) => Some(properties),
            _ => None,
        }
    }

    /// Build the node graph for a JSON Schema document, resolving local refs
    pub fn from_json(root: &Value, diagnostics: &mut dyn DiagnosticSink) -> FlattenResult<Self> {
        let mut resolver = Resolver {
            root,
            stack: Vec::new(),
            diagnostics,
        };
        resolver.build(root)
    }

    /// Follow a relative field path (`value/amount`) through object properties
    fn descend(&self, path: &str) -> Option<&SchemaNode> {
        let mut node = self;
        for part in path.split('/') {
            node = node.properties()?.get(part)?;
        }
        Some(node)
    }

    fn field_type(&self) -> Option<FieldType> {
        match &self.kind {
            NodeKind::Scalar(k) => Some(k.field_type()),
            NodeKind::ScalarArray(k) => Some(k.array_field_type()),
            NodeKind::NestedScalarArray(_) => Some(FieldType::ArrayArray),
            NodeKind::Object(_) => Some(FieldType::Object),
            NodeKind::ObjectArray { .. } => Some(FieldType::ObjectArray),
            NodeKind::Unsupported(_) => None,
        }
    }
}

struct Resolver<'a, 'd> {
    root: &'a Value,
    stack: Vec<String>,
    diagnostics: &'d mut dyn DiagnosticSink,
}

impl<'a, 'd> Resolver<'a, 'd> {
    /// Resolve `value` if it is a `$ref`, returning the target and its pointer
    fn deref(&self, value: &'a Value) -> FlattenResult<(&'a Value, Option<String>)> {
        match value.get("$ref").and_then(Value::as_str) {
            None => Ok((value, None)),
            Some(reference) => {
                let pointer = reference.strip_prefix('#').ok_or_else(|| {
                    FlattenError::Schema(format!(
                        "Only local references are supported, found '{}'",
                        reference
                    ))
                })?;
                let target = self.root.pointer(pointer).ok_or_else(|| {
                    FlattenError::Schema(format!("Unresolvable reference '{}'", reference))
                })?;
                Ok((target, Some(reference.to_string())))
            }
        }
    }

    fn build(&mut self, value: &'a Value) -> FlattenResult<SchemaNode> {
        let (target, reference) = self.deref(value)?;

        if let Some(reference) = &reference {
            if self.stack.contains(reference) {
                self.diagnostics.report(
                    Diagnostic::new(
                        DiagnosticKind::RecursiveSchema,
                        format!("Reference '{}' refers to itself, the nested copy was skipped.", reference),
                    )
                    .with_context(DiagnosticContext::new().with_field(reference.clone())),
                );
                return Ok(SchemaNode::new(NodeKind::Unsupported(format!(
                    "recursive reference {}",
                    reference
                ))));
            }
            self.stack.push(reference.clone());
        }

        let node = self.build_resolved(target);

        if reference.is_some() {
            self.stack.pop();
        }

        let mut node = node?;
        // Keywords next to a $ref override the referenced definition
        if let Some(title) = value.get("title").and_then(Value::as_str) {
            node.title = Some(title.to_string());
        }
        if value.get("deprecated").is_some() {
            node.deprecated = is_deprecated(value);
        }
        Ok(node)
    }

    fn build_resolved(&mut self, value: &'a Value) -> FlattenResult<SchemaNode> {
        let types = type_set(value);
        let has = |t: &str| types.iter().any(|x| x == t);

        let kind = if has("object") || (types.is_empty() && value.get("properties").is_some()) {
            let mut properties = IndexMap::new();
            if let Some(map) = value.get("properties").and_then(Value::as_object) {
                for (name, property) in map {
                    properties.insert(name.clone(), self.build(property)?);
                }
            }
            NodeKind::Object(properties)
        } else if has("array") || (types.is_empty() && value.get("items").is_some()) {
            self.build_array(value)?
        } else if has("string") {
            match value.get("format").and_then(Value::as_str) {
                Some("date") => NodeKind::Scalar(ScalarKind::Date),
                _ => NodeKind::Scalar(ScalarKind::String),
            }
        } else if has("number") {
            NodeKind::Scalar(ScalarKind::Number)
        } else if has("integer") {
            NodeKind::Scalar(ScalarKind::Integer)
        } else if has("boolean") {
            NodeKind::Scalar(ScalarKind::Boolean)
        } else if types.is_empty() {
            NodeKind::Unsupported("no type".to_string())
        } else {
            NodeKind::Unsupported(types.join(", "))
        };

        Ok(SchemaNode {
            title: value.get("title").and_then(Value::as_str).map(str::to_string),
            deprecated: is_deprecated(value),
            kind,
        })
    }

    fn build_array(&mut self, value: &'a Value) -> FlattenResult<NodeKind> {
        let Some(items) = value.get("items") else {
            return Ok(NodeKind::ScalarArray(ScalarKind::String));
        };
        let (items_target, reference) = self.deref(items)?;
        let roll_up = roll_up_fields(items)
            .or_else(|| roll_up_fields(items_target))
            .unwrap_or_default();

        if let Some(alternatives) = items_target.get("oneOf").and_then(Value::as_array) {
            let mut merged = IndexMap::new();
            for alternative in alternatives {
                let node = self.build(alternative)?;
                if let NodeKind::Object(properties) = node.kind {
                    for (name, property) in properties {
                        merged.entry(name).or_insert(property);
                    }
                }
            }
            if !merged.is_empty() {
                return Ok(NodeKind::ObjectArray {
                    item: Box::new(SchemaNode::new(NodeKind::Object(merged))),
                    roll_up,
                    reference: None,
                });
            }
        }

        let item = self.build(items)?;
        Ok(match item.kind {
            NodeKind::Scalar(k) => NodeKind::ScalarArray(k),
            NodeKind::ScalarArray(k) => NodeKind::NestedScalarArray(k),
            NodeKind::Object(_) => NodeKind::ObjectArray {
                item: Box::new(item),
                roll_up,
                reference,
            },
            NodeKind::Unsupported(desc) if desc == "no type" => {
                NodeKind::ScalarArray(ScalarKind::String)
            }
            NodeKind::Unsupported(desc) => NodeKind::Unsupported(format!("array of {}", desc)),
            NodeKind::NestedScalarArray(_) | NodeKind::ObjectArray { .. } => {
                NodeKind::Unsupported("array of arrays of objects".to_string())
            }
        })
    }
}

fn type_set(value: &Value) -> Vec<String> {
    match value.get("type") {
        Some(Value::String(t)) => vec![t.clone()],
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn is_deprecated(value: &Value) -> bool {
    match value.get("deprecated") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn roll_up_fields(value: &Value) -> Option<Vec<String>> {
    value.get("rollUp").and_then(Value::as_array).map(|fields| {
        fields
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

//==============================================================================
// Schema Model Builder
//==============================================================================

/// Title chain along the walk; `Untitled` once any ancestor lacks a title
#[derive(Debug, Clone)]
enum TitleChain {
    Root,
    Titled(String),
    Untitled,
}

impl TitleChain {
    fn child(&self, title: Option<&str>) -> TitleChain {
        match (self, title) {
            (TitleChain::Root, Some(t)) => TitleChain::Titled(t.to_string()),
            (TitleChain::Titled(parent), Some(t)) => TitleChain::Titled(format!("{}:{}", parent, t)),
            _ => TitleChain::Untitled,
        }
    }

    fn title(&self) -> Option<&str> {
        match self {
            TitleChain::Titled(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct IdField {
    path: String,
    title: Option<String>,
}

/// Derives a [`SheetTopology`] from a [`SchemaNode`] tree
pub struct SchemaParser<'a> {
    options: &'a SchemaOptions,
}

impl<'a> SchemaParser<'a> {
    pub fn new(options: &'a SchemaOptions) -> Self {
        Self { options }
    }

    pub fn parse(
        &self,
        root: &SchemaNode,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> FlattenResult<SheetTopology> {
        let properties = root.properties().ok_or_else(|| {
            FlattenError::Schema("The root schema must describe an object".to_string())
        })?;

        let mut topology = SheetTopology::new(
            &self.options.main_sheet_name,
            self.options.root_id.clone(),
            self.options.truncation_length,
            &self.options.sheet_prefix,
        );
        let main = topology.main.name.clone();
        self.walk_object(
            &mut topology,
            diagnostics,
            &main,
            "",
            properties,
            &[],
            &TitleChain::Root,
        )?;

        if self.options.use_titles {
            self.title_root_id(&mut topology, diagnostics, properties);
        }

        info!(
            sheets = topology.sheet_count(),
            main_columns = topology.main.len(),
            "Derived sheet topology from schema"
        );
        Ok(topology)
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_object(
        &self,
        topology: &mut SheetTopology,
        diagnostics: &mut dyn DiagnosticSink,
        sheet: &str,
        parent: &str,
        properties: &IndexMap<String, SchemaNode>,
        parent_ids: &[IdField],
        titles: &TitleChain,
    ) -> FlattenResult<()> {
        let mut id_fields = parent_ids.to_vec();
        if let Some(id_node) = properties.get(&self.options.id_name) {
            id_fields.push(IdField {
                path: join(parent, &self.options.id_name),
                title: titles.child(id_node.title.as_deref()).title().map(str::to_string),
            });
        }

        for (name, property) in properties {
            if self.options.exclude_deprecated && property.deprecated {
                debug!(field = %join(parent, name), "Skipping deprecated field");
                continue;
            }

            let path = join(parent, name);
            let typed_path = strip_indices(&path);
            let chain = titles.child(property.title.as_deref());
            if let Some(field_type) = property.field_type() {
                topology.set_field_type(&typed_path, field_type);
            }

            match &property.kind {
                NodeKind::Scalar(_) | NodeKind::ScalarArray(_) | NodeKind::NestedScalarArray(_) => {
                    self.add_column(topology, diagnostics, sheet, &path, property, &chain);
                }
                NodeKind::Object(children) => {
                    self.walk_object(
                        topology,
                        diagnostics,
                        sheet,
                        &path,
                        children,
                        &id_fields,
                        &chain,
                    )?;
                }
                NodeKind::ObjectArray {
                    item,
                    roll_up,
                    reference,
                } => {
                    let sub_sheet = topology.sub_sheet_for(parent, name, reference.as_deref())?;
                    if let Some(target) = topology.sheet_mut(&sub_sheet) {
                        for id in &id_fields {
                            target.add_field(&id.path, true);
                            if self.options.use_titles {
                                if let Some(title) = &id.title {
                                    if let Err(existing) = target.set_title(&id.path, title) {
                                        report_title_clash(diagnostics, &sub_sheet, &id.path, title, &existing);
                                    }
                                }
                            }
                        }
                    }

                    let empty = IndexMap::new();
                    let item_properties = item.properties().unwrap_or(&empty);
                    let item_path = join(&path, "0");
                    self.walk_object(
                        topology,
                        diagnostics,
                        &sub_sheet,
                        &item_path,
                        item_properties,
                        &id_fields,
                        &chain,
                    )?;

                    self.roll_up(
                        topology,
                        diagnostics,
                        sheet,
                        &path,
                        &typed_path,
                        item,
                        roll_up,
                        &chain,
                    );
                }
                NodeKind::Unsupported(types) => {
                    diagnostics.report(
                        Diagnostic::new(
                            DiagnosticKind::UnsupportedSchemaType,
                            format!(
                                "Unrecognised types {} for property \"{}\" with context \"{}\", so this property has been ignored.",
                                types, name, parent
                            ),
                        )
                        .with_context(
                            DiagnosticContext::new()
                                .with_sheet(sheet)
                                .with_path(path.clone())
                                .with_field(name.clone()),
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    /// Copy the chosen item fields of an array into the parent sheet at `path/0/field`
    #[allow(clippy::too_many_arguments)]
    fn roll_up(
        &self,
        topology: &mut SheetTopology,
        diagnostics: &mut dyn DiagnosticSink,
        sheet: &str,
        path: &str,
        typed_path: &str,
        item: &SchemaNode,
        schema_roll_up: &[String],
        chain: &TitleChain,
    ) {
        let fields: Vec<String> = match &self.options.roll_up {
            RollUp::Disabled => return,
            RollUp::Schema => schema_roll_up.to_vec(),
            RollUp::Paths(paths) if paths.iter().any(|p| p == typed_path) => item
                .properties()
                .map(|properties| {
                    properties
                        .iter()
                        .filter(|(_, p)| p.field_type().is_some_and(|t| t.is_leaf()))
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default(),
            RollUp::Paths(_) => return,
        };

        for field in fields {
            let target = item.descend(&field).filter(|node| {
                node.field_type().is_some_and(|t| t.is_leaf())
                    && !(self.options.exclude_deprecated && node.deprecated)
            });
            match target {
                Some(node) => {
                    let mut field_chain = chain.clone();
                    let mut node_at = item;
                    for part in field.split('/') {
                        match node_at.properties().and_then(|p| p.get(part)) {
                            Some(next) => {
                                field_chain = field_chain.child(next.title.as_deref());
                                node_at = next;
                            }
                            None => field_chain = TitleChain::Untitled,
                        }
                    }
                    let column = join(&join(path, "0"), &field);
                    self.add_column(topology, diagnostics, sheet, &column, node, &field_chain);
                }
                None => diagnostics.report(
                    Diagnostic::new(
                        DiagnosticKind::MissingRollUpField,
                        format!("{}/0/{} is listed in rollUp but is not in the schema.", path, field),
                    )
                    .with_context(
                        DiagnosticContext::new()
                            .with_sheet(sheet)
                            .with_path(path.to_string())
                            .with_field(field.clone()),
                    ),
                ),
            }
        }
    }

    fn add_column(
        &self,
        topology: &mut SheetTopology,
        diagnostics: &mut dyn DiagnosticSink,
        sheet: &str,
        path: &str,
        node: &SchemaNode,
        chain: &TitleChain,
    ) {
        let column = match (self.options.type_hints, node.field_type()) {
            (true, Some(field_type)) => with_hint(path, field_type),
            _ => path.to_string(),
        };

        let Some(target) = topology.sheet_mut(sheet) else {
            return;
        };

        if !self.options.use_titles {
            target.add_field(&column, false);
            return;
        }

        match chain.title() {
            Some(title) => {
                target.add_field(&column, false);
                if let Err(existing) = target.set_title(&column, title) {
                    report_title_clash(diagnostics, sheet, &column, title, &existing);
                }
            }
            None => diagnostics.report(
                Diagnostic::new(
                    DiagnosticKind::MissingTitle,
                    format!("Field {} does not have a title, skipping it in sheet \"{}\".", column, sheet),
                )
                .with_context(DiagnosticContext::new().with_sheet(sheet).with_path(column.clone())),
            ),
        }
    }

    fn title_root_id(
        &self,
        topology: &mut SheetTopology,
        diagnostics: &mut dyn DiagnosticSink,
        properties: &IndexMap<String, SchemaNode>,
    ) {
        let Some(root_id) = self.options.root_id.clone() else {
            return;
        };
        let Some(title) = properties.get(&root_id).and_then(|n| n.title.clone()) else {
            return;
        };
        let names: Vec<String> = topology.sheets().map(|s| s.name.clone()).collect();
        for name in names {
            if let Some(sheet) = topology.sheet_mut(&name) {
                if let Err(existing) = sheet.set_title(&root_id, &title) {
                    report_title_clash(diagnostics, &name, &root_id, &title, &existing);
                }
            }
        }
    }
}

/// A title already bound to another column keeps `column` printed as its path
fn report_title_clash(diagnostics: &mut dyn DiagnosticSink, sheet: &str, column: &str, title: &str, existing: &str) {
    diagnostics.report(
        Diagnostic::new(
            DiagnosticKind::DuplicateTitle,
            format!(
                "Title \"{}\" of {} is already used by {} in sheet \"{}\", printing the path instead.",
                title, column, existing, sheet
            ),
        )
        .with_context(DiagnosticContext::new().with_sheet(sheet).with_path(column)),
    );
}

/// Load-and-walk convenience: JSON Schema document → topology
pub fn topology_from_schema(
    schema: &Value,
    options: &SchemaOptions,
    diagnostics: &mut dyn DiagnosticSink,
) -> FlattenResult<SheetTopology> {
    let root = SchemaNode::from_json(schema, diagnostics)?;
    SchemaParser::new(options).parse(&root, diagnostics)
}
