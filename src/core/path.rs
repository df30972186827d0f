//! Column address grammar shared by both directions
//!
//! A column key is `segment/segment/.../leaf[:hint]` where a segment is a
//! field name, an array index (`0`), or a field name with an array marker
//! (`items[]`). The optional `:hint` on the last segment names the leaf type
//! when no schema is available.

use super::coerce::FieldType;
use crate::error::{FlattenError, FlattenResult};
use std::fmt;

pub const SEPARATOR: char = '/';
const ARRAY_MARKER: &str = "[]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field { name: String, array: bool },
    Index(usize),
}

impl Segment {
    pub fn field(name: impl Into<String>) -> Self {
        Segment::Field {
            name: name.into(),
            array: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Field { name, .. } => Some(name),
            Segment::Index(_) => None,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Segment::Index(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field { name, array: false } => write!(f, "{}", name),
            Segment::Field { name, array: true } => write!(f, "{}{}", name, ARRAY_MARKER),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A parsed column key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    pub segments: Vec<Segment>,
    pub hint: Option<FieldType>,
}

impl ColumnPath {
    pub fn parse(text: &str) -> FlattenResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid(text, "empty path"));
        }

        let (body, hint) = split_hint(trimmed);
        let mut segments = Vec::new();
        for part in body.split(SEPARATOR) {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid(text, "empty segment"));
            }
            if part.chars().all(|c| c.is_ascii_digit()) {
                let index = part
                    .parse::<usize>()
                    .ok()
                    .filter(|i| i64::try_from(*i).is_ok())
                    .ok_or_else(|| invalid(text, "array index out of range"))?;
                segments.push(Segment::Index(index));
            } else if let Some(name) = part.strip_suffix(ARRAY_MARKER) {
                if name.is_empty() {
                    return Err(invalid(text, "array marker without a field name"));
                }
                segments.push(Segment::Field {
                    name: name.to_string(),
                    array: true,
                });
            } else {
                segments.push(Segment::field(part));
            }
        }

        Ok(Self { segments, hint })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first_name(&self) -> Option<&str> {
        self.segments.first().and_then(Segment::name)
    }

    pub fn last_name(&self) -> Option<&str> {
        self.segments.last().and_then(Segment::name)
    }

    /// Field names only, without indices or array markers
    pub fn deindexed(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::name)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// All segments except the last
    pub fn parent_segments(&self) -> &[Segment] {
        match self.segments.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// True when every segment of `prefix` equals the start of this path
    pub fn starts_with(&self, prefix: &[Segment]) -> bool {
        prefix.len() <= self.segments.len() && self.segments[..prefix.len()] == *prefix
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .segments
            .iter()
            .map(Segment::to_string)
            .collect::<Vec<_>>()
            .join("/");
        match self.hint {
            Some(hint) => match hint.hint_name() {
                Some(name) => write!(f, "{}:{}", body, name),
                None => write!(f, "{}", body),
            },
            None => write!(f, "{}", body),
        }
    }
}

fn invalid(path: &str, reason: &str) -> FlattenError {
    FlattenError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Split a trailing `:hint` off the last segment when it names a known type
fn split_hint(text: &str) -> (&str, Option<FieldType>) {
    let last_start = text.rfind(SEPARATOR).map_or(0, |i| i + 1);
    if let Some(colon) = text[last_start..].rfind(':') {
        let at = last_start + colon;
        if let Some(hint) = FieldType::from_hint(&text[at + 1..]) {
            return (&text[..at], Some(hint));
        }
    }
    (text, None)
}

/// `parent` + `/` + `key`, where an empty parent means the root
pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", parent, SEPARATOR, key)
    }
}

/// Remove numeric segments and array markers: `a/0/b[]/c` → `a/b/c`
pub fn strip_indices(path: &str) -> String {
    path.split(SEPARATOR)
        .filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.strip_suffix(ARRAY_MARKER).unwrap_or(s))
        .collect::<Vec<_>>()
        .join("/")
}

/// Everything before the last separator, or `""` at the root
pub fn parent_of(path: &str) -> &str {
    path.rfind(SEPARATOR).map_or("", |i| &path[..i])
}

/// Append a `:hint` suffix for types that need one
pub fn with_hint(path: &str, field_type: FieldType) -> String {
    match field_type.hint_name() {
        Some(name) if field_type != FieldType::String => format!("{}:{}", path, name),
        _ => path.to_string(),
    }
}
