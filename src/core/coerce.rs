//! Cell → JSON value conversion driven by an optional field type

use crate::types::CellValue;
use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Type of a de-indexed path, as declared by a schema or a column hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    StringArray,
    NumberArray,
    IntegerArray,
    BooleanArray,
    ArrayArray,
    Object,
    ObjectArray,
}

impl FieldType {
    /// Parse a `:hint` suffix
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "string" => Some(FieldType::String),
            "number" => Some(FieldType::Number),
            "integer" => Some(FieldType::Integer),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "array" => Some(FieldType::StringArray),
            _ => None,
        }
    }

    pub fn hint_name(&self) -> Option<&'static str> {
        match self {
            FieldType::String => Some("string"),
            FieldType::Number => Some("number"),
            FieldType::Integer => Some("integer"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Date => Some("date"),
            FieldType::StringArray
            | FieldType::NumberArray
            | FieldType::IntegerArray
            | FieldType::BooleanArray
            | FieldType::ArrayArray => Some("array"),
            FieldType::Object | FieldType::ObjectArray => None,
        }
    }

    /// Types stored in a single cell
    pub fn is_leaf(&self) -> bool {
        !matches!(self, FieldType::Object | FieldType::ObjectArray)
    }

    /// Name used in shape-mismatch messages
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Number => "a number",
            FieldType::Integer => "an integer",
            FieldType::Boolean => "a boolean",
            FieldType::Date => "a date",
            FieldType::StringArray
            | FieldType::NumberArray
            | FieldType::IntegerArray
            | FieldType::BooleanArray
            | FieldType::ArrayArray => "an array of values",
            FieldType::Object => "an object",
            FieldType::ObjectArray => "an array",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::StringArray => "string_array",
            FieldType::NumberArray => "number_array",
            FieldType::IntegerArray => "integer_array",
            FieldType::BooleanArray => "boolean_array",
            FieldType::ArrayArray => "array_array",
            FieldType::Object => "object",
            FieldType::ObjectArray => "array",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of converting one cell
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    /// Blank cell, nothing to store
    Empty,
    Value(Value),
    /// Conversion failed; the text is kept and `reason` should be reported
    Fallback { value: Value, reason: String },
}

impl Conversion {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Conversion::Empty => None,
            Conversion::Value(v) | Conversion::Fallback { value: v, .. } => Some(v),
        }
    }
}

/// Convert a raw cell to JSON using the field type when one is known
pub fn convert_type(
    field_type: Option<FieldType>,
    raw: &CellValue,
    timezone: &FixedOffset,
) -> Conversion {
    if raw.is_blank() {
        return Conversion::Empty;
    }

    match field_type {
        None => Conversion::Value(untyped(raw, timezone)),
        Some(FieldType::String) => Conversion::Value(Value::String(match raw {
            CellValue::DateTime(dt) => localize(dt, timezone),
            other => other.to_string(),
        })),
        Some(FieldType::Date) => Conversion::Value(Value::String(match raw {
            CellValue::DateTime(dt) => dt.date().format("%Y-%m-%d").to_string(),
            other => other.to_string(),
        })),
        Some(FieldType::Number) => match to_decimal(raw) {
            Some(d) => Conversion::Value(decimal_to_json(d)),
            None => fallback(
                raw,
                format!(
                    "Non-numeric value \"{}\" found in number column, returning as string instead.",
                    raw
                ),
            ),
        },
        Some(FieldType::Integer) => match to_integer(raw) {
            Some(i) => Conversion::Value(Value::from(i)),
            None => fallback(
                raw,
                format!(
                    "Non-integer value \"{}\" found in integer column, returning as string instead.",
                    raw
                ),
            ),
        },
        Some(FieldType::Boolean) => match to_bool(raw) {
            Some(b) => Conversion::Value(Value::Bool(b)),
            None => fallback(
                raw,
                format!(
                    "Unrecognised value for boolean: \"{}\", returning as string instead.",
                    raw
                ),
            ),
        },
        Some(
            kind @ (FieldType::NumberArray | FieldType::IntegerArray | FieldType::BooleanArray),
        ) => {
            let text = raw.to_string();
            match typed_array(kind, &text) {
                Some(value) => Conversion::Value(value),
                None => Conversion::Fallback {
                    value: string_array(&text),
                    reason: format!(
                        "Non-{} value \"{}\" found in {} column, returning as string array instead.",
                        element_name(kind),
                        text,
                        kind
                    ),
                },
            }
        }
        Some(FieldType::StringArray | FieldType::ArrayArray) => {
            Conversion::Value(string_array(&raw.to_string()))
        }
        Some(kind @ (FieldType::Object | FieldType::ObjectArray)) => fallback(
            raw,
            format!("A single cell cannot hold {}, returning as string instead.", kind.describe()),
        ),
    }
}

fn fallback(raw: &CellValue, reason: String) -> Conversion {
    Conversion::Fallback {
        value: Value::String(raw.to_string()),
        reason,
    }
}

/// Without a type: whole numbers stay numbers, everything else is text
fn untyped(raw: &CellValue, timezone: &FixedOffset) -> Value {
    match raw {
        CellValue::Integer(i) => Value::from(*i),
        CellValue::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(*f as i64),
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        CellValue::Decimal(d) => match d.fract().is_zero().then(|| d.to_i64()).flatten() {
            Some(i) => Value::from(i),
            None => decimal_to_json(*d),
        },
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::DateTime(dt) => Value::String(localize(dt, timezone)),
        other => Value::String(other.to_string()),
    }
}

fn localize(dt: &NaiveDateTime, timezone: &FixedOffset) -> String {
    match timezone.from_local_datetime(dt).single() {
        Some(zoned) => zoned.to_rfc3339(),
        None => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn to_decimal(raw: &CellValue) -> Option<Decimal> {
    match raw {
        CellValue::Integer(i) => Some(Decimal::from(*i)),
        CellValue::Float(f) => parse_decimal(&f.to_string()),
        CellValue::Decimal(d) => Some(*d),
        CellValue::String(s) => parse_decimal(s),
        CellValue::Bool(_) | CellValue::DateTime(_) | CellValue::Empty => None,
    }
}

fn to_integer(raw: &CellValue) -> Option<i64> {
    match raw {
        CellValue::Integer(i) => Some(*i),
        CellValue::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
        CellValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        CellValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn to_bool(raw: &CellValue) -> Option<bool> {
    if let CellValue::Bool(b) = raw {
        return Some(*b);
    }
    match raw.to_string().trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Decimal as a JSON number, keeping its written scale
pub fn decimal_to_json(d: Decimal) -> Value {
    let text = d.to_string();
    match text.parse::<serde_json::Number>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(text),
    }
}

/// `a;b` → `["a","b"]`, `a,b;c` → `[["a","b"],["c"]]`
fn string_array(text: &str) -> Value {
    if text.contains(',') {
        Value::Array(
            text.split(';')
                .map(|outer| {
                    Value::Array(
                        outer
                            .split(',')
                            .map(|inner| Value::String(inner.to_string()))
                            .collect(),
                    )
                })
                .collect(),
        )
    } else {
        Value::Array(text.split(';').map(|s| Value::String(s.to_string())).collect())
    }
}

fn element_name(kind: FieldType) -> &'static str {
    match kind {
        FieldType::IntegerArray => "integer",
        FieldType::BooleanArray => "boolean",
        _ => "numeric",
    }
}

fn typed_element(kind: FieldType, text: &str) -> Option<Value> {
    let raw = CellValue::String(text.to_string());
    match kind {
        FieldType::IntegerArray => to_integer(&raw).map(Value::from),
        FieldType::BooleanArray => to_bool(&raw).map(Value::Bool),
        _ => parse_decimal(text).map(decimal_to_json),
    }
}

fn typed_array(kind: FieldType, text: &str) -> Option<Value> {
    let parse_list = |list: &str, separator: char| -> Option<Vec<Value>> {
        list.split(separator)
            .map(|item| typed_element(kind, item))
            .collect()
    };

    if text.contains(',') {
        text.split(';')
            .map(|outer| parse_list(outer, ',').map(Value::Array))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array)
    } else {
        parse_list(text, ';').map(Value::Array)
    }
}
