//! PostgreSQL type mapper
//!
//! Maps `test_decoding` values to [`TypedValue`]s using the textual type
//! name printed next to every column.
//!
//! Values that fail to parse under their declared type are kept as the raw
//! string. The one exception is JSON: an unparsable object becomes an empty
//! map.

use crate::common::TypedValue;
use crate::postgres::protocol::parser::ColumnValue;
use chrono::NaiveDateTime;

/// The unquoted marker `test_decoding` prints for SQL NULL.
pub const NULL_MARKER: &str = "null";

/// Printed in place of a TOASTed value that did not change.
pub const UNCHANGED_TOAST: &str = "unchanged-toast-datum";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// How a column's text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Boolean,
    Integer,
    Float,
    StringArray,
    Json,
    Timestamp,
    /// Anything else: passed through as a string
    Text,
}

impl TypeFamily {
    /// Classify a type name as printed by `test_decoding`.
    ///
    /// Reference: <https://www.postgresql.org/docs/current/datatype.html>
    pub fn of(type_name: &str) -> Self {
        match normalize_type_name(type_name).as_str() {
            "boolean" => Self::Boolean,

            "smallint" | "integer" | "bigint" | "smallserial" | "serial" | "bigserial"
            | "interval" => Self::Integer,

            "float" | "decimal" | "numeric" | "double precision" | "real" => Self::Float,

            "text[]" | "character varying[]" | "character[]" | "name[]" => Self::StringArray,

            "json" | "jsonb" => Self::Json,

            "timestamp without time zone" => Self::Timestamp,

            _ => Self::Text,
        }
    }
}

/// Drop type modifiers: `character varying(255)` becomes `character varying`,
/// `timestamp(3) without time zone` becomes `timestamp without time zone`.
pub fn normalize_type_name(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len());
    let mut depth = 0usize;
    for c in type_name.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Type a column value. The unquoted null marker yields [`TypedValue::Null`].
pub fn coerce_column(column: &ColumnValue) -> TypedValue {
    if column.is_null() {
        TypedValue::Null
    } else {
        coerce_value(&column.value, &column.type_name)
    }
}

/// Type a textual value whose quoting is unknown.
///
/// `"null"` is always treated as the null marker here.
pub fn coerce(value: &str, type_name: &str) -> TypedValue {
    if value == NULL_MARKER {
        TypedValue::Null
    } else {
        coerce_value(value, type_name)
    }
}

fn coerce_value(value: &str, type_name: &str) -> TypedValue {
    let raw = || TypedValue::String(value.to_string());

    match TypeFamily::of(type_name) {
        TypeFamily::Boolean => parse_bool(value).map(TypedValue::Bool).unwrap_or_else(raw),
        TypeFamily::Integer => value.parse().map(TypedValue::Int).unwrap_or_else(|_| raw()),
        TypeFamily::Float => value.parse().map(TypedValue::Float).unwrap_or_else(|_| raw()),
        TypeFamily::StringArray => TypedValue::StringArray(split_array(value)),
        TypeFamily::Json => TypedValue::Json(serde_json::from_str(value).unwrap_or_default()),
        TypeFamily::Timestamp => NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
            .map(TypedValue::Timestamp)
            .unwrap_or_else(|_| raw()),
        TypeFamily::Text => raw(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "t" | "TRUE" | "True" | "1" => Some(true),
        "false" | "f" | "FALSE" | "False" | "0" => Some(false),
        _ => None,
    }
}

/// Split `{a,b,c}` on commas. Quoting inside the literal is not interpreted,
/// so elements containing commas are split apart.
fn split_array(value: &str) -> Vec<String> {
    let inner = value
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(value);
    if inner.is_empty() {
        return Vec::new();
    }
    inner.split(',').map(str::to_string).collect()
}
