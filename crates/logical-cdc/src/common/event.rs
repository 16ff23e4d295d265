//! Change event representation
//!
//! A [`ChangeEvent`] is one decoded row change for the watched table. Column
//! values are typed from the decoder's textual type names (see
//! [`crate::postgres::type_mapper`]).
//!
//! ## Operation field
//!
//! Every decoded event carries a synthetic `operate` column holding the
//! operation name, so consumers that only look at the column map still see
//! what happened:
//!
//! ```ignore
//! assert_eq!(event.columns["operate"], TypedValue::String("INSERT".into()));
//! ```

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Name of the synthetic column holding the operation name.
pub const OPERATION_FIELD: &str = "operate";

/// A typed column value.
///
/// `Null` is distinct from every empty or zero value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringArray(Vec<String>),
    Json(serde_json::Map<String, serde_json::Value>),
    Timestamp(NaiveDateTime),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Change operation, as named by the decoder.
///
/// The mapping between names and codes is a pure function; there is no
/// lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Operation {
    #[default]
    Unknown = 0,
    Begin = 1,
    Insert = 2,
    Delete = 3,
    Update = 4,
    Commit = 5,
}

impl Operation {
    /// All operations, in code order.
    pub const ALL: [Operation; 6] = [
        Operation::Unknown,
        Operation::Begin,
        Operation::Insert,
        Operation::Delete,
        Operation::Update,
        Operation::Commit,
    ];

    /// Classify a decoder keyword. Unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "BEGIN" => Self::Begin,
            "INSERT" => Self::Insert,
            "DELETE" => Self::Delete,
            "UPDATE" => Self::Update,
            "COMMIT" => Self::Commit,
            _ => Self::Unknown,
        }
    }

    /// Name used on the wire and in the synthetic operation column.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Begin => "BEGIN",
            Self::Insert => "INSERT",
            Self::Delete => "DELETE",
            Self::Update => "UPDATE",
            Self::Commit => "COMMIT",
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Out-of-range codes map to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Begin,
            2 => Self::Insert,
            3 => Self::Delete,
            4 => Self::Update,
            5 => Self::Commit,
            _ => Self::Unknown,
        }
    }

    /// Begin, commit and unknown events never enter a batch.
    pub fn is_control(&self) -> bool {
        !self.is_row_change()
    }

    pub fn is_row_change(&self) -> bool {
        matches!(self, Self::Insert | Self::Delete | Self::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded change for the watched table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub schema: String,
    pub table: String,
    /// New-tuple columns (or the only row image), plus the operation column
    pub columns: HashMap<String, TypedValue>,
    /// Old-tuple columns, present when the table's replica identity reports them
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub old_columns: HashMap<String, TypedValue>,
    /// Server send time of the carrying message (Unix epoch millis)
    pub timestamp: i64,
    /// WAL position of the carrying message
    pub position: u64,
    /// Reserved routing tag
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rule: String,
}

impl ChangeEvent {
    /// Column value by name.
    pub fn get(&self, column: &str) -> Option<&TypedValue> {
        self.columns.get(column)
    }

    /// Old-tuple column value by name.
    pub fn get_old(&self, column: &str) -> Option<&TypedValue> {
        self.old_columns.get(column)
    }

    /// Clear every field, keeping map allocations for reuse.
    pub fn reset(&mut self) {
        self.operation = Operation::Unknown;
        self.schema.clear();
        self.table.clear();
        self.columns.clear();
        self.old_columns.clear();
        self.timestamp = 0;
        self.position = 0;
        self.rule.clear();
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> crate::common::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
