//! Cell values and column types for session tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(ColumnType::String),
            "integer" => Some(ColumnType::Integer),
            "float" => Some(ColumnType::Float),
            "boolean" => Some(ColumnType::Boolean),
            "timestamp" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    /// Type a single JSON cell would infer to. `None` for null.
    pub fn of_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value as J;
        match value {
            J::Null => None,
            J::Bool(_) => Some(ColumnType::Boolean),
            J::Number(n) if n.is_i64() => Some(ColumnType::Integer),
            J::Number(_) => Some(ColumnType::Float),
            J::String(s) if DateTime::parse_from_rfc3339(s).is_ok() => Some(ColumnType::Timestamp),
            _ => Some(ColumnType::String),
        }
    }

    /// Smallest type able to hold values of both `self` and `other`.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Column type of this value, `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ColumnType::String),
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Convert a JSON cell into a value of the given column type.
    ///
    /// Cells that do not fit the column fall back to their JSON text when the
    /// column is a string column, and to null otherwise.
    pub fn from_json(value: &serde_json::Value, column_type: ColumnType) -> Value {
        use serde_json::Value as J;
        match (value, column_type) {
            (J::Null, _) => Value::Null,
            (J::String(s), ColumnType::String) => Value::String(s.clone()),
            (other, ColumnType::String) => Value::String(other.to_string()),
            (J::Number(n), ColumnType::Integer) => n.as_i64().map_or(Value::Null, Value::Integer),
            (J::Number(n), ColumnType::Float) => n.as_f64().map_or(Value::Null, Value::Float),
            (J::Bool(b), ColumnType::Boolean) => Value::Boolean(*b),
            (J::String(s), ColumnType::Timestamp) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Fit this value into a column of `column_type`, widening integers to
    /// floats. Returns `None` when the value does not belong in the column.
    pub fn coerce(self, column_type: ColumnType) -> Option<Value> {
        match (self, column_type) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(i), ColumnType::Float) => Some(Value::Float(i as f64)),
            (v, ty) if v.column_type() == Some(ty) => Some(v),
            _ => None,
        }
    }

    /// Plain JSON form, used for previews and graph properties.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::String(s) => J::String(s.clone()),
            Value::Integer(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::Boolean(b) => J::Bool(*b),
            Value::Timestamp(ts) => J::String(ts.to_rfc3339()),
        }
    }

    /// JSON form used inside natural keys.
    ///
    /// Integral floats are written as integers so that `1` and `1.0` resolve
    /// to the same node.
    pub fn key_json(&self) -> serde_json::Value {
        match self {
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                serde_json::Value::from(*f as i64)
            }
            other => other.to_json(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
