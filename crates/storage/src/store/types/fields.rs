#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub const BINARY_PREFIX: &str = "base64:";

/// A field value after coercion to its declared type.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    /// `YYYY-MM-DD`
    Date(String),
    /// `HH:MM:SS`
    Time(String),
    /// RFC3339, normalized to UTC.
    Timestamp(String),
    Uuid(String),
    Binary(Vec<u8>),
    List(Vec<String>),
    ObjectList(Vec<Map<String, Value>>),
    RowReference(String),
}

impl FieldValue {
    /// Canonical stored form. Coercing it again yields the same value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(value)
            | Self::Date(value)
            | Self::Time(value)
            | Self::Timestamp(value)
            | Self::Uuid(value)
            | Self::RowReference(value) => Value::String(value.clone()),
            Self::Number(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Integer(value) => Value::from(*value),
            Self::Boolean(value) => Value::Bool(*value),
            Self::Binary(bytes) => {
                Value::String(format!("{BINARY_PREFIX}{}", STANDARD.encode(bytes)))
            }
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
            Self::ObjectList(items) => {
                Value::Array(items.iter().cloned().map(Value::Object).collect())
            }
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
