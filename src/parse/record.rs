use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::QuoteError;
use crate::key::{ResourceClass, ResourceKey};

/// A single field value. Dates travel as text, exactly as upstream sends them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
    /// Upstream had no value and the schema declares no default.
    Empty,
}

impl Scalar {
    /// Convert a JSON cell. Null means "absent", not an empty scalar.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => None,
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Number(if *b { 1.0 } else { 0.0 })),
            other => Some(Self::Text(other.to_string())),
        }
    }

    /// Zero, NaN, the empty string and `Empty` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Empty => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Empty => Ok(()),
        }
    }
}

/// Output fields in schema order.
pub type Fields = IndexMap<String, Scalar>;

/// Immutable snapshot of one resource as of `fetched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub class: ResourceClass,
    pub board: String,
    pub instrument: String,
    pub fetched_at: DateTime<Utc>,
    pub fields: Fields,
}

impl Record {
    pub fn new(key: &ResourceKey, fields: Fields) -> Self {
        Self {
            class: key.class(),
            board: key.board().to_owned(),
            instrument: key.instrument().to_owned(),
            fetched_at: Utc::now(),
            fields,
        }
    }

    /// Look up an output field, rejecting names the record does not carry.
    pub fn get(&self, field: &str) -> Result<&Scalar, QuoteError> {
        self.fields.get(field).ok_or_else(|| QuoteError::InvalidField {
            class: self.class,
            field: field.to_owned(),
        })
    }
}
