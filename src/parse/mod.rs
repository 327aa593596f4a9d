//! Turning raw upstream bodies into flat typed records.
//!
//! Columnar payloads are a set of named tables, each an ordered list of
//! column names plus data rows. Only the first row is ever read: a record is
//! the current snapshot of an instrument, never a series.

mod json;
mod record;
mod schema;

pub use json::parse_json_with_context;
pub use record::{Fields, Record, Scalar};
pub use schema::{Accept, FieldSpec, Schema};

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("payload has no '{0}' table")]
    MissingTable(String),
    #[error("table '{0}' has no data rows")]
    EmptyTable(String),
    #[error("malformed payload {0}")]
    Malformed(String),
    #[error("expected a number, got '{0}'")]
    NotANumber(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
}

impl Table {
    /// Value of `column` in the first row, or `None` if the column is unknown,
    /// the row is short, or the value is null.
    pub fn lookup_column(&self, column: &str) -> Option<&serde_json::Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.data
            .first()?
            .get(index)
            .filter(|value| !value.is_null())
    }
}

/// A decoded columnar body, keyed by table name.
pub type Payload = HashMap<String, Table>;

/// Decode a columnar JSON body.
pub fn parse_payload(raw: &str) -> Result<Payload, ParseError> {
    parse_json_with_context(raw)
}

/// Decode a body that is nothing but a decimal number, as spot feeds return.
pub fn parse_plain_number(raw: &str) -> Result<f64, ParseError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ParseError::NotANumber(trimmed.chars().take(64).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        serde_json::from_value(json!({
            "columns": ["SECID", "LAST", "VALTODAY"],
            "data": [["SBER", 318.5, null], ["SBER", 1.0, 2.0]]
        }))
        .unwrap()
    }

    #[test]
    fn lookup_reads_first_row_only() {
        assert_eq!(table().lookup_column("LAST"), Some(&json!(318.5)));
    }

    #[test]
    fn lookup_unknown_column_is_absent() {
        assert_eq!(table().lookup_column("LCURRENTPRICE"), None);
    }

    #[test]
    fn lookup_null_is_absent() {
        assert_eq!(table().lookup_column("VALTODAY"), None);
    }

    #[test]
    fn lookup_on_empty_table_is_absent() {
        let empty = Table {
            columns: vec!["LAST".into()],
            data: vec![],
        };
        assert_eq!(empty.lookup_column("LAST"), None);
    }

    #[test]
    fn malformed_payload_names_the_failing_path() {
        let err = parse_payload(r#"{"marketdata": {"columns": "LAST"}}"#).unwrap_err();
        let detail = match err {
            ParseError::Malformed(detail) => detail,
            other => panic!("expected Malformed, got {other:?}"),
        };
        assert!(detail.contains("marketdata.columns"), "{detail}");
    }

    #[test]
    fn plain_number_parses_trimmed_body() {
        assert_eq!(parse_plain_number(" 64123.5\n").unwrap(), 64123.5);
    }

    #[test]
    fn plain_number_rejects_text() {
        assert!(matches!(
            parse_plain_number("Not Found"),
            Err(ParseError::NotANumber(s)) if s == "Not Found"
        ));
        assert!(parse_plain_number("NaN").is_err());
    }
}
