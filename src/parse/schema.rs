//! Declarative field schemas with fallback chains.

use super::record::{Fields, Scalar};
use super::{ParseError, Payload};

/// Which candidate values a field is willing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Any non-null value, including a legitimate zero.
    Present,
    /// Skip zero and empty values, moving on to the next candidate.
    Truthy,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// `(table, column)` pairs, tried in order.
    pub candidates: &'static [(&'static str, &'static str)],
    pub accept: Accept,
    /// Substituted only when no candidate yields anything.
    pub default: Option<f64>,
}

impl FieldSpec {
    /// A field taking the first non-null candidate.
    pub const fn present(
        name: &'static str,
        candidates: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self::chain(name, Accept::Present, candidates)
    }

    pub const fn chain(
        name: &'static str,
        accept: Accept,
        candidates: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            candidates,
            accept,
            default: None,
        }
    }

    pub const fn or_default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }

    fn resolve(&self, payload: &Payload) -> Scalar {
        let mut first_present = None;
        for (table, column) in self.candidates {
            let Some(value) = payload
                .get(*table)
                .and_then(|t| t.lookup_column(column))
                .and_then(Scalar::from_json)
            else {
                continue;
            };

            let accepted = match self.accept {
                Accept::Present => true,
                Accept::Truthy => value.is_truthy(),
            };
            if accepted {
                return value;
            }
            first_present.get_or_insert(value);
        }

        match self.default {
            Some(default) => Scalar::Number(default),
            None => first_present.unwrap_or(Scalar::Empty),
        }
    }
}

/// Output fields of one resource class and the tables they come from.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    /// Tables that must exist with at least one row.
    pub tables: &'static [&'static str],
    pub fields: &'static [FieldSpec],
}

impl Schema {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Extract every field from a decoded payload.
    pub fn normalize(&self, payload: &Payload) -> Result<Fields, ParseError> {
        for table in self.tables {
            let t = payload
                .get(*table)
                .ok_or_else(|| ParseError::MissingTable((*table).to_owned()))?;
            if t.data.is_empty() {
                return Err(ParseError::EmptyTable((*table).to_owned()));
            }
        }

        Ok(self
            .fields
            .iter()
            .map(|spec| (spec.name.to_owned(), spec.resolve(payload)))
            .collect())
    }
}
