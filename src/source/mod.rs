//! Per-class upstream layouts: where to fetch a resource and how to read it.
//!
//! Fetching itself is shared (see [`crate::fetch`]); a source only builds the
//! URL and owns the schema, so every class rides the same coalescing path.

mod crypto;
mod moex;

pub use crypto::CryptoSpotSource;
pub use moex::{BondSource, ShareSource};

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::error::QuoteError;
use crate::key::{ResourceClass, ResourceKey};
use crate::parse::{ParseError, Record, Schema, parse_payload};

pub trait DataSource: Send + Sync {
    fn class(&self) -> ResourceClass;

    fn build_url(&self, key: &ResourceKey) -> Result<Url, url::ParseError>;

    fn schema(&self) -> &Schema;

    /// Turn a raw upstream body into a record. Columnar JSON by default.
    fn parse(&self, raw: &str, key: &ResourceKey) -> Result<Record, ParseError> {
        let payload = parse_payload(raw)?;
        let fields = self.schema().normalize(&payload)?;
        Ok(Record::new(key, fields))
    }
}

/// Data sources by resource class.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<ResourceClass, Arc<dyn DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares, bonds and crypto spot prices against the given upstream roots.
    pub fn standard(iss_base: Url, crypto_base: Url) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShareSource::new(iss_base.clone())));
        registry.register(Arc::new(BondSource::new(iss_base)));
        registry.register(Arc::new(CryptoSpotSource::new(crypto_base)));
        registry
    }

    /// Register a source, replacing any previous one for the same class.
    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        self.sources.insert(source.class(), source);
    }

    pub fn get(&self, class: ResourceClass) -> Result<&Arc<dyn DataSource>, QuoteError> {
        self.sources.get(&class).ok_or(QuoteError::NoSource(class))
    }
}

/// Append path segments to a base URL, keeping any path the base already has.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
