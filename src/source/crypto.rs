//! Plain-text spot price feed: `GET {base}/{TICKER}` answers with a bare number.

use url::Url;

use super::{DataSource, join_segments};
use crate::key::{ResourceClass, ResourceKey};
use crate::parse::{FieldSpec, Fields, ParseError, Record, Scalar, Schema, parse_plain_number};

const LAST_PRICE: &str = "lastPrice";

pub const CRYPTO_SCHEMA: Schema = Schema {
    tables: &[],
    fields: &[FieldSpec::present(LAST_PRICE, &[])],
};

pub struct CryptoSpotSource {
    base: Url,
}

impl CryptoSpotSource {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl DataSource for CryptoSpotSource {
    fn class(&self) -> ResourceClass {
        ResourceClass::Crypto
    }

    fn build_url(&self, key: &ResourceKey) -> Result<Url, url::ParseError> {
        join_segments(&self.base, [key.instrument()])
    }

    fn schema(&self) -> &Schema {
        &CRYPTO_SCHEMA
    }

    fn parse(&self, raw: &str, key: &ResourceKey) -> Result<Record, ParseError> {
        let price = parse_plain_number(raw)?;
        let mut fields = Fields::new();
        fields.insert(LAST_PRICE.to_owned(), Scalar::Number(price));
        Ok(Record::new(key, fields))
    }
}
