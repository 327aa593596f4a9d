//! Moscow Exchange ISS board endpoints for shares and bonds.
//!
//! Both classes hit `engines/stock/markets/{market}/boards/{board}/securities/{id}.json`
//! with metadata off and only the tables and columns the schema reads.

use url::Url;

use super::{DataSource, join_segments};
use crate::key::{ResourceClass, ResourceKey};
use crate::parse::{Accept, FieldSpec, Schema};

const MARKETDATA: &str = "marketdata";
const SECURITIES: &str = "securities";
const MARKETDATA_YIELDS: &str = "marketdata_yields";

pub const SHARE_SCHEMA: Schema = Schema {
    tables: &[MARKETDATA, SECURITIES],
    fields: &[
        FieldSpec::present("lastPrice", &[(MARKETDATA, "LAST")]),
        FieldSpec::present("shortName", &[(SECURITIES, "SHORTNAME")]),
    ],
};

pub const BOND_SCHEMA: Schema = Schema {
    tables: &[MARKETDATA, SECURITIES, MARKETDATA_YIELDS],
    fields: &[
        // Bonds quote LCURRENTPRICE; LAST is empty until the first trade of the day.
        FieldSpec::chain(
            "lastPrice",
            Accept::Truthy,
            &[(MARKETDATA, "LCURRENTPRICE"), (MARKETDATA, "LAST")],
        )
        .or_default(0.0),
        FieldSpec::present("shortName", &[(SECURITIES, "SHORTNAME")]),
        FieldSpec::present("tickerName", &[(SECURITIES, "SECNAME")]),
        FieldSpec::present("lotValue", &[(SECURITIES, "LOTVALUE")]),
        FieldSpec::present("couponValue", &[(SECURITIES, "COUPONVALUE")]),
        FieldSpec::present("nextCoupon", &[(SECURITIES, "NEXTCOUPON")]),
        FieldSpec::present("nkd", &[(SECURITIES, "ACCRUEDINT")]),
        FieldSpec::present("matDate", &[(SECURITIES, "MATDATE")]),
        FieldSpec::present("couponPeriod", &[(SECURITIES, "COUPONPERIOD")]),
        FieldSpec::present("buybackPrice", &[(SECURITIES, "BUYBACKPRICE")]),
        FieldSpec::present("couponPercent", &[(SECURITIES, "COUPONPERCENT")]),
        FieldSpec::present("offerDate", &[(SECURITIES, "OFFERDATE")]),
        FieldSpec::present("duration", &[(MARKETDATA, "DURATION")]),
        FieldSpec::present("yieldToOffer", &[(MARKETDATA, "YIELDTOOFFER")]),
        FieldSpec::present("effectiveYield", &[(MARKETDATA_YIELDS, "EFFECTIVEYIELD")]),
    ],
};

/// Build an ISS board URL requesting exactly the columns `schema` reads.
fn iss_url(base: &Url, market: &str, schema: &Schema, key: &ResourceKey) -> Result<Url, url::ParseError> {
    let document = format!("{}.json", key.instrument());
    let mut url = join_segments(
        base,
        [
            "engines",
            "stock",
            "markets",
            market,
            "boards",
            key.board(),
            "securities",
            document.as_str(),
        ],
    )?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("iss.meta", "off");
        query.append_pair("iss.only", &schema.tables.join(","));
        for table in schema.tables {
            let columns = columns_for(schema, table);
            if !columns.is_empty() {
                query.append_pair(&format!("{table}.columns"), &columns.join(","));
            }
        }
    }

    Ok(url)
}

/// Distinct columns the schema reads from `table`, in first-use order.
fn columns_for(schema: &Schema, table: &str) -> Vec<&'static str> {
    let mut columns: Vec<&'static str> = Vec::new();
    for spec in schema.fields {
        for (t, column) in spec.candidates {
            if *t == table && !columns.contains(column) {
                columns.push(*column);
            }
        }
    }
    columns
}

pub struct ShareSource {
    base: Url,
}

impl ShareSource {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl DataSource for ShareSource {
    fn class(&self) -> ResourceClass {
        ResourceClass::Share
    }

    fn build_url(&self, key: &ResourceKey) -> Result<Url, url::ParseError> {
        iss_url(&self.base, "shares", &SHARE_SCHEMA, key)
    }

    fn schema(&self) -> &Schema {
        &SHARE_SCHEMA
    }
}

pub struct BondSource {
    base: Url,
}

impl BondSource {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

impl DataSource for BondSource {
    fn class(&self) -> ResourceClass {
        ResourceClass::Bond
    }

    fn build_url(&self, key: &ResourceKey) -> Result<Url, url::ParseError> {
        iss_url(&self.base, "bonds", &BOND_SCHEMA, key)
    }

    fn schema(&self) -> &Schema {
        &BOND_SCHEMA
    }
}
