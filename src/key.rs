//! Resource identity and the store keys derived from it.
//!
//! Every lookup resolves to a [`ResourceKey`] first. The result entry, the
//! advisory lock and the staged raw body all hang off the same identity, so
//! two call paths asking for the same instrument always meet on the same keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuoteError;

/// Board used for shares when the caller does not name one.
pub const DEFAULT_SHARE_BOARD: &str = "TQBR";

/// Pseudo-board for spot price feeds, which have no market board of their own.
pub const SPOT_BOARD: &str = "SPOT";

const RESULT_PREFIX: &str = "quote";
const LOCK_PREFIX: &str = "lock";
const STAGING_PREFIX: &str = "raw";

/// Namespace of instruments sharing one URL layout and one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Share,
    Bond,
    Crypto,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Share => "share",
            Self::Bond => "bond",
            Self::Crypto => "crypto",
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Share, Self::Bond, Self::Crypto]
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = QuoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "share" | "shares" => Ok(Self::Share),
            "bond" | "bonds" => Ok(Self::Bond),
            "crypto" => Ok(Self::Crypto),
            _ => Err(QuoteError::UnknownResourceClass(s.to_owned())),
        }
    }
}

/// Fully resolved identity of one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    class: ResourceClass,
    board: String,
    instrument: String,
}

impl ResourceKey {
    /// Resolve a resource identity, applying the per-class board rules.
    ///
    /// Shares fall back to [`DEFAULT_SHARE_BOARD`], bonds have no sensible
    /// default and require a board, and crypto ignores the board entirely.
    pub fn new(
        class: ResourceClass,
        board: Option<&str>,
        instrument: &str,
    ) -> Result<Self, QuoteError> {
        let instrument = normalize(instrument);
        if instrument.is_empty() {
            return Err(QuoteError::MissingParameter("instrument"));
        }

        let board = board.map(normalize).filter(|b| !b.is_empty());
        let board = match class {
            ResourceClass::Share => board.unwrap_or_else(|| DEFAULT_SHARE_BOARD.to_owned()),
            ResourceClass::Bond => board.ok_or(QuoteError::MissingParameter("board"))?,
            ResourceClass::Crypto => SPOT_BOARD.to_owned(),
        };

        Ok(Self {
            class,
            board,
            instrument,
        })
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Key of the parsed result entry.
    pub fn result_key(&self) -> String {
        self.namespaced(RESULT_PREFIX)
    }

    /// Key of the advisory lock marker.
    pub fn lock_key(&self) -> String {
        self.namespaced(LOCK_PREFIX)
    }

    /// Key of the staged raw upstream body.
    pub fn staging_key(&self) -> String {
        self.namespaced(STAGING_PREFIX)
    }

    fn namespaced(&self, prefix: &str) -> String {
        format!("{prefix}:{}:{}:{}", self.class, self.board, self.instrument)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class, self.board, self.instrument)
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}
