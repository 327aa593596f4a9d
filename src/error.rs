//! Error types surfaced by the public query surface.

use std::time::Duration;

use crate::fetch::FetchError;
use crate::key::ResourceClass;
use crate::parse::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("unknown field '{field}' for {class} resources")]
    InvalidField { class: ResourceClass, field: String },
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("unknown resource class '{0}'")]
    UnknownResourceClass(String),
    #[error("no data source registered for {0} resources")]
    NoSource(ResourceClass),
    #[error("failed to build upstream URL")]
    InvalidUrl(#[from] url::ParseError),
    #[error("upstream unavailable")]
    UpstreamUnavailable(#[from] FetchError),
    #[error("failed to parse upstream payload")]
    Parse(#[from] ParseError),
    #[error("failed to encode record for the store")]
    Encode(#[from] serde_json::Error),
    #[error("gave up waiting for in-flight fetch of {key} after {iterations} polls")]
    CoalesceTimeout { key: String, iterations: u32 },
    #[error("lookup exceeded its {}s budget", .0.as_secs_f32())]
    Timeout(Duration),
}

impl QuoteError {
    /// Whether the error stems from caller input rather than upstream state.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidField { .. } | Self::MissingParameter(_) | Self::UnknownResourceClass(_)
        )
    }
}
