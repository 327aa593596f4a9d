pub mod cli;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod fetch;
pub mod key;
pub mod lock;
pub mod logging;
pub mod parse;
pub mod source;
pub mod store;
pub mod utils;

pub use coalesce::{AbandonedLockPolicy, CoalesceConfig, QuoteService, ServiceStats};
pub use error::QuoteError;
pub use key::{ResourceClass, ResourceKey};
pub use parse::{Record, Scalar};
