use clap::{Parser, Subcommand, ValueEnum};

use crate::key::ResourceClass;

/// Cached, coalesced MOEX and crypto quote lookups.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable, colored output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Pretty in debug builds, JSON in release builds.
fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

/// Identifies one resource.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Ticker or ISIN.
    pub instrument: String,

    #[arg(short, long, default_value = "share", value_parser = parse_class)]
    pub class: ResourceClass,

    /// Trading board; required for bonds.
    #[arg(short, long)]
    pub board: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the full normalized record as JSON.
    Get {
        #[command(flatten)]
        target: Target,
    },
    /// Print a single field.
    Field {
        #[command(flatten)]
        target: Target,
        /// Output field name, e.g. `lastPrice`.
        field: String,
    },
    /// Fire concurrent identical lookups and report how many reached upstream.
    Burst {
        #[command(flatten)]
        target: Target,
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

fn parse_class(s: &str) -> Result<ResourceClass, String> {
    s.parse().map_err(|e: crate::error::QuoteError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_command_parses_bond_target() {
        let args = Args::parse_from([
            "quotecache",
            "--tracing",
            "json",
            "field",
            "SU26248RMFS3",
            "--class",
            "bond",
            "--board",
            "TQOB",
            "couponValue",
        ]);
        assert_eq!(args.tracing, TracingFormat::Json);
        let Command::Field { target, field } = args.command else {
            panic!("expected field command");
        };
        assert_eq!(target.class, ResourceClass::Bond);
        assert_eq!(target.board.as_deref(), Some("TQOB"));
        assert_eq!(field, "couponValue");
    }

    #[test]
    fn class_defaults_to_share() {
        let args = Args::parse_from(["quotecache", "get", "sber"]);
        let Command::Get { target } = args.command else {
            panic!("expected get command");
        };
        assert_eq!(target.class, ResourceClass::Share);
        assert_eq!(target.board, None);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let result = Args::try_parse_from(["quotecache", "get", "sber", "--class", "fx"]);
        assert!(result.is_err());
    }

    #[test]
    fn burst_count_defaults() {
        let args = Args::parse_from(["quotecache", "burst", "btc", "-c", "crypto"]);
        let Command::Burst { target, count } = args.command else {
            panic!("expected burst command");
        };
        assert_eq!(count, 10);
        assert_eq!(target.class, ResourceClass::Crypto);
    }
}
