use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use quotecache::cli::{Args, Command, Target};
use quotecache::config::Config;
use quotecache::logging::setup_logging;
use quotecache::store::MemoryStore;
use quotecache::utils::fmt_duration;
use quotecache::{QuoteError, QuoteService, ResourceKey};
use tracing::{error, info};

/// How often the in-memory store drops expired entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        "starting quotecache"
    );

    match run(&config, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, command: Command) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let _janitor = store.spawn_purge(PURGE_INTERVAL);
    let service = config.build_service(Arc::new(store))?;

    match command {
        Command::Get { target } => {
            let key = resolve_key(&target)?;
            let record = service.get_record(&key).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to render record")?
            );
        }
        Command::Field { target, field } => {
            let value = service
                .get_field(
                    &target.instrument,
                    target.class,
                    target.board.as_deref(),
                    &field,
                )
                .await?;
            println!("{value}");
        }
        Command::Burst { target, count } => burst(&service, &target, count).await?,
    }

    Ok(())
}

fn resolve_key(target: &Target) -> Result<ResourceKey, QuoteError> {
    ResourceKey::new(target.class, target.board.as_deref(), &target.instrument)
}

/// Fire `count` identical lookups at once; a healthy run reaches upstream once.
async fn burst(service: &QuoteService, target: &Target, count: usize) -> anyhow::Result<()> {
    let key = resolve_key(target)?;
    let start = Instant::now();

    let results = join_all((0..count).map(|_| {
        let service = service.clone();
        let key = key.clone();
        async move { service.get_record(&key).await }
    }))
    .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
        error!(key = %key, error = %e, "burst lookup failed");
    }

    let stats = service.stats();
    info!(
        key = %key,
        callers = count,
        failed,
        upstream_fetches = stats.upstream_fetches,
        cache_hits = stats.cache_hits,
        waits = stats.waits,
        elapsed = fmt_duration(start.elapsed()),
        "burst complete"
    );
    println!(
        "{count} callers, {failed} failed, {} upstream fetch(es), {} cache hit(s) in {}",
        stats.upstream_fetches,
        stats.cache_hits,
        fmt_duration(start.elapsed())
    );

    anyhow::ensure!(failed == 0, "{failed} of {count} lookups failed");
    Ok(())
}
