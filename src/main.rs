use anyhow::Context;
use chrono::{NaiveTime, TimeZone, Utc};
use clap::Parser;
use ghcollector::cache::ResponseCache;
use ghcollector::config::{Cli, Command, CollectArgs, EnrichArgs, TimeRange};
use ghcollector::external::{OrphanCleanup, StoreOrphanCleanup};
use ghcollector::graphql::{EnrichmentBatcher, RepoRef};
use ghcollector::http_client::HttpClient;
use ghcollector::metrics::CrawlerMetrics;
use ghcollector::models::StarRange;
use ghcollector::owners::RepositoryPipeline;
use ghcollector::search::SearchDriver;
use ghcollector::store::{SqliteStore, Store};
use ghcollector::token_pool::TokenPool;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USER_AGENT: &str = concat!("ghcollector/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let app_config = ghcollector::config::AppConfig::from_env().context("failed to load configuration")?;

    if app_config.github_api_tokens.is_empty() {
        tracing::error!("no GitHub API tokens configured (set GITHUB_API_TOKEN or GITHUB_API_TOKENS)");
        std::process::exit(1);
    }

    let database_url = app_config.resolve_database_url(cli.db_path.as_deref());
    let cache_dir = cli.cache_dir.clone().unwrap_or_else(|| app_config.cache_dir.clone());

    let store = Arc::new(SqliteStore::connect(&database_url).await.context("failed to open store")?);
    let pool = Arc::new(TokenPool::new(app_config.github_api_tokens.clone())?);
    let cache = ResponseCache::new(&cache_dir);
    let metrics = Arc::new(CrawlerMetrics::default());
    let http = Arc::new(HttpClient::new(pool, cache, metrics.clone(), USER_AGENT)?);

    let result = tokio::select! {
        result = run_command(cli.command, http, store, metrics) => result,
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested, stopping after the current page/batch");
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "run failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_command(
    command: Command,
    http: Arc<HttpClient>,
    store: Arc<SqliteStore>,
    metrics: Arc<CrawlerMetrics>,
) -> anyhow::Result<()> {
    match command {
        Command::Collect(args) => run_collect(args, http, store, metrics).await,
        Command::Enrich(args) => run_enrich(args, http, store).await,
        Command::Cleanup => run_cleanup(store).await,
        Command::Export(args) => run_export(args, store).await,
    }
}

async fn run_collect(
    args: CollectArgs,
    http: Arc<HttpClient>,
    store: Arc<SqliteStore>,
    metrics: Arc<CrawlerMetrics>,
) -> anyhow::Result<()> {
    let (start, end) = resolve_time_range(&args)?;
    let star_range = resolve_star_range(&args);

    let pipeline = Arc::new(RepositoryPipeline::new(http.clone(), store, metrics.clone()).await?);
    let driver = SearchDriver::new(http, pipeline, metrics, "collection_state.json");

    let collected = driver.run(start, end, star_range, args.limit, args.resume).await?;
    tracing::info!(collected, "collection run finished");
    Ok(())
}

async fn run_enrich(args: EnrichArgs, http: Arc<HttpClient>, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let targets = if let Some(retry_path) = &args.retry_failed {
        load_retry_targets(retry_path).await?
    } else if args.force {
        store.all_repositories(i64::MAX).await?
    } else {
        store.repositories_missing_enrichment(i64::MAX).await?
    };

    let repo_refs: Vec<RepoRef> = targets
        .iter()
        .filter_map(|(_, full_name)| {
            let (owner, name) = full_name.split_once('/')?;
            Some(RepoRef { owner: owner.to_string(), name: name.to_string() })
        })
        .collect();

    tracing::info!(count = repo_refs.len(), dry_run = args.dry_run, "starting enrichment batch");

    let batcher = EnrichmentBatcher::new(http, store, "enrich_checkpoint.txt", args.batch_size)
        .with_dry_run(args.dry_run);
    let outcome = batcher.fetch_repo_stats(&repo_refs).await?;

    if args.dry_run {
        tracing::info!(mapped = outcome.deltas.len(), "dry run: no writes were made");
    }

    if !outcome.failed_batches.is_empty() {
        let date = Utc::now().date_naive();
        let path = format!("failed_repo_ids_{date}.txt");
        let body: String = outcome
            .failed_batches
            .iter()
            .flatten()
            .map(|r| format!("{}/{}\n", r.owner, r.name))
            .collect();
        tokio::fs::write(&path, body).await?;
        tracing::warn!(path, batches = outcome.failed_batches.len(), "some batches failed permanently");
    }

    tracing::info!(enriched = outcome.deltas.len(), "enrichment run finished");
    Ok(())
}

async fn load_retry_targets(path: &std::path::Path) -> anyhow::Result<Vec<(i64, String)>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|full_name| (0, full_name.to_string()))
        .collect())
}

async fn run_cleanup(store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let cleanup = StoreOrphanCleanup::new(store);
    let removed = cleanup.remove_orphaned_owners().await?;
    tracing::info!(removed, "orphan cleanup finished");
    Ok(())
}

async fn run_export(args: ghcollector::config::ExportArgs, _store: Arc<SqliteStore>) -> anyhow::Result<()> {
    tracing::warn!(dest = ?args.dest, "CSV export has no in-tree implementation; wire up a CsvExporter");
    Ok(())
}

fn resolve_time_range(args: &CollectArgs) -> anyhow::Result<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> {
    if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
        return Ok((to_utc_midnight(start), to_utc_midnight(end)));
    }

    let now = Utc::now();
    let start = match args.time_range {
        TimeRange::Week => now - chrono::Duration::weeks(1),
        TimeRange::Month => now - chrono::Duration::days(30),
        TimeRange::Year => now - chrono::Duration::days(365),
        TimeRange::Custom => {
            anyhow::bail!("--time-range custom requires both --start-date and --end-date")
        }
    };
    Ok((start, now))
}

fn to_utc_midnight(date: chrono::NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn resolve_star_range(args: &CollectArgs) -> StarRange {
    if let Some(min) = args.min_stars {
        return StarRange { min, max: None };
    }
    if let Some(range) = &args.star_range {
        if let [min, max] = range.as_slice() {
            return StarRange { min: *min, max: Some(*max) };
        }
    }
    StarRange { min: 100, max: None }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghcollector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to install Ctrl+C handler; graceful shutdown on Ctrl+C will not work");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; graceful shutdown on SIGTERM will not work");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
