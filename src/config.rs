//! Application configuration: environment variables, `.env` loading, and the
//! `clap`-derived CLI surface. CLI flags take precedence over environment
//! variables, which take precedence over built-in defaults.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// Configuration loaded from the process environment (`envy`), with sensible
/// defaults matching the documented CLI defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// `GITHUB_API_TOKEN` or `GITHUB_API_TOKENS` (comma-separated).
    #[serde(default, deserialize_with = "deserialize_tokens")]
    pub github_api_tokens: Vec<String>,

    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_min_stars")]
    pub min_stars: i64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_max_concurrent_owner_fetches")]
    pub max_concurrent_owner_fetches: usize,
}

fn default_cache_dir() -> String {
    ".github_cache".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_min_stars() -> i64 {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_max_concurrent_owner_fetches() -> usize {
    10
}

fn deserialize_tokens<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(parse_tokens(s.as_deref().unwrap_or_default()))
}

fn parse_tokens(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Loads configuration from the environment. `GITHUB_API_TOKEN` (single)
    /// and `GITHUB_API_TOKENS` (comma-separated) are merged into one list.
    pub fn from_env() -> Result<Self, envy::Error> {
        let mut config: AppConfig = envy::from_env()?;

        if config.github_api_tokens.is_empty() {
            if let Ok(single) = std::env::var("GITHUB_API_TOKEN") {
                config.github_api_tokens = parse_tokens(&single);
            }
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(24 * 60 * 60)
    }

    /// Resolved database URL, honoring `--db-path` > `DATABASE_URL` > the
    /// documented default SQLite path.
    pub fn resolve_database_url(&self, cli_db_path: Option<&str>) -> String {
        if let Some(path) = cli_db_path {
            return to_sqlite_url(path);
        }
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        to_sqlite_url("data/github_data.db")
    }
}

fn to_sqlite_url(path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    }
}

/// Top-level CLI surface. The core crawler exposes `collect` and `enrich`;
/// `cleanup` and `export` are thin shells around the external collaborators
/// described in `crate::external`.
#[derive(Parser, Debug)]
#[command(name = "ghcollector", about = "Resumable GitHub repository crawler")]
pub struct Cli {
    /// Database URL or path. Falls back to `DATABASE_URL`, then the default
    /// SQLite path under `data/`.
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Directory for the on-disk HTTP response cache.
    #[arg(long, global = true, env = "CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Disable interactive confirmation prompts.
    #[arg(long, global = true)]
    pub non_interactive: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover repositories matching a star/date filter and persist them.
    Collect(CollectArgs),
    /// Enrich already-collected repositories with GraphQL aggregate counts.
    Enrich(EnrichArgs),
    /// Remove owners with zero referencing repositories.
    Cleanup,
    /// Export store tables to CSV.
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    #[arg(long, value_enum, default_value_t = TimeRange::Month)]
    pub time_range: TimeRange,

    #[arg(long)]
    pub start_date: Option<chrono::NaiveDate>,

    #[arg(long)]
    pub end_date: Option<chrono::NaiveDate>,

    #[arg(long, conflicts_with = "star_range")]
    pub min_stars: Option<i64>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], conflicts_with = "min_stars")]
    pub star_range: Option<Vec<i64>>,

    /// Cap on the number of repositories collected in this run.
    #[arg(long)]
    pub limit: Option<u64>,

    /// Resume from the on-disk collection state if present (default true).
    #[arg(long, default_value_t = true)]
    pub resume: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum TimeRange {
    Week,
    Month,
    Year,
    Custom,
}

#[derive(Args, Debug, Clone)]
pub struct EnrichArgs {
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    #[arg(long)]
    pub dry_run: bool,

    /// Re-enrich every repository, ignoring already-populated aggregates.
    #[arg(long)]
    pub force: bool,

    /// Path to a `failed_repo_ids_*.txt` file; only these ids are retried.
    #[arg(long)]
    pub retry_failed: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, default_value = "export")]
    pub dest: PathBuf,
}
