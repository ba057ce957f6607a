//! Typed error taxonomy for the crawler subsystems.
//!
//! Each subsystem boundary gets its own `thiserror` enum; callers that need a
//! single catch-all (the CLI entrypoint, mostly) convert into `anyhow::Error`
//! at the edge.

use thiserror::Error;

/// Errors raised by the HTTP client while talking to the GitHub REST or
/// GraphQL endpoints. Mirrors the taxonomy in the design doc: rate limiting
/// and transient failures are distinguished from the rest because callers
/// react to them differently (rotate credential, retry with backoff).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("rate limit exceeded for credential")]
    RateLimit,

    #[error("resource not found")]
    NotFound,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal HTTP error ({status}): {body}")]
    Fatal { status: u16, body: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Errors from the token pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no credentials configured")]
    PoolExhausted,
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("owner not found for repository {full_name}")]
    MissingOwner { full_name: String },
}

/// Errors from reading or writing the on-disk checkpoint files.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint file corrupt: {0}")]
    Corrupt(String),

    #[error("io error reading checkpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error reading checkpoint: {0}")]
    Json(#[from] serde_json::Error),
}
