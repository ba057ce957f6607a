//! Token Pool & Rate-Limit Scheduler (design doc §4.1).
//!
//! Multiplexes N GitHub credentials under a single mutex. `acquire` is
//! non-blocking unless every credential is exhausted, in which case it polls
//! the earliest reset time every 30 seconds, logging the remaining wait.

use crate::error::PoolError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Per-hour request quota assumed until the first real rate-limit headers
/// are observed for a credential (GitHub's authenticated default).
const DEFAULT_QUOTA: i64 = 5000;
const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
struct CredentialState {
    token: String,
    remaining: i64,
    reset_time: DateTime<Utc>,
    last_used: DateTime<Utc>,
}

struct Inner {
    credentials: Vec<CredentialState>,
}

/// Shared-mutable pool of credentials. Cloning a `TokenPool` shares the same
/// underlying mutex (it wraps an `Arc` internally via `std::sync::Mutex` over
/// a `Vec`, cheap to clone because the struct only holds an `Arc`).
pub struct TokenPool {
    inner: Mutex<Inner>,
}

/// A leased credential. Callers pass `token()` on outgoing requests and must
/// call `TokenPool::update` afterwards with the rate-limit headers observed.
#[derive(Clone, Debug)]
pub struct Credential {
    pub token: String,
}

impl TokenPool {
    pub fn new(tokens: Vec<String>) -> Result<Self, PoolError> {
        if tokens.is_empty() {
            return Err(PoolError::PoolExhausted);
        }
        let now = Utc::now();
        let credentials = tokens
            .into_iter()
            .map(|token| CredentialState {
                token,
                remaining: DEFAULT_QUOTA,
                reset_time: now + chrono::Duration::hours(1),
                last_used: DateTime::<Utc>::UNIX_EPOCH,
            })
            .collect();
        Ok(Self {
            inner: Mutex::new(Inner { credentials }),
        })
    }

    /// Selects a credential: among those with `remaining > 0` (optimistically
    /// resetting any whose `reset_time` has passed), the one with the most
    /// remaining quota, ties broken by oldest `last_used`. If none have
    /// capacity, blocks until the earliest reset, polling every 30s.
    pub async fn acquire(&self) -> Credential {
        loop {
            let now = Utc::now();
            let mut earliest_reset: Option<DateTime<Utc>> = None;
            let chosen = {
                let mut guard = self.inner.lock().unwrap();
                for cred in guard.credentials.iter_mut() {
                    if now > cred.reset_time {
                        cred.remaining = DEFAULT_QUOTA;
                        cred.reset_time = now + chrono::Duration::hours(1);
                    }
                }
                let best = guard
                    .credentials
                    .iter()
                    .filter(|c| c.remaining > 0)
                    .min_by_key(|c| (std::cmp::Reverse(c.remaining), c.last_used))
                    .map(|c| c.token.clone());

                if best.is_none() {
                    earliest_reset = guard.credentials.iter().map(|c| c.reset_time).min();
                }

                if let Some(token) = &best {
                    if let Some(cred) = guard.credentials.iter_mut().find(|c| &c.token == token) {
                        cred.last_used = now;
                    }
                }
                best
            };

            if let Some(token) = chosen {
                return Credential { token };
            }

            let reset_at = earliest_reset.unwrap_or(now);
            let wait = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
            tracing::warn!(wait_seconds = wait.as_secs(), "all credentials exhausted, waiting for reset");
            let mut remaining_wait = wait;
            while remaining_wait > Duration::ZERO {
                let step = remaining_wait.min(POLL_INTERVAL);
                sleep(step).await;
                remaining_wait = remaining_wait.saturating_sub(step);
                if remaining_wait > Duration::ZERO {
                    tracing::info!(remaining_seconds = remaining_wait.as_secs(), "still waiting for rate-limit reset");
                }
            }
        }
    }

    /// Updates the remaining/reset bookkeeping for a credential after a
    /// response, from the `X-RateLimit-Remaining` / `X-RateLimit-Reset`
    /// headers.
    pub fn update(&self, token: &str, remaining: i64, reset_time: DateTime<Utc>) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(cred) = guard.credentials.iter_mut().find(|c| c.token == token) {
            cred.remaining = remaining;
            cred.reset_time = reset_time;
        }
    }

    #[cfg(test)]
    fn remaining(&self, token: &str) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .iter()
            .find(|c| c.token == token)
            .map(|c| c.remaining)
    }
}
