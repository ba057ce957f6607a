//! Rate-Limit Monitor & Metrics (design doc, component table in §2).
//!
//! Plain atomic counters, logged periodically by the driver/pipeline rather
//! than exported to an external system — this crawler has no metrics
//! Non-goal to honor (observability is ambient stack, carried regardless of
//! what the distilled spec's Non-goals exclude), but it also has no
//! dashboard to wire up, so a lightweight in-process struct is enough.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CrawlerMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limit_rotations: AtomicU64,
    duplicate_owners_in_page: AtomicU64,
    duplicate_repositories: AtomicU64,
    owners_fetched: AtomicU64,
    repositories_ingested: AtomicU64,
    windows_split: AtomicU64,
}

impl CrawlerMetrics {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_rotation(&self) {
        self.rate_limit_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_owner_in_page(&self) {
        self.duplicate_owners_in_page.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_repository(&self) {
        self.duplicate_repositories.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_owner_fetched(&self) {
        self.owners_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repositories_ingested(&self, n: u64) {
        self.repositories_ingested.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_window_split(&self) {
        self.windows_split.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn rate_limit_rotations(&self) -> u64 {
        self.rate_limit_rotations.load(Ordering::Relaxed)
    }

    pub fn duplicate_owners_in_page(&self) -> u64 {
        self.duplicate_owners_in_page.load(Ordering::Relaxed)
    }

    pub fn repositories_ingested(&self) -> u64 {
        self.repositories_ingested.load(Ordering::Relaxed)
    }

    pub fn duplicate_repositories(&self) -> u64 {
        self.duplicate_repositories.load(Ordering::Relaxed)
    }

    pub fn windows_split(&self) -> u64 {
        self.windows_split.load(Ordering::Relaxed)
    }

    /// Emits a single structured `INFO` progress line, matching the
    /// "every 100 repositories" cadence from design doc §7.
    pub fn log_progress(&self) {
        tracing::info!(
            repositories_ingested = self.repositories_ingested(),
            owners_fetched = self.owners_fetched.load(Ordering::Relaxed),
            cache_hits = self.cache_hits(),
            cache_misses = self.cache_misses(),
            rate_limit_rotations = self.rate_limit_rotations(),
            "progress"
        );
    }
}
