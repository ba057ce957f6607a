//! Time-Sliced Search Driver with Adaptive Subdivision (design doc §4.3),
//! grounded on `RepositoryCollector._calculate_time_periods` /
//! `_adjust_period_size` / `_search_repositories_in_period` in
//! `repository_collector.py`. The GitHub Search API caps any single query at
//! 1000 results (10 pages of 100), so a window whose `total_count` exceeds
//! that is subdivided into `ceil(total / 1000) + 1` equal-duration
//! sub-windows rather than silently truncated.

use crate::checkpoint::{SearchState, SearchStateStore};
use crate::http_client::HttpClient;
use crate::metrics::CrawlerMetrics;
use crate::models::{RepositorySummary, StarRange, Window};
use crate::owners::RepositoryPipeline;
use crate::store::Store;
use chrono::{DateTime, Utc};
use reqwest::Method;
use std::sync::Arc;
use thiserror::Error;

/// Results per search page; GitHub's search endpoint maximum.
const PER_PAGE: u32 = 100;
/// Beyond this many matches, a window is split rather than paginated past
/// page 10 (`PER_PAGE * MAX_PAGE` = 1000, the Search API's hard result cap).
const SPLIT_THRESHOLD: i64 = 1000;
const MAX_PAGE: u32 = 10;
/// A window narrower than this is never split further, even if its
/// `total_count` still exceeds `SPLIT_THRESHOLD` — at second resolution the
/// `created:` filter can no longer separate results any finer.
const MIN_SPLITTABLE_WIDTH_SECONDS: i64 = 1;
const INITIAL_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Http(#[from] crate::error::HttpError),
    #[error(transparent)]
    Store(#[from] crate::error::StoreError),
    #[error(transparent)]
    Checkpoint(#[from] crate::error::CheckpointError),
}

pub struct SearchDriver<S: Store> {
    http: Arc<HttpClient>,
    pipeline: Arc<RepositoryPipeline<S>>,
    metrics: Arc<CrawlerMetrics>,
    state_store: SearchStateStore,
}

impl<S: Store> SearchDriver<S> {
    pub fn new(
        http: Arc<HttpClient>,
        pipeline: Arc<RepositoryPipeline<S>>,
        metrics: Arc<CrawlerMetrics>,
        state_path: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            http,
            pipeline,
            metrics,
            state_store: SearchStateStore::new(state_path),
        }
    }

    /// Runs (or resumes) a collection over `[start, end)`, filtered by
    /// `star_range`. Returns the number of repositories ingested this run.
    pub async fn run(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        star_range: StarRange,
        limit: Option<u64>,
        resume: bool,
    ) -> Result<u64, SearchError> {
        let mut state = if resume {
            match self.state_store.load().await? {
                Some(existing) if existing.start_date == start && existing.end_date == end => existing,
                _ => self.fresh_state(start, end),
            }
        } else {
            self.fresh_state(start, end)
        };

        let mut run_collected = 0u64;

        loop {
            let Some(window) = state.current_period().cloned() else {
                break;
            };

            let total_count = self.probe_total(&window, star_range).await?;

            if total_count > SPLIT_THRESHOLD && window.width().num_seconds() > MIN_SPLITTABLE_WIDTH_SECONDS {
                let parts = (total_count + SPLIT_THRESHOLD - 1) / SPLIT_THRESHOLD + 1;
                let children = window.split(parts as u32);
                self.metrics.record_window_split();
                tracing::info!(total_count, parts, "window exceeds search result cap, splitting");
                state.replace_current_with(children);
                self.state_store.save(&state).await?;
                continue;
            }

            if total_count > SPLIT_THRESHOLD {
                tracing::warn!(
                    total_count,
                    window_seconds = window.width().num_seconds(),
                    "window at minimum width still exceeds the search result cap; results beyond page 10 will be dropped"
                );
            }

            let mut page = state.current_period_page.max(1);
            loop {
                let items = self.fetch_page(&window, star_range, page).await?;
                let fetched = items.len() as u64;
                if fetched == 0 {
                    break;
                }

                let ingested = self.pipeline.process_page(items).await?;
                run_collected += ingested;
                state.repositories_collected += ingested;
                self.metrics.log_progress();

                if let Some(limit) = limit {
                    if run_collected >= limit {
                        state.advance_page(page);
                        self.state_store.save(&state).await?;
                        return Ok(run_collected);
                    }
                }

                if fetched < PER_PAGE as u64 || page >= MAX_PAGE {
                    break;
                }
                page += 1;
                state.advance_page(page);
                self.state_store.save(&state).await?;
            }

            if !state.advance_period() {
                break;
            }
            self.state_store.save(&state).await?;
        }

        self.state_store.save(&state).await?;
        Ok(run_collected)
    }

    fn fresh_state(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SearchState {
        let periods = initial_windows(start, end);
        SearchState::new(start, end, periods)
    }

    async fn probe_total(&self, window: &Window, star_range: StarRange) -> Result<i64, SearchError> {
        let query = search_query(window, star_range);
        let value = self
            .http
            .request(
                Method::GET,
                "search/repositories",
                &[("q", query.as_str()), ("per_page", "1"), ("page", "1")],
                None,
                true,
            )
            .await?;
        Ok(value.get("total_count").and_then(|v| v.as_i64()).unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        window: &Window,
        star_range: StarRange,
        page: u32,
    ) -> Result<Vec<RepositorySummary>, SearchError> {
        let query = search_query(window, star_range);
        let per_page = PER_PAGE.to_string();
        let page_str = page.to_string();
        let value = self
            .http
            .request(
                Method::GET,
                "search/repositories",
                &[
                    ("q", query.as_str()),
                    ("sort", "stars"),
                    ("order", "desc"),
                    ("per_page", per_page.as_str()),
                    ("page", page_str.as_str()),
                ],
                None,
                true,
            )
            .await?;

        let items = value.get("items").cloned().unwrap_or(serde_json::Value::Array(vec![]));
        match serde_json::from_value(items) {
            Ok(summaries) => Ok(summaries),
            Err(e) => {
                tracing::warn!(error = %e, page, "failed to parse search results page, treating as empty");
                Ok(Vec::new())
            }
        }
    }
}

/// Splits `[start, end)` into consecutive fixed-size windows of
/// `INITIAL_WINDOW_DAYS`, the last one clipped to `end`.
fn initial_windows(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + chrono::Duration::days(INITIAL_WINDOW_DAYS)).min(end);
        windows.push(Window::new(cursor, next));
        cursor = next;
    }
    if windows.is_empty() {
        windows.push(Window::new(start, end));
    }
    windows
}

fn search_query(window: &Window, star_range: StarRange) -> String {
    let stars = match star_range.max {
        Some(max) => format!("stars:{}..{}", star_range.min, max),
        None => format!("stars:>={}", star_range.min),
    };
    format!(
        "created:{}..{} {}",
        window.start.to_rfc3339(),
        window.end.to_rfc3339(),
        stars
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_windows_cover_the_full_range_in_thirty_day_chunks() {
        let start: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2024-03-01T00:00:00Z".parse().unwrap();
        let windows = initial_windows(start, end);

        assert_eq!(windows.first().unwrap().start, start);
        assert_eq!(windows.last().unwrap().end, end);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn search_query_uses_bounded_range_when_max_present() {
        let window = Window::new(
            "2024-01-01T00:00:00Z".parse().unwrap(),
            "2024-02-01T00:00:00Z".parse().unwrap(),
        );
        let query = search_query(&window, StarRange { min: 10, max: Some(100) });
        assert!(query.contains("stars:10..100"));
    }

    #[test]
    fn search_query_uses_open_range_when_max_absent() {
        let window = Window::new(
            "2024-01-01T00:00:00Z".parse().unwrap(),
            "2024-02-01T00:00:00Z".parse().unwrap(),
        );
        let query = search_query(&window, StarRange { min: 5, max: None });
        assert!(query.contains("stars:>=5"));
    }
}
