//! Collection State & Enrichment Checkpoint (design doc §4.6), grounded on
//! `CollectionState` in `repository_collector.py`.

use crate::error::CheckpointError;
use crate::models::Window;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchState {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub time_periods: Vec<Window>,
    pub current_period_index: usize,
    pub current_period_page: u32,
    pub repositories_collected: u64,
    pub last_run: DateTime<Utc>,
}

impl SearchState {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>, time_periods: Vec<Window>) -> Self {
        Self {
            start_date,
            end_date,
            time_periods,
            current_period_index: 0,
            current_period_page: 1,
            repositories_collected: 0,
            last_run: Utc::now(),
        }
    }

    pub fn current_period(&self) -> Option<&Window> {
        self.time_periods.get(self.current_period_index)
    }

    /// Replaces the current window with its subdivided children, keeping the
    /// page cursor at 1 for the first child (design doc §4.3: "replace the
    /// current window in the work list with these sub-windows").
    pub fn replace_current_with(&mut self, children: Vec<Window>) {
        let idx = self.current_period_index;
        if idx < self.time_periods.len() {
            self.time_periods.splice(idx..=idx, children);
        }
        self.current_period_page = 1;
    }

    pub fn advance_page(&mut self, page: u32) {
        self.current_period_page = page;
    }

    pub fn advance_period(&mut self) -> bool {
        if self.current_period_index + 1 < self.time_periods.len() {
            self.current_period_index += 1;
            self.current_period_page = 1;
            true
        } else {
            false
        }
    }
}

/// Reads the search-state checkpoint if present and matching the requested
/// range, matching the resume semantics in design doc §4.6: a different
/// `[start_date, end_date]` than recorded always starts a fresh run.
pub struct SearchStateStore {
    path: PathBuf,
}

impl SearchStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<SearchState>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).await?;
        let state: SearchState = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        Ok(Some(state))
    }

    pub async fn save(&self, state: &SearchState) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Plain-text integer checkpoint: the index of the next enrichment batch to
/// process. Removed on clean completion of a run.
pub struct EnrichmentCheckpointStore {
    path: PathBuf,
}

impl EnrichmentCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<usize, CheckpointError> {
        if !self.path.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(&self.path).await?;
        text.trim()
            .parse::<usize>()
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))
    }

    pub async fn save(&self, next_batch_index: usize) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, next_batch_index.to_string()).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CheckpointError> {
        if self.path.exists() {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: &str, end: &str) -> Window {
        Window::new(
            start.parse::<DateTime<Utc>>().unwrap(),
            end.parse::<DateTime<Utc>>().unwrap(),
        )
    }

    #[tokio::test]
    async fn search_state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStateStore::new(dir.path().join("collection_state.json"));
        assert!(store.load().await.unwrap().is_none());

        let state = SearchState::new(
            "2024-01-01T00:00:00Z".parse().unwrap(),
            "2024-02-01T00:00:00Z".parse().unwrap(),
            vec![window("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z")],
        );
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.current_period_index, 0);
        assert_eq!(loaded.time_periods.len(), 1);
    }

    #[test]
    fn replace_current_with_splices_in_children_and_resets_page() {
        let mut state = SearchState::new(
            "2024-01-01T00:00:00Z".parse().unwrap(),
            "2024-03-01T00:00:00Z".parse().unwrap(),
            vec![window("2024-01-01T00:00:00Z", "2024-03-01T00:00:00Z")],
        );
        state.advance_page(7);
        state.replace_current_with(vec![
            window("2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"),
            window("2024-02-01T00:00:00Z", "2024-03-01T00:00:00Z"),
        ]);

        assert_eq!(state.time_periods.len(), 2);
        assert_eq!(state.current_period_page, 1);
        assert_eq!(state.current_period_index, 0);
    }

    #[tokio::test]
    async fn enrichment_checkpoint_clears_on_clean_completion() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrichmentCheckpointStore::new(dir.path().join("enrich_checkpoint.txt"));
        assert_eq!(store.load().await.unwrap(), 0);

        store.save(2).await.unwrap();
        assert_eq!(store.load().await.unwrap(), 2);

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), 0);
        assert!(!store.path().exists());
    }
}
