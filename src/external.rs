//! External collaborator interfaces (design doc §4.8). These are the seams
//! this crawler hands off to once a repository/owner row exists; none of
//! their core logic lives here. `cleanup`/`export` in `main.rs` call through
//! these traits with a minimal in-tree default, but a real deployment is
//! expected to supply its own implementation (e.g. a geocoding service with
//! its own API key and rate limits).

use crate::error::StoreError;
use async_trait::async_trait;
use std::path::Path;

/// Resolves a free-text location string (an owner's `location` field) to a
/// country code and region. Never called from the core collection or
/// enrichment paths — `country_code`/`region` stay `None` until a caller
/// runs this separately.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, location: &str) -> Option<(String, String)>;
}

/// Writes store tables out to CSV for downstream analysis. Takes a
/// destination directory; naming and column layout are left to the
/// implementation.
#[async_trait]
pub trait CsvExporter: Send + Sync {
    async fn export(&self, dest: &Path) -> std::io::Result<()>;
}

/// Finds and removes owner rows with no referencing repository, the
/// counterpart to `Store::owners_with_no_repositories` /
/// `Store::delete_owner`.
#[async_trait]
pub trait OrphanCleanup: Send + Sync {
    async fn remove_orphaned_owners(&self) -> Result<u64, StoreError>;
}

/// The in-tree `OrphanCleanup`: a thin driver over the `Store` trait's own
/// orphan-detection queries. `Geocoder` and `CsvExporter` have no in-tree
/// implementation — they're genuinely external collaborators.
pub struct StoreOrphanCleanup<S: crate::store::Store> {
    store: std::sync::Arc<S>,
}

impl<S: crate::store::Store> StoreOrphanCleanup<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: crate::store::Store> OrphanCleanup for StoreOrphanCleanup<S> {
    async fn remove_orphaned_owners(&self) -> Result<u64, StoreError> {
        let orphans = self.store.owners_with_no_repositories().await?;
        let mut removed = 0u64;
        for (id, kind) in orphans {
            self.store.delete_owner(id, kind).await?;
            removed += 1;
        }
        Ok(removed)
    }
}
