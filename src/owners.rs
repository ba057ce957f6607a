//! Owner-Deduplicating Repository Pipeline (design doc §4.4), grounded on
//! `OwnerProcessor` in `owner_processor.py`: a known-owners set preloaded
//! from storage at startup, per-page duplicate tracking, and owner-before-
//! repository write ordering so a repository row never references an owner
//! that isn't there yet.

use crate::error::{HttpError, StoreError};
use crate::http_client::HttpClient;
use crate::metrics::CrawlerMetrics;
use crate::models::{Owner, OwnerKind, OwnerProfile, OwnerRecord, RepositoryRecord, RepositorySummary};
use crate::store::Store;
use reqwest::Method;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub struct RepositoryPipeline<S: Store> {
    http: Arc<HttpClient>,
    store: Arc<S>,
    metrics: Arc<CrawlerMetrics>,
    known_owners: Mutex<HashSet<String>>,
}

impl<S: Store> RepositoryPipeline<S> {
    /// Preloads the known-owners set from storage, matching
    /// `_preload_known_owners` at `OwnerProcessor` construction time.
    pub async fn new(http: Arc<HttpClient>, store: Arc<S>, metrics: Arc<CrawlerMetrics>) -> Result<Self, StoreError> {
        let known_owners = store.known_owner_logins().await?;
        Ok(Self {
            http,
            store,
            metrics,
            known_owners: Mutex::new(known_owners),
        })
    }

    /// Processes one page of search results: dedupes owners within the page,
    /// fetches and persists any owner not already known, then persists each
    /// repository after its owner row exists. Returns the number of
    /// repositories ingested.
    ///
    /// A single owner or repository failure is logged and skipped rather
    /// than aborting the page — one bad record should not stall the whole
    /// crawl.
    pub async fn process_page(&self, items: Vec<RepositorySummary>) -> Result<u64, StoreError> {
        let mut batch_seen: HashSet<String> = HashSet::new();
        let mut ingested = 0u64;

        for item in items {
            let owner_login = item.owner.login.clone();
            let owner_kind = item.owner.kind;

            if !batch_seen.insert(owner_login.clone()) {
                self.metrics.record_duplicate_owner_in_page();
            } else if let Err(e) = self.ensure_owner(&owner_login, owner_kind).await {
                tracing::warn!(owner = %owner_login, error = %e, "failed to fetch/persist owner, skipping repository");
                continue;
            }

            if let Some(org) = &item.organization {
                if org.login != owner_login && batch_seen.insert(org.login.clone()) {
                    if let Err(e) = self.ensure_organization_field(&org.login).await {
                        tracing::warn!(owner = %org.login, error = %e, "failed to fetch/persist organization, continuing without it");
                    }
                }
            }

            let record = RepositoryRecord::from_summary(item, owner_kind);
            let full_name = record.full_name.clone();
            match self.store.upsert_repository(&record).await {
                Ok(is_new) => {
                    ingested += 1;
                    self.metrics.record_repositories_ingested(1);
                    if !is_new {
                        self.metrics.record_duplicate_repository();
                    }
                }
                Err(e) => {
                    tracing::warn!(repository = %full_name, error = %e, "failed to persist repository, skipping");
                }
            }
        }

        Ok(ingested)
    }

    /// Fetches and persists an owner's profile unless it is already known,
    /// either from the preloaded set or from this process's own writes.
    async fn ensure_owner(&self, login: &str, kind: OwnerKind) -> Result<(), OwnerError> {
        {
            let known = self.known_owners.lock().unwrap();
            if known.contains(login) {
                return Ok(());
            }
        }

        let profile = fetch_owner_profile(&self.http, login, kind).await?;
        let owner = Owner::from_profile(kind, profile);
        self.store.upsert_owner(&owner).await?;
        self.metrics.record_owner_fetched();

        self.known_owners.lock().unwrap().insert(login.to_string());
        Ok(())
    }

    /// Fetches and persists a repository's separate `organization` field into
    /// `organizations`, distinct from `ensure_owner`'s `users` row for the
    /// repository's actual owner (design doc §3.1 / `insert_organization` in
    /// `database.py`, called only for `repo_data['organization']`).
    async fn ensure_organization_field(&self, login: &str) -> Result<(), OwnerError> {
        {
            let known = self.known_owners.lock().unwrap();
            if known.contains(login) {
                return Ok(());
            }
        }

        let profile = fetch_owner_profile(&self.http, login, OwnerKind::Organization).await?;
        let record = OwnerRecord::from(profile);
        self.store.upsert_organization(&record).await?;
        self.metrics.record_owner_fetched();

        self.known_owners.lock().unwrap().insert(login.to_string());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum OwnerError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

async fn fetch_owner_profile(http: &HttpClient, login: &str, kind: OwnerKind) -> Result<OwnerProfile, HttpError> {
    let path = match kind {
        OwnerKind::User => format!("users/{login}"),
        OwnerKind::Organization => format!("orgs/{login}"),
    };
    let value = http.request(Method::GET, &path, &[], None, true).await?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::models::OwnerSummary;
    use crate::store::SqliteStore;
    use crate::token_pool::TokenPool;
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_http(mock: &MockServer) -> Arc<HttpClient> {
        let pool = Arc::new(TokenPool::new(vec!["tok".to_string()]).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let metrics = Arc::new(CrawlerMetrics::default());
        Arc::new(
            HttpClient::new(pool, cache, metrics, "test-agent")
                .unwrap()
                .with_base_url(mock.uri()),
        )
    }

    fn summary(id: i64, owner_login: &str) -> RepositorySummary {
        RepositorySummary {
            id,
            name: "demo".to_string(),
            full_name: format!("{owner_login}/demo"),
            owner: OwnerSummary { id: id + 1000, login: owner_login.to_string(), kind: OwnerKind::User },
            organization: None,
            description: None,
            homepage: None,
            language: None,
            private: false,
            fork: false,
            default_branch: Some("main".to_string()),
            size: 1,
            stargazers_count: 10,
            watchers_count: 10,
            forks_count: 0,
            open_issues_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            pushed_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_owner_within_page_is_fetched_only_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/octocat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1, "login": "octocat", "public_repos": 0, "public_gists": 0,
                "followers": 0, "following": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = test_http(&server).await;
        let store = Arc::new(SqliteStore::in_memory().await);
        let metrics = Arc::new(CrawlerMetrics::default());
        let pipeline = RepositoryPipeline::new(http, store.clone(), metrics.clone()).await.unwrap();

        let ingested = pipeline
            .process_page(vec![summary(1, "octocat"), summary(2, "octocat")])
            .await
            .unwrap();

        assert_eq!(ingested, 2);
        assert_eq!(metrics.duplicate_owners_in_page(), 1);
    }

    #[tokio::test]
    async fn known_owner_from_storage_is_not_refetched() {
        let server = MockServer::start().await;
        // No mock mounted for /users/octocat: any call would fail the test.
        let http = test_http(&server).await;
        let store = Arc::new(SqliteStore::in_memory().await);
        store
            .upsert_owner(&Owner::User(crate::models::OwnerRecord {
                id: 1001,
                login: "octocat".to_string(),
                ..Default::default()
            }))
            .await
            .unwrap();
        let metrics = Arc::new(CrawlerMetrics::default());
        let pipeline = RepositoryPipeline::new(http, store, metrics).await.unwrap();

        let ingested = pipeline.process_page(vec![summary(1, "octocat")]).await.unwrap();
        assert_eq!(ingested, 1);
    }

    #[tokio::test]
    async fn re_ingesting_the_same_repository_id_is_counted_as_a_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/octocat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1, "login": "octocat", "public_repos": 0, "public_gists": 0,
                "followers": 0, "following": 0
            })))
            .mount(&server)
            .await;

        let http = test_http(&server).await;
        let store = Arc::new(SqliteStore::in_memory().await);
        let metrics = Arc::new(CrawlerMetrics::default());
        let pipeline = RepositoryPipeline::new(http, store, metrics.clone()).await.unwrap();

        pipeline.process_page(vec![summary(1, "octocat")]).await.unwrap();
        assert_eq!(metrics.duplicate_repositories(), 0);

        pipeline.process_page(vec![summary(1, "octocat")]).await.unwrap();
        assert_eq!(metrics.duplicate_repositories(), 1);
    }

    #[tokio::test]
    async fn organization_owned_repository_is_ingested_without_a_foreign_key_violation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/rust-lang"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1, "login": "rust-lang", "public_repos": 0, "public_gists": 0,
                "followers": 0, "following": 0
            })))
            .mount(&server)
            .await;

        let http = test_http(&server).await;
        let store = Arc::new(SqliteStore::in_memory().await);
        let metrics = Arc::new(CrawlerMetrics::default());
        let pipeline = RepositoryPipeline::new(http, store.clone(), metrics).await.unwrap();

        let mut item = summary(1, "rust-lang");
        item.owner.kind = OwnerKind::Organization;

        let ingested = pipeline.process_page(vec![item]).await.unwrap();

        assert_eq!(ingested, 1, "an org-owned repository must not be dropped by the owner_id foreign key");
        assert!(store.known_owner_logins().await.unwrap().contains("rust-lang"));
    }
}
