//! End-to-end collection scenarios: search driver, owner deduplication, and
//! persistence wired together against a mock GitHub API.

use ghcollector::cache::ResponseCache;
use ghcollector::http_client::HttpClient;
use ghcollector::metrics::CrawlerMetrics;
use ghcollector::models::StarRange;
use ghcollector::owners::RepositoryPipeline;
use ghcollector::search::SearchDriver;
use ghcollector::store::{SqliteStore, Store};
use ghcollector::token_pool::TokenPool;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn repo_item(id: i64, full_name: &str, owner_login: &str, stars: i64) -> serde_json::Value {
    json!({
        "id": id,
        "name": full_name.split('/').nth(1).unwrap(),
        "full_name": full_name,
        "owner": {"id": id + 100_000, "login": owner_login, "type": "User"},
        "organization": null,
        "description": null,
        "homepage": null,
        "language": "Rust",
        "private": false,
        "fork": false,
        "default_branch": "main",
        "size": 10,
        "stargazers_count": stars,
        "watchers_count": stars,
        "forks_count": 0,
        "open_issues_count": 0,
        "created_at": "2024-01-10T00:00:00Z",
        "updated_at": "2024-01-15T00:00:00Z",
        "pushed_at": "2024-01-15T00:00:00Z",
    })
}

fn owner_profile(login: &str) -> serde_json::Value {
    json!({
        "id": 7,
        "login": login,
        "public_repos": 3,
        "public_gists": 0,
        "followers": 1,
        "following": 1,
    })
}

async fn build_harness(mock: &MockServer) -> (Arc<HttpClient>, Arc<SqliteStore>, Arc<CrawlerMetrics>) {
    let pool = Arc::new(TokenPool::new(vec!["tok".to_string()]).unwrap());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = ResponseCache::new(cache_dir.path());
    let metrics = Arc::new(CrawlerMetrics::default());
    let http = Arc::new(
        HttpClient::new(pool, cache, metrics.clone(), "test-agent")
            .unwrap()
            .with_base_url(mock.uri()),
    );
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    (http, store, metrics)
}

#[tokio::test]
async fn single_small_window_is_collected_without_splitting() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 2, "items": []})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 2,
            "items": [repo_item(1, "octocat/hello", "octocat", 500), repo_item(2, "octocat/world", "octocat", 400)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owner_profile("octocat")))
        .mount(&server)
        .await;

    let (http, store, metrics) = build_harness(&server).await;
    let pipeline = Arc::new(RepositoryPipeline::new(http.clone(), store.clone(), metrics.clone()).await.unwrap());
    let state_dir = tempfile::tempdir().unwrap();
    let driver = SearchDriver::new(http, pipeline, metrics, state_dir.path().join("collection_state.json"));

    let start = "2024-01-01T00:00:00Z".parse().unwrap();
    let end = "2024-01-05T00:00:00Z".parse().unwrap();
    let collected = driver
        .run(start, end, StarRange { min: 100, max: None }, None, true)
        .await
        .unwrap();

    assert_eq!(collected, 2);
    let missing = store.repositories_missing_enrichment(10).await.unwrap();
    assert_eq!(missing.len(), 2);
}

#[tokio::test]
async fn window_exceeding_result_cap_is_split_before_paginating() {
    let server = MockServer::start().await;

    // Probe for the full month-wide window reports more than 1000 matches.
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 1500, "items": []})))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Every subsequent probe (the sub-windows) reports a small count.
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 1, "items": []})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [repo_item(1, "octocat/hello", "octocat", 500)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owner_profile("octocat")))
        .mount(&server)
        .await;

    let (http, store, metrics) = build_harness(&server).await;
    let pipeline = Arc::new(RepositoryPipeline::new(http.clone(), store.clone(), metrics.clone()).await.unwrap());
    let state_dir = tempfile::tempdir().unwrap();
    let driver = SearchDriver::new(http, pipeline, metrics.clone(), state_dir.path().join("collection_state.json"));

    let start = "2024-01-01T00:00:00Z".parse().unwrap();
    let end = "2024-02-01T00:00:00Z".parse().unwrap();
    driver
        .run(start, end, StarRange { min: 100, max: None }, None, true)
        .await
        .unwrap();

    assert!(metrics.windows_split() > 0);
}

#[tokio::test]
async fn resume_continues_from_the_saved_period_and_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 1, "items": []})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [repo_item(9, "octocat/resumed", "octocat", 200)]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(owner_profile("octocat")))
        .mount(&server)
        .await;

    let (http, store, metrics) = build_harness(&server).await;
    let pipeline = Arc::new(RepositoryPipeline::new(http.clone(), store.clone(), metrics.clone()).await.unwrap());
    let state_dir = tempfile::tempdir().unwrap();
    let state_path = state_dir.path().join("collection_state.json");

    // Pre-seed a checkpoint as if an earlier run had already advanced past
    // the first of two windows, matching the on-disk shape `search.rs`
    // writes via `SearchStateStore`.
    let start = "2024-01-01T00:00:00Z".parse().unwrap();
    let end = "2024-01-03T00:00:00Z".parse().unwrap();
    let seeded = ghcollector::checkpoint::SearchState::new(
        start,
        end,
        vec![
            ghcollector::models::Window::new(start, "2024-01-02T00:00:00Z".parse().unwrap()),
            ghcollector::models::Window::new("2024-01-02T00:00:00Z".parse().unwrap(), end),
        ],
    );
    let mut seeded = seeded;
    seeded.advance_period();
    ghcollector::checkpoint::SearchStateStore::new(state_path.clone()).save(&seeded).await.unwrap();

    let driver = SearchDriver::new(http, pipeline, metrics, state_path.clone());
    let collected = driver
        .run(start, end, StarRange { min: 100, max: None }, None, true)
        .await
        .unwrap();

    // Only the second window's single repository should have been fetched.
    assert_eq!(collected, 1);
}
