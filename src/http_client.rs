//! HTTP Client with Response Cache (design doc §4.2), grounded on
//! `GitHubClient`/`GitHubAPI` in the original `github_api.py`: bounded retry
//! with exponential backoff + jitter, credential rotation on rate limit, and
//! a filesystem-backed response cache for `GET` requests.

use crate::cache::ResponseCache;
use crate::error::HttpError;
use crate::metrics::CrawlerMetrics;
use crate::token_pool::TokenPool;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

pub struct HttpClient {
    http: reqwest::Client,
    pool: Arc<TokenPool>,
    cache: ResponseCache,
    metrics: Arc<CrawlerMetrics>,
    base_url: String,
    retry_attempts: u32,
}

impl HttpClient {
    pub fn new(
        pool: Arc<TokenPool>,
        cache: ResponseCache,
        metrics: Arc<CrawlerMetrics>,
        user_agent: &str,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            pool,
            cache,
            metrics,
            base_url: "https://api.github.com".to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    /// Overrides the REST base URL, used by integration tests to point at a
    /// local mock server instead of `api.github.com`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Issues a REST request with retry, credential rotation, and (for
    /// cacheable GETs) a cache lookup that bypasses the token pool entirely
    /// on a hit.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        use_cache: bool,
    ) -> Result<Value, HttpError> {
        let sorted_query = sorted_query_string(query);
        let cacheable = method == Method::GET && use_cache;

        if cacheable {
            let key = ResponseCache::key_for(path, &sorted_query);
            if let Some(value) = self.cache.get(&key).await {
                self.metrics.record_cache_hit();
                return Ok(value);
            }
            self.metrics.record_cache_miss();
        }

        let mut last_err: Option<HttpError> = None;

        for attempt in 0..self.retry_attempts {
            let credential = self.pool.acquire().await;
            let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

            let mut builder = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("token {}", credential.token))
                .header("Accept", "application/vnd.github.v3+json");
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(b) = body {
                builder = builder.json(b);
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        last_err = Some(HttpError::Transient(e.to_string()));
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Err(HttpError::Request(e));
                }
            };

            self.update_rate_limit(&credential.token, response.headers());

            let status = response.status();
            if status.is_success() {
                let bytes = response.bytes().await.map_err(HttpError::Request)?;
                let value: Value = if bytes.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_slice(&bytes)?
                };
                if cacheable {
                    let key = ResponseCache::key_for(path, &sorted_query);
                    let _ = self.cache.put(&key, value.clone()).await;
                }
                return Ok(value);
            }

            if status == StatusCode::NOT_FOUND {
                return Ok(Value::Object(Default::default()));
            }

            if status == StatusCode::FORBIDDEN {
                let text = response.text().await.unwrap_or_default();
                if text.to_lowercase().contains("rate limit exceeded") {
                    self.metrics.record_rate_limit_rotation();
                    last_err = Some(HttpError::RateLimit);
                    continue;
                }
                last_err = Some(HttpError::Fatal {
                    status: status.as_u16(),
                    body: text,
                });
                continue;
            }

            if status.is_server_error() {
                last_err = Some(HttpError::Transient(format!("server error {status}")));
                self.backoff(attempt).await;
                continue;
            }

            let body_text = response.text().await.unwrap_or_default();
            last_err = Some(HttpError::Fatal {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Err(last_err.unwrap_or(HttpError::Transient("retries exhausted".to_string())))
    }

    async fn backoff(&self, attempt: u32) {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let seconds = 2f64.powi(attempt as i32) + jitter;
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }

    fn update_rate_limit(&self, token: &str, headers: &reqwest::header::HeaderMap) {
        let remaining = headers
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let reset = headers
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            let reset_time = DateTime::<Utc>::from_timestamp(reset, 0).unwrap_or_else(Utc::now);
            self.pool.update(token, remaining, reset_time);
        }
    }

    /// Issues a `HEAD` request and returns the raw header map, used by the
    /// contributors-count path to parse the `Link` header (design doc §4.7).
    pub async fn head(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::header::HeaderMap, HttpError> {
        let credential = self.pool.acquire().await;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .http
            .head(&url)
            .header("Authorization", format!("token {}", credential.token))
            .query(query)
            .send()
            .await
            .map_err(HttpError::Request)?;

        self.update_rate_limit(&credential.token, response.headers());
        Ok(response.headers().clone())
    }

    /// Issues a GraphQL POST, returning the parsed body and the raw headers
    /// (the batcher needs the rate-limit headers directly for its own
    /// pacing logic rather than going through the REST retry loop).
    pub async fn graphql_raw(
        &self,
        query: &str,
        variables: &Value,
    ) -> Result<(StatusCode, reqwest::header::HeaderMap, Value), HttpError> {
        let credential = self.pool.acquire().await;
        let payload = serde_json::json!({ "query": query, "variables": variables });

        let url = format!("{}/graphql", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.token))
            .json(&payload)
            .send()
            .await
            .map_err(HttpError::Request)?;

        self.update_rate_limit(&credential.token, response.headers());
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(HttpError::Request)?;
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, headers, value))
    }
}

fn sorted_query_string(query: &[(&str, &str)]) -> String {
    let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CrawlerMetrics;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(mock: &MockServer) -> HttpClient {
        let pool = Arc::new(TokenPool::new(vec!["tok".to_string()]).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let metrics = Arc::new(CrawlerMetrics::default());
        HttpClient::new(pool, cache, metrics, "test-agent")
            .unwrap()
            .with_base_url(mock.uri())
    }

    #[tokio::test]
    async fn not_found_returns_empty_document_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client
            .request(Method::GET, "/users/ghost", &[], None, false)
            .await
            .unwrap();
        assert_eq!(result, Value::Object(Default::default()));
    }

    #[tokio::test]
    async fn successful_get_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/octocat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"login": "octocat"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let first = client
            .request(Method::GET, "/users/octocat", &[], None, true)
            .await
            .unwrap();
        let second = client
            .request(Method::GET, "/users/octocat", &[], None, true)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(client.metrics.cache_hits(), 1);
        assert_eq!(client.metrics.cache_misses(), 1);
    }

    #[tokio::test]
    async fn transient_5xx_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = client
            .request(Method::GET, "/rate_limit", &[], None, false)
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }
}
