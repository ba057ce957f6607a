//! HTTP response cache (design doc §4.2).
//!
//! `(path, sorted query string)` hashes to a filesystem key under
//! `cache_dir/<md5>.json`, storing `{_cache_time, data}`. Entries older than
//! 24h are treated as a miss. Writes are atomic (write to a temp file, then
//! rename). A small in-process `moka` cache sits in front of the filesystem
//! so repeated hits within a run don't round-trip through disk, the same
//! read-through shape as the teacher's `MetricsCache`.

use md5::{Digest, Md5};
use moka::sync::Cache as MemCache;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

const TTL_SECONDS: u64 = 24 * 60 * 60;

#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct CacheEntry {
    #[serde(rename = "_cache_time")]
    cache_time: u64,
    data: Value,
}

#[derive(Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    mem: MemCache<String, Value>,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mem: MemCache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(TTL_SECONDS))
                .build(),
        }
    }

    pub fn key_for(path: &str, sorted_query: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(path.as_bytes());
        hasher.update(b"?");
        hasher.update(sorted_query.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.mem.get(key) {
            return Some(value);
        }

        let path = self.file_path(key);
        let bytes = fs::read(&path).await.ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now.saturating_sub(entry.cache_time) > TTL_SECONDS {
            return None;
        }

        self.mem.insert(key.to_string(), entry.data.clone());
        Some(entry.data)
    }

    pub async fn put(&self, key: &str, data: Value) -> std::io::Result<()> {
        self.mem.insert(key.to_string(), data.clone());

        fs::create_dir_all(&self.dir).await?;
        let entry = CacheEntry {
            cache_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            data,
        };
        let bytes = serde_json::to_vec(&entry)?;

        let final_path = self.file_path(key);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_stable_for_same_path_and_query() {
        let a = ResponseCache::key_for("/search/repositories", "page=1&q=stars");
        let b = ResponseCache::key_for("/search/repositories", "page=1&q=stars");
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_for_different_queries() {
        let a = ResponseCache::key_for("/search/repositories", "page=1");
        let b = ResponseCache::key_for("/search/repositories", "page=2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn round_trip_hits_memory_layer() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let key = ResponseCache::key_for("/users/octocat", "");
        cache.put(&key, json!({"login": "octocat"})).await.unwrap();

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit["login"], "octocat");
    }

    #[tokio::test]
    async fn round_trip_survives_cold_memory_via_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let key = ResponseCache::key_for("/users/octocat", "");
        {
            let cache = ResponseCache::new(dir.path());
            cache.put(&key, json!({"login": "octocat"})).await.unwrap();
        }
        // Fresh instance: memory layer is cold, must read from disk.
        let cache = ResponseCache::new(dir.path());
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit["login"], "octocat");
    }

    #[tokio::test]
    async fn miss_when_no_entry_exists() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        assert!(cache.get("does-not-exist").await.is_none());
    }
}
