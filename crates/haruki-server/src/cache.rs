//! In-process TTL cache for public read responses.
//!
//! Keys follow `public_access:{path}:query={md5(query)|none}` so an upload
//! can invalidate exactly the entries it makes stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::sync::RwLock;
use tracing::debug;

use haruki_shared::constants::{PUBLIC_CACHE_NAMESPACE, PUBLIC_CACHE_TTL_SECS};
use haruki_shared::{Server, UploadDataType};

// ---------------------------------------------------------------------------
// Cached entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedBody {
    body: Bytes,
    stored_at: Instant,
}

impl CachedBody {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

// ---------------------------------------------------------------------------
// Response cache
// ---------------------------------------------------------------------------

/// Serialized JSON bodies keyed by request path and query.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<String, CachedBody>>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if !entry.is_fresh(self.ttl) {
            return None;
        }
        debug!(%key, "Response served from cache");
        Some(entry.body.clone())
    }

    pub async fn put(&self, key: String, body: Bytes) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CachedBody {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, keys: &[String]) {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
    }

    pub async fn purge_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, remaining = entries.len(), "Purged expired cache entries");
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(PUBLIC_CACHE_TTL_SECS))
    }
}

/// Cache key of a public read. An empty query hashes to `none`.
pub fn public_cache_key(path: &str, query: Option<&str>) -> String {
    let query = match query.filter(|q| !q.is_empty()) {
        Some(q) => hex::encode(Md5::digest(q.as_bytes())),
        None => "none".to_string(),
    };
    format!("{PUBLIC_CACHE_NAMESPACE}:{path}:query={query}")
}

/// Entries made stale by an upload of `data_type` for `user_id`.
pub fn upload_invalidation_keys(server: Server, data_type: UploadDataType, user_id: i64) -> Vec<String> {
    let path = format!("/public/{server}/{}/{user_id}", data_type.canonical());
    vec![
        public_cache_key(&path, None),
        public_cache_key(&path, Some("key=upload_time")),
    ]
}
