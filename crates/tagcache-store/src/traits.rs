use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;

/// Everything needed to replay a handler's response byte-for-byte.
///
/// Headers keep their original order and raw bytes so multi-valued headers
/// and non-UTF-8 values survive the round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, Bytes)>,
    pub body: Bytes,
}

impl CachedResponse {
    /// All values recorded for `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// The unit stored per key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Self-tag first, then extractor tags. Duplicates are allowed.
    pub tags: Vec<String>,
    pub response: CachedResponse,
}

impl CacheEntry {
    /// Whether any of this entry's tags appears in `invalidate` (exact match).
    pub fn matches_any(&self, invalidate: &[String]) -> bool {
        self.tags.iter().any(|tag| invalidate.contains(tag))
    }
}

/// Contract every entry repository must satisfy.
///
/// Implementations: [`MemoryStore`](crate::memory::MemoryStore) (default,
/// in-process) and [`RespStore`](crate::resp::RespStore) (external
/// Redis-compatible process).
///
/// Methods may be called concurrently from many in-flight requests; each
/// single `put`/`del` must be atomic. No ordering is promised between calls
/// from independent requests.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Look up a key.
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, StoreError>;

    /// Write a whole entry. The last write for a key wins.
    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Snapshot of the keys currently present, in no particular order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove everything, returning the keys that were present.
    async fn clear(&self) -> Result<Vec<String>, StoreError>;

    /// Human-readable name of the backend.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
        (**self).put(key, entry).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        (**self).del(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys().await
    }

    async fn clear(&self) -> Result<Vec<String>, StoreError> {
        (**self).clear().await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
