//! Administrative invalidation: full clear and purge by tag.

use crate::cache::TagCache;
use crate::error::CacheError;
use crate::log::CacheLog;
use axum::extract::{Request, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tagcache_store::{Store, StoreError};

/// Body of both admin endpoints: the keys that were removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub purged: Vec<String>,
}

/// Operates directly on a store, independent of the interceptor.
///
/// Neither operation is serialized against in-flight MISS writes: a write
/// that lands after an invalidation brings its entry back.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn Store>,
    log: CacheLog,
}

impl Invalidator {
    pub(crate) fn new(store: Arc<dyn Store>, log: CacheLog) -> Self {
        Self { store, log }
    }

    /// Remove every entry, returning the keys that were present.
    pub async fn clear(&self) -> Result<Vec<String>, StoreError> {
        let purged = self.store.clear().await?;
        self.log.purged("everything", &purged);
        metrics::counter!("tagcache_purged_entries_total").increment(purged.len() as u64);
        Ok(purged)
    }

    /// Remove every entry carrying at least one of `invalidate`.
    ///
    /// Keys come back in the order `keys()` enumerated them. An entry that
    /// disappears between enumeration and lookup is skipped.
    pub async fn purge(&self, invalidate: &[String]) -> Result<Vec<String>, StoreError> {
        let mut purged = Vec::new();

        if !invalidate.is_empty() {
            for key in self.store.keys().await? {
                let Some(entry) = self.store.get(&key).await? else {
                    continue;
                };
                if entry.matches_any(invalidate) {
                    self.store.del(&key).await?;
                    purged.push(key);
                }
            }
        }

        self.log.purged(&format!("{:?}", invalidate.join(",")), &purged);
        metrics::counter!("tagcache_purged_entries_total").increment(purged.len() as u64);
        Ok(purged)
    }
}

/// `GET {mount}/clear`
pub(crate) async fn clear_handler(
    State(cache): State<TagCache>,
) -> Result<Json<PurgeReport>, CacheError> {
    let purged = cache.invalidator().clear().await?;
    Ok(Json(PurgeReport { purged }))
}

/// `GET {mount}/purge`, tags chosen by the configured purger.
pub(crate) async fn purge_handler(
    State(cache): State<TagCache>,
    request: Request,
) -> Result<Json<PurgeReport>, CacheError> {
    let (parts, _body) = request.into_parts();
    let invalidate = cache.inner.purger.extract(&parts);
    let purged = cache.invalidator().purge(&invalidate).await?;
    Ok(Json(PurgeReport { purged }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogOptions;
    use bytes::Bytes;
    use tagcache_store::{CacheEntry, CachedResponse, MemoryStore};

    async fn seeded() -> (Arc<MemoryStore>, Invalidator) {
        let store = Arc::new(MemoryStore::new());
        for (key, tags) in [
            ("GET:/a", vec!["/a", "one", "shared"]),
            ("GET:/b", vec!["/b", "two", "shared"]),
            ("GET:/c", vec!["/c"]),
        ] {
            let entry = CacheEntry {
                key: key.to_string(),
                tags: tags.into_iter().map(String::from).collect(),
                response: CachedResponse {
                    status: 200,
                    headers: vec![],
                    body: Bytes::from_static(b"x"),
                },
            };
            store.put(key.to_string(), entry).await.unwrap();
        }
        let invalidator = Invalidator::new(store.clone(), CacheLog::new(&LogOptions::default()));
        (store, invalidator)
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn purge_removes_only_matching_entries() {
        let (store, invalidator) = seeded().await;

        assert_eq!(invalidator.purge(&tags(&["one"])).await.unwrap(), vec!["GET:/a"]);
        assert!(store.get("GET:/a").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn purge_by_self_tag() {
        let (store, invalidator) = seeded().await;

        assert_eq!(invalidator.purge(&tags(&["/c"])).await.unwrap(), vec!["GET:/c"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn purge_any_common_tag() {
        let (store, invalidator) = seeded().await;

        let mut purged = invalidator.purge(&tags(&["nope", "shared"])).await.unwrap();
        purged.sort();
        assert_eq!(purged, vec!["GET:/a", "GET:/b"]);
        assert_eq!(store.keys().await.unwrap(), vec!["GET:/c"]);
    }

    #[tokio::test]
    async fn purge_unknown_or_empty_is_a_noop() {
        let (store, invalidator) = seeded().await;

        assert!(invalidator.purge(&tags(&["unknown"])).await.unwrap().is_empty());
        assert!(invalidator.purge(&tags(&["ONE"])).await.unwrap().is_empty());
        assert!(invalidator.purge(&[]).await.unwrap().is_empty());
        assert_eq!(store.len(), 3);
    }

    /// Enumerates keys in insertion order.
    #[derive(Default)]
    struct OrderedStore {
        entries: parking_lot::Mutex<Vec<(String, Arc<CacheEntry>)>>,
    }

    #[async_trait::async_trait]
    impl Store for OrderedStore {
        async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, StoreError> {
            let entries = self.entries.lock();
            Ok(entries.iter().find(|(k, _)| k == key).map(|(_, e)| Arc::clone(e)))
        }

        async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
            self.entries.lock().push((key, Arc::new(entry)));
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<(), StoreError> {
            self.entries.lock().retain(|(k, _)| k != key);
            Ok(())
        }

        async fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.entries.lock().iter().map(|(k, _)| k.clone()).collect())
        }

        async fn clear(&self) -> Result<Vec<String>, StoreError> {
            Ok(self.entries.lock().drain(..).map(|(k, _)| k).collect())
        }

        fn name(&self) -> &'static str {
            "ordered"
        }
    }

    #[tokio::test]
    async fn purge_follows_key_enumeration_order() {
        let store = Arc::new(OrderedStore::default());
        for key in ["GET:/z", "GET:/a", "GET:/m", "GET:/b"] {
            let entry = CacheEntry {
                key: key.to_string(),
                tags: tags(&[key.trim_start_matches("GET:"), "shared"]),
                response: CachedResponse {
                    status: 200,
                    headers: vec![],
                    body: Bytes::new(),
                },
            };
            store.put(key.to_string(), entry).await.unwrap();
        }
        let invalidator = Invalidator::new(store.clone(), CacheLog::new(&LogOptions::default()));

        assert_eq!(
            invalidator.purge(&tags(&["/b", "/z", "/m"])).await.unwrap(),
            vec!["GET:/z", "GET:/m", "GET:/b"]
        );
        assert_eq!(store.keys().await.unwrap(), vec!["GET:/a"]);
    }

    #[tokio::test]
    async fn clear_returns_everything() {
        let (store, invalidator) = seeded().await;

        let mut purged = invalidator.clear().await.unwrap();
        purged.sort();
        assert_eq!(purged, vec!["GET:/a", "GET:/b", "GET:/c"]);
        assert!(store.is_empty());
        assert!(invalidator.clear().await.unwrap().is_empty());
    }
}
