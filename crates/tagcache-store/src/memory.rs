use crate::error::StoreError;
use crate::traits::{CacheEntry, Store};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 16;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

type Shard = HashMap<String, Arc<CacheEntry>, ahash::RandomState>;

/// Default in-process store: an unbounded map with no eviction.
///
/// Keys are spread across 16 independent shards, each behind its own
/// `RwLock`, so lookups from concurrent requests rarely contend. Every
/// operation holds a shard lock only for the duration of one map call and
/// never across an `.await`.
///
/// Entries live until `del` or `clear`; there is no TTL and no capacity.
pub struct MemoryStore {
    shards: Box<[RwLock<Shard>; NUM_SHARDS]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let shards: Vec<RwLock<Shard>> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::with_hasher(ahash::RandomState::new())))
            .collect();

        let shards: Box<[RwLock<Shard>; NUM_SHARDS]> = shards
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!());

        Self { shards }
    }

    /// Hash a key and return the shard index.
    #[inline]
    fn shard_index(key: &str) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    fn shard(&self, key: &str) -> &RwLock<Shard> {
        &self.shards[Self::shard_index(key)]
    }

    /// Total number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, StoreError> {
        Ok(self.shard(key).read().get(key).cloned())
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
        let mut shard = self.shard(&key).write();
        shard.insert(key, Arc::new(entry));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.shard(key).write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            keys.extend(shard.read().keys().cloned());
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<Vec<String>, StoreError> {
        // Shard by shard: a put racing with clear may land in an already
        // drained shard and survive.
        let mut removed = Vec::new();
        for shard in self.shards.iter() {
            removed.extend(shard.write().drain().map(|(key, _)| key));
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
