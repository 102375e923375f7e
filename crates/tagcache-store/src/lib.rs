//! Entry model and pluggable stores for the tagcache HTTP response cache.
//!
//! - [`traits`]: [`CacheEntry`], [`CachedResponse`] and the async [`Store`] contract.
//! - [`memory`]: the default unbounded, sharded in-process store.
//! - [`resp`]: a store living in an external Redis-compatible process.

pub mod error;
pub mod memory;
pub mod resp;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use resp::RespStore;
pub use traits::{CacheEntry, CachedResponse, Store};
