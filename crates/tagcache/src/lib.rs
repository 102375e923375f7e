//! Tag-invalidated HTTP response cache middleware for axum.
//!
//! A [`TagCache`] sits in front of a router. The first request for a key
//! runs the handler and records its response while streaming it out; later
//! requests for the same key replay the recording without running the
//! handler. Entries are dropped by tag through `GET /_cache/purge?invalidate=a,b`
//! or all at once through `GET /_cache/clear`.
//!
//! Every entry is tagged with its request URL plus whatever the tag
//! extractor finds in the response (by default the comma-separated
//! `Edge-Cache-Tag` header).
//!
//! ```no_run
//! use axum::{routing::get, Router};
//! use tagcache::{CacheOptions, TagCache};
//!
//! # async fn run() {
//! let cache = TagCache::new(CacheOptions::default());
//! let app: Router = cache.wrap(Router::new().route(
//!     "/posts/{id}",
//!     get(|| async { ([("edge-cache-tag", "posts")], "a post") }),
//! ));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//! axum::serve(listener, app).await.unwrap();
//! # }
//! ```

mod cache;
pub mod capture;
mod error;
mod events;
mod interceptor;
pub mod invalidator;
mod log;
mod options;
pub mod policy;
pub mod tags;


pub use cache::TagCache;
pub use capture::{CaptureBody, CaptureError};
pub use error::CacheError;
pub use events::CacheEvent;
pub use invalidator::{Invalidator, PurgeReport};
pub use log::LogOptions;
pub use options::{CacheOptions, DEFAULT_ADMIN_MOUNT, DEFAULT_STATUS_HEADER};
pub use policy::{
    CacheEverything, CachePolicy, KeyGenerator, MethodPathKey, ResponsePolicy, StoreEverything,
};
pub use tags::{HeaderTagExtractor, InvalidationExtractor, QueryTagExtractor, TagExtractor};

pub use tagcache_store as store;
pub use tagcache_store::{CacheEntry, CachedResponse, MemoryStore, RespStore, Store, StoreError};
