use crate::log::LogOptions;
use crate::policy::{
    CacheEverything, CachePolicy, KeyGenerator, MethodPathKey, ResponsePolicy, StoreEverything,
};
use crate::tags::{HeaderTagExtractor, InvalidationExtractor, QueryTagExtractor, TagExtractor};
use axum::http::HeaderName;
use std::sync::Arc;
use tagcache_store::{MemoryStore, Store};

/// Default status header, carrying `HIT` or `MISS`.
pub const DEFAULT_STATUS_HEADER: &str = "cdn-cache";

/// Default prefix of the `clear` and `purge` routes.
pub const DEFAULT_ADMIN_MOUNT: &str = "/_cache";

type StoreFactory = Box<dyn FnOnce() -> Arc<dyn Store> + Send>;

/// Configuration for one [`TagCache`](crate::TagCache) instance.
///
/// Every instance gets its own freshly built store unless one is injected
/// with [`shared_store`](Self::shared_store).
///
/// ```no_run
/// use tagcache::{CacheOptions, TagCache};
///
/// let cache = TagCache::new(
///     CacheOptions::default()
///         .status_header(Some("x-cache".parse().unwrap()))
///         .cache_tags(None::<tagcache::HeaderTagExtractor>),
/// );
/// ```
pub struct CacheOptions {
    pub(crate) store_factory: StoreFactory,
    pub(crate) generate_key: Arc<dyn KeyGenerator>,
    pub(crate) should_cache: Arc<dyn CachePolicy>,
    pub(crate) should_store: Arc<dyn ResponsePolicy>,
    pub(crate) status_header: Option<HeaderName>,
    pub(crate) cache_tags: Option<Arc<dyn TagExtractor>>,
    pub(crate) purger: Arc<dyn InvalidationExtractor>,
    pub(crate) logger: LogOptions,
    pub(crate) admin_mount: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            store_factory: Box::new(|| Arc::new(MemoryStore::new())),
            generate_key: Arc::new(MethodPathKey),
            should_cache: Arc::new(CacheEverything),
            should_store: Arc::new(StoreEverything),
            status_header: Some(HeaderName::from_static(DEFAULT_STATUS_HEADER)),
            cache_tags: Some(Arc::new(HeaderTagExtractor::default())),
            purger: Arc::new(QueryTagExtractor::default()),
            logger: LogOptions::default(),
            admin_mount: DEFAULT_ADMIN_MOUNT.to_string(),
        }
    }
}

impl CacheOptions {
    /// Build the store when the cache is constructed.
    pub fn store_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Arc<dyn Store> + Send + 'static,
    {
        self.store_factory = Box::new(factory);
        self
    }

    /// Use a store owned by the caller, possibly shared with other instances.
    pub fn shared_store(self, store: Arc<dyn Store>) -> Self {
        self.store_factory(move || store)
    }

    pub fn generate_key(mut self, generator: impl KeyGenerator) -> Self {
        self.generate_key = Arc::new(generator);
        self
    }

    pub fn should_cache(mut self, policy: impl CachePolicy) -> Self {
        self.should_cache = Arc::new(policy);
        self
    }

    /// Response-side veto on recording a MISS, e.g. for error pages.
    pub fn should_store(mut self, policy: impl ResponsePolicy) -> Self {
        self.should_store = Arc::new(policy);
        self
    }

    /// Header carrying `HIT`/`MISS`; `None` sends no status header at all.
    pub fn status_header(mut self, header: Option<HeaderName>) -> Self {
        self.status_header = header;
        self
    }

    /// Response-side tag extraction; `None` records only the self-tag.
    pub fn cache_tags<E: TagExtractor>(mut self, extractor: Option<E>) -> Self {
        self.cache_tags = extractor.map(|e| Arc::new(e) as Arc<dyn TagExtractor>);
        self
    }

    /// Request-side extraction of the tags a purge call invalidates.
    pub fn purger(mut self, extractor: impl InvalidationExtractor) -> Self {
        self.purger = Arc::new(extractor);
        self
    }

    pub fn logger(mut self, logger: LogOptions) -> Self {
        self.logger = logger;
        self
    }

    /// Prefix for the `clear` and `purge` routes, e.g. `/_cache`.
    pub fn admin_mount(mut self, mount: impl Into<String>) -> Self {
        self.admin_mount = mount.into();
        self
    }
}
