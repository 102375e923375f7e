use crate::events::CacheEvent;
use crate::interceptor::intercept;
use crate::invalidator::{self, Invalidator};
use crate::log::CacheLog;
use crate::options::CacheOptions;
use crate::policy::{CachePolicy, KeyGenerator, ResponsePolicy};
use crate::tags::{InvalidationExtractor, TagExtractor};
use axum::http::HeaderName;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tagcache_store::Store;
use tokio::sync::broadcast;

/// Capacity of the completion event channel. Slow subscribers lag, they
/// never block a request.
const EVENT_CAPACITY: usize = 64;

/// One response cache instance: an interceptor and an invalidator sharing
/// one store.
///
/// Cheap to clone; clones share the same store and options.
///
/// ```no_run
/// use axum::{routing::get, Router};
/// use tagcache::{CacheOptions, TagCache};
///
/// let cache = TagCache::new(CacheOptions::default());
/// let app: Router = cache.wrap(Router::new().route("/", get(|| async { "hello" })));
/// ```
#[derive(Clone)]
pub struct TagCache {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) generate_key: Arc<dyn KeyGenerator>,
    pub(crate) should_cache: Arc<dyn CachePolicy>,
    pub(crate) should_store: Arc<dyn ResponsePolicy>,
    pub(crate) status_header: Option<HeaderName>,
    pub(crate) cache_tags: Option<Arc<dyn TagExtractor>>,
    pub(crate) purger: Arc<dyn InvalidationExtractor>,
    pub(crate) log: CacheLog,
    pub(crate) admin_mount: String,
    pub(crate) events: broadcast::Sender<CacheEvent>,
}

impl TagCache {
    pub fn new(options: CacheOptions) -> Self {
        let store = (options.store_factory)();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let admin_mount = options.admin_mount.trim_end_matches('/').to_string();

        tracing::info!(
            store = store.name(),
            status_header = ?options.status_header,
            cache_tags = options.cache_tags.is_some(),
            admin_mount = %admin_mount,
            "tag cache initialized"
        );

        Self {
            inner: Arc::new(Inner {
                store,
                generate_key: options.generate_key,
                should_cache: options.should_cache,
                should_store: options.should_store,
                status_header: options.status_header,
                cache_tags: options.cache_tags,
                purger: options.purger,
                log: CacheLog::new(&options.logger),
                admin_mount,
                events,
            }),
        }
    }

    /// The store owned by this instance.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn invalidator(&self) -> Invalidator {
        Invalidator::new(Arc::clone(&self.inner.store), self.inner.log.clone())
    }

    /// Follow what happens to MISS responses after they have been sent.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.inner.events.send(event);
    }

    /// `GET {mount}/clear` and `GET {mount}/purge`, not intercepted.
    pub fn admin_routes<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let mount = &self.inner.admin_mount;
        Router::new()
            .route(&format!("{mount}/clear"), get(invalidator::clear_handler))
            .route(&format!("{mount}/purge"), get(invalidator::purge_handler))
            .with_state(self.clone())
    }

    /// Intercept every route of `router`, then add the admin routes ahead of
    /// interception.
    pub fn wrap<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(axum::middleware::from_fn_with_state(self.clone(), intercept))
            .merge(self.admin_routes())
    }
}
