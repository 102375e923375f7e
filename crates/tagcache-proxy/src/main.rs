mod config;
mod proxy;

use axum::http::request::Parts;
use axum::http::response;
use axum::http::{HeaderName, Method};
use axum::routing::{any, get};
use axum::Router;
use clap::Parser;
use config::{Config, StoreKind};
use proxy::{proxy_handler, AppState, UpstreamFailure};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tagcache::{
    CacheOptions, HeaderTagExtractor, LogOptions, MemoryStore, QueryTagExtractor, RespStore,
    Store, TagCache, DEFAULT_STATUS_HEADER,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tagcache-proxy", about = "Tag-invalidated caching reverse proxy")]
struct Cli {
    /// TOML config file; defaults are used when it does not exist
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "tagcache proxy failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = Config::load_or_default(&cli.config)?;

    let prom_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let (proxy_router, _cache) = build_app(&config)?;
    let proxy_router = proxy_router.layer(TraceLayer::new_for_http());

    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let h = prom_handle.clone();
            async move { h.render() }
        }),
    );

    let proxy_addr = config.server.listen_addr.clone();
    let metrics_addr = config.server.metrics_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        metrics = %metrics_addr,
        upstream = %config.upstream.url,
        store = ?config.cache.store,
        methods = ?config.cache.methods,
        "tagcache proxy starting"
    );

    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .map_err(|e| format!("failed to bind proxy to {proxy_addr}: {e}"))?;
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .map_err(|e| format!("failed to bind metrics to {metrics_addr}: {e}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics_future = axum::serve(metrics_listener, metrics_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let (proxy_result, metrics_result) = tokio::join!(proxy_future, metrics_future);
    proxy_result?;
    metrics_result?;

    tracing::info!("tagcache proxy shut down");
    Ok(())
}

/// The proxy router with the cache in front of it.
fn build_app(config: &Config) -> Result<(Router, TagCache), BoxError> {
    let cache = TagCache::new(cache_options(config)?);

    let state = Arc::new(AppState::new(
        config.upstream.url.clone(),
        Duration::from_millis(config.upstream.timeout_ms),
    ));

    let router = Router::new()
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state);

    Ok((cache.wrap(router), cache))
}

fn cache_options(config: &Config) -> Result<CacheOptions, BoxError> {
    let cache = &config.cache;

    let status_header = cache
        .status_header
        .name(DEFAULT_STATUS_HEADER)
        .map(|name| HeaderName::from_bytes(name.as_bytes()))
        .transpose()
        .map_err(|e| format!("invalid status_header: {e}"))?;

    let tag_header = cache
        .tag_header
        .name(tagcache::tags::DEFAULT_TAG_HEADER)
        .map(|name| HeaderName::from_bytes(name.as_bytes()))
        .transpose()
        .map_err(|e| format!("invalid tag_header: {e}"))?;

    let methods = cache
        .methods
        .iter()
        .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid cache method: {e}"))?;

    let options = CacheOptions::default()
        .should_cache(move |parts: &Parts| methods.contains(&parts.method))
        .should_store(|_: &Parts, res: &response::Parts| {
            res.extensions.get::<UpstreamFailure>().is_none()
        })
        .status_header(status_header)
        .cache_tags(tag_header.map(HeaderTagExtractor::new))
        .purger(QueryTagExtractor::new(cache.invalidate_param.clone()))
        .logger(LogOptions {
            enabled: cache.log_enabled,
            scope: cache.log_scope.clone(),
        })
        .admin_mount(cache.admin_mount.clone());

    let options = match cache.store {
        StoreKind::Memory => {
            options.store_factory(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>)
        }
        StoreKind::Resp => {
            let store =
                RespStore::with_namespace(config.resp.addr.clone(), config.resp.namespace.clone());
            options.store_factory(move || Arc::new(store) as Arc<dyn Store>)
        }
    };

    Ok(options)
}

/// Listen for SIGINT (Ctrl+C) or SIGTERM and cancel the shutdown token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use config::HeaderSetting;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tagcache::CacheEvent;
    use tower::ServiceExt;

    /// Demo-style upstream that counts the requests reaching it.
    async fn spawn_upstream(hits: Arc<AtomicUsize>) -> String {
        let counter = Arc::clone(&hits);
        let router = Router::new()
            .route(
                "/api/items/{id}",
                get(move |axum::extract::Path(id): axum::extract::Path<u32>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        ([("edge-cache-tag", format!("item-{id},items"))], format!("item {id}"))
                    }
                }),
            )
            .route("/api/items", post(|| async { "created" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let cache = resp
            .headers()
            .get("x-cache")
            .map(|v| v.to_str().unwrap().to_string());
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, cache, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn stored(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CacheEvent::Stored { .. }), "{event:?}");
    }

    fn proxy_config(upstream: String) -> Config {
        let mut config: Config = toml::from_str(
            r#"
            [cache]
            status_header = "x-cache"
            log_enabled = false
            "#,
        )
        .unwrap();
        config.upstream.url = upstream;
        config
    }

    #[tokio::test]
    async fn caches_upstream_and_purges_by_tag() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(Arc::clone(&hits)).await;
        let (app, cache) = build_app(&proxy_config(upstream)).unwrap();
        let mut events = cache.subscribe();

        let (status, state, body) = send(&app, Method::GET, "/api/items/1").await;
        assert_eq!((status, state.as_deref(), body.as_str()), (StatusCode::OK, Some("MISS"), "item 1"));
        stored(&mut events).await;

        let (_, state, body) = send(&app, Method::GET, "/api/items/1").await;
        assert_eq!((state.as_deref(), body.as_str()), (Some("HIT"), "item 1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (status, _, body) = send(&app, Method::GET, "/_cache/purge?invalidate=items").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"purged":["GET:/api/items/1"]}"#);

        let (_, state, _) = send(&app, Method::GET, "/api/items/1").await;
        assert_eq!(state.as_deref(), Some("MISS"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_methods_bypass_the_cache() {
        let upstream = spawn_upstream(Arc::new(AtomicUsize::new(0))).await;
        let (app, cache) = build_app(&proxy_config(upstream)).unwrap();

        for _ in 0..2 {
            let (status, state, body) = send(&app, Method::POST, "/api/items").await;
            assert_eq!((status, state, body.as_str()), (StatusCode::OK, None, "created"));
        }
        assert!(cache.store().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_outage_is_not_cached() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (app, cache) = build_app(&proxy_config(format!("http://{addr}"))).unwrap();
        let mut events = cache.subscribe();

        for _ in 0..2 {
            let (status, state, _) = send(&app, Method::GET, "/api/items/1").await;
            assert_eq!((status, state.as_deref()), (StatusCode::BAD_GATEWAY, Some("MISS")));
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, CacheEvent::Skipped { .. }), "{event:?}");
        }
        assert!(cache.store().keys().await.unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut bad = Config::default();
        bad.cache.status_header = HeaderSetting::Name("bad header".into());
        assert!(cache_options(&bad).is_err());
    }

    #[test]
    fn cli_default_config_path() {
        let cli = Cli::parse_from(["tagcache-proxy"]);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }
}
