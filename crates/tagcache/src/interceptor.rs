//! The request path: policy, key, lookup, then replay or capture.
//!
//! ```text
//! CHECKING ──should_cache=false──▶ BYPASSED   (downstream untouched)
//!     │
//!     └─ key + store.get ──▶ LOOKED_UP ──hit──▶ REPLAYING  (downstream never runs)
//!                                    └──miss─▶ CAPTURING  (store.put after body ends,
//!                                                          unless should_store vetoes)
//! ```

use crate::cache::TagCache;
use crate::capture::{CaptureBody, CaptureError, Completion};
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::policy::request_url;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tagcache_store::{CacheEntry, CachedResponse};

const HIT: HeaderValue = HeaderValue::from_static("HIT");
const MISS: HeaderValue = HeaderValue::from_static("MISS");

/// Caching middleware, mounted with `axum::middleware::from_fn_with_state`.
pub(crate) async fn intercept(
    State(cache): State<TagCache>,
    request: Request,
    next: Next,
) -> Result<Response, CacheError> {
    let inner = &cache.inner;
    let (parts, body) = request.into_parts();

    if !inner.should_cache.should_cache(&parts) {
        metrics::counter!("tagcache_lookups_total", "status" => "bypass").increment(1);
        return Ok(next.run(Request::from_parts(parts, body)).await);
    }

    let key = inner.generate_key.generate_key(&parts);
    let cached = inner.store.get(&key).await?;

    if let Some(entry) = cached {
        inner.log.lookup("HIT", &key);
        metrics::counter!("tagcache_lookups_total", "status" => "hit").increment(1);
        return replay(&key, &entry.response, inner.status_header.as_ref());
    }

    inner.log.lookup("MISS", &key);
    metrics::counter!("tagcache_lookups_total", "status" => "miss").increment(1);

    let request_head = parts.clone();
    let response = next.run(Request::from_parts(parts, body)).await;
    let (mut head, body) = response.into_parts();

    if !inner.should_store.should_store(&request_head, &head) {
        if let Some(name) = &inner.status_header {
            head.headers.insert(name.clone(), MISS);
        }
        tracing::debug!(key = %key, status = head.status.as_u16(), "response kept out of the cache");
        metrics::counter!("tagcache_stores_total", "outcome" => "skipped").increment(1);
        cache.emit(CacheEvent::Skipped { key });
        return Ok(Response::from_parts(head, body));
    }

    // Snapshot before the status header goes in; HIT always writes its own.
    let (body, completion) = CaptureBody::new(body, &head);
    if let Some(name) = &inner.status_header {
        head.headers.insert(name.clone(), MISS);
    }

    tokio::spawn(complete(cache.clone(), key, request_head, completion));

    Ok(Response::from_parts(head, Body::new(body)))
}

/// Rebuild a response from a stored payload.
fn replay(
    key: &str,
    cached: &CachedResponse,
    status_header: Option<&HeaderName>,
) -> Result<Response, CacheError> {
    let corrupt = |reason: String| CacheError::CorruptEntry {
        key: key.to_string(),
        reason,
    };

    let mut response = Response::new(Body::from(cached.body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(cached.status).map_err(|e| corrupt(e.to_string()))?;

    let headers = response.headers_mut();
    for (name, value) in &cached.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| corrupt(e.to_string()))?;
        let value =
            HeaderValue::from_maybe_shared(value.clone()).map_err(|e| corrupt(e.to_string()))?;
        headers.append(name, value);
    }

    if let Some(name) = status_header {
        headers.insert(name.clone(), HIT);
    }

    Ok(response)
}

/// Completion hook for a MISS: runs once the captured body has finished.
///
/// The client already has its bytes by now, so failures only reach logs,
/// metrics and subscribers.
async fn complete(cache: TagCache, key: String, request: Parts, completion: Completion) {
    let inner = &cache.inner;

    // A dropped sender without a result cannot happen, treat it as an abort.
    let captured = completion.await.unwrap_or(Err(CaptureError::Aborted));

    let response = match captured {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "response not cached");
            metrics::counter!("tagcache_stores_total", "outcome" => "abandoned").increment(1);
            cache.emit(CacheEvent::Abandoned {
                key,
                reason: e.to_string(),
            });
            return;
        }
    };

    // The request URL is always a tag, for URL based purging.
    let mut tags = vec![request_url(&request).to_string()];
    if let Some(extractor) = &inner.cache_tags {
        tags.extend(extractor.extract(&request, &response));
    }

    inner.log.cached(&key, &tags);

    let entry = CacheEntry {
        key: key.clone(),
        tags: tags.clone(),
        response,
    };

    match inner.store.put(key.clone(), entry).await {
        Ok(()) => {
            metrics::counter!("tagcache_stores_total", "outcome" => "stored").increment(1);
            cache.emit(CacheEvent::Stored { key, tags });
        }
        Err(e) => {
            tracing::error!(key = %key, error = %e, store = inner.store.name(), "failed to store response");
            metrics::counter!("tagcache_stores_total", "outcome" => "failed").increment(1);
            cache.emit(CacheEvent::StoreFailed {
                key,
                error: e.to_string(),
            });
        }
    }
}
