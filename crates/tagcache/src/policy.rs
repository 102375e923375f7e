//! Which requests participate in caching, and under what key.

use axum::http::request::Parts;
use axum::http::response;

/// Derives the cache key for a request.
///
/// Must be deterministic and free of side effects. Called at most once per
/// intercepted request. Any `Fn(&Parts) -> String` closure is a key generator.
pub trait KeyGenerator: Send + Sync + 'static {
    fn generate_key(&self, request: &Parts) -> String;
}

impl<F> KeyGenerator for F
where
    F: Fn(&Parts) -> String + Send + Sync + 'static,
{
    fn generate_key(&self, request: &Parts) -> String {
        self(request)
    }
}

/// Default key: `METHOD:path?query`, e.g. `GET:/posts?page=2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodPathKey;

impl KeyGenerator for MethodPathKey {
    fn generate_key(&self, request: &Parts) -> String {
        format!("{}:{}", request.method, request_url(request))
    }
}

/// Decides whether a request is intercepted at all.
///
/// When this returns `false` the store is never touched and no status
/// header is written. Any `Fn(&Parts) -> bool` closure is a policy.
pub trait CachePolicy: Send + Sync + 'static {
    fn should_cache(&self, request: &Parts) -> bool;
}

impl<F> CachePolicy for F
where
    F: Fn(&Parts) -> bool + Send + Sync + 'static,
{
    fn should_cache(&self, request: &Parts) -> bool {
        self(request)
    }
}

/// Default policy: every request is cacheable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheEverything;

impl CachePolicy for CacheEverything {
    fn should_cache(&self, _request: &Parts) -> bool {
        true
    }
}

/// Decides, once the handler has answered, whether a MISS gets recorded.
///
/// The response is still sent and still carries the `MISS` status header;
/// it is only kept out of the store. Any
/// `Fn(&request::Parts, &response::Parts) -> bool` closure is a policy.
pub trait ResponsePolicy: Send + Sync + 'static {
    fn should_store(&self, request: &Parts, response: &response::Parts) -> bool;
}

impl<F> ResponsePolicy for F
where
    F: Fn(&Parts, &response::Parts) -> bool + Send + Sync + 'static,
{
    fn should_store(&self, request: &Parts, response: &response::Parts) -> bool {
        self(request, response)
    }
}

/// Default: every completed response is stored, whatever its status.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreEverything;

impl ResponsePolicy for StoreEverything {
    fn should_store(&self, _request: &Parts, _response: &response::Parts) -> bool {
        true
    }
}

/// Path plus query string as the handler saw it. Also used as the self-tag.
pub fn request_url(request: &Parts) -> &str {
    request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request, StatusCode};

    fn parts(method: Method, uri: &str) -> Parts {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn default_key_is_method_and_url() {
        assert_eq!(MethodPathKey.generate_key(&parts(Method::GET, "/test")), "GET:/test");
        assert_eq!(
            MethodPathKey.generate_key(&parts(Method::POST, "/items?page=2")),
            "POST:/items?page=2"
        );
    }

    #[test]
    fn absolute_uri_uses_path_only() {
        let p = parts(Method::GET, "http://example.com/a/b?x=1");
        assert_eq!(request_url(&p), "/a/b?x=1");
    }

    #[test]
    fn closures_are_strategies() {
        let keyer = |p: &Parts| format!("custom:{}", p.uri.path());
        let policy = |p: &Parts| p.method == Method::GET;

        let get = parts(Method::GET, "/x");
        assert_eq!(keyer.generate_key(&get), "custom:/x");
        assert!(policy.should_cache(&get));
        assert!(!policy.should_cache(&parts(Method::DELETE, "/x")));
        assert!(CacheEverything.should_cache(&parts(Method::DELETE, "/x")));
    }

    #[test]
    fn response_policy_sees_both_heads() {
        let only_ok = |_: &Parts, res: &response::Parts| res.status == StatusCode::OK;
        let req = parts(Method::GET, "/x");
        let res = |status| {
            axum::http::Response::builder()
                .status(status)
                .body(())
                .unwrap()
                .into_parts()
                .0
        };

        assert!(only_ok.should_store(&req, &res(StatusCode::OK)));
        assert!(!only_ok.should_store(&req, &res(StatusCode::BAD_GATEWAY)));
        assert!(StoreEverything.should_store(&req, &res(StatusCode::BAD_GATEWAY)));
    }
}
