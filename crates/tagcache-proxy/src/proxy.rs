use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type HttpClient = Client<HttpConnector, Body>;

/// Shared state of the forwarding handler.
pub struct AppState {
    pub client: HttpClient,
    pub upstream_url: String,
    pub timeout: Duration,
}

impl AppState {
    pub fn new(upstream_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            upstream_url: upstream_url.into(),
            timeout,
        }
    }
}

/// Marks responses the proxy produced itself because the upstream failed.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamFailure;

fn upstream_failure(status: StatusCode, kind: &'static str) -> Response<Body> {
    metrics::counter!("tagcache_upstream_errors_total", "kind" => kind).increment(1);
    let mut response = status.into_response();
    response.extensions_mut().insert(UpstreamFailure);
    response
}

const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Forward the request upstream and stream the answer back.
///
/// Caching happens around this handler; it never sees a HIT.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (mut parts, body) = req.into_parts();

    let upstream_uri = format!(
        "{}{}",
        state.upstream_url.trim_end_matches('/'),
        parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    );

    parts.uri = match upstream_uri.parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(error = %e, upstream = %upstream_uri, "failed to build upstream request");
            return upstream_failure(StatusCode::BAD_GATEWAY, "request");
        }
    };
    parts.headers.remove(axum::http::header::HOST);
    strip_hop_by_hop(&mut parts.headers);

    let pending = state.client.request(Request::from_parts(parts, body));
    let upstream_resp = match tokio::time::timeout(state.timeout, pending).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            tracing::error!(error = %e, upstream = %upstream_uri, "upstream request failed");
            return upstream_failure(StatusCode::BAD_GATEWAY, "connect");
        }
        Err(_) => {
            tracing::error!(upstream = %upstream_uri, timeout_ms = state.timeout.as_millis() as u64, "upstream timed out");
            return upstream_failure(StatusCode::GATEWAY_TIMEOUT, "timeout");
        }
    };

    let (mut head, incoming) = upstream_resp.into_parts();
    strip_hop_by_hop(&mut head.headers);

    tracing::debug!(
        upstream = %upstream_uri,
        status = head.status.as_u16(),
        latency_us = start.elapsed().as_micros() as u64,
        "upstream responded"
    );
    metrics::histogram!("tagcache_upstream_latency_seconds").record(start.elapsed().as_secs_f64());

    Response::from_parts(head, Body::new(incoming))
}
