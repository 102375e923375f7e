use axum::extract::Path;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const TAG_HEADER: &str = "edge-cache-tag";

/// Simulate upstream latency (5-20ms).
async fn latency() -> u64 {
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

fn tagged(tags: String, body: Json<serde_json::Value>) -> Response {
    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(&tags) {
        response.headers_mut().insert(TAG_HEADER, value);
    }
    response
}

/// One item, purgeable through `item-{id}` or `items`.
async fn get_item(Path(id): Path<u64>) -> Response {
    let delay = latency().await;
    tagged(
        format!("item-{id},items"),
        Json(json!({
            "id": id,
            "name": format!("Item {}", id),
            "data": "x".repeat(256),
            "latency_ms": delay,
        })),
    )
}

/// The first page of items, purgeable through `items`.
async fn list_items() -> Response {
    let delay = latency().await;
    let items: Vec<_> = (1..=10)
        .map(|id| json!({ "id": id, "name": format!("Item {}", id) }))
        .collect();
    tagged(
        "items".to_string(),
        Json(json!({ "items": items, "latency_ms": delay })),
    )
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = Router::new()
        .route("/api/items", get(list_items))
        .route("/api/items/{id}", get(get_item))
        .route("/health", get(health));

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo backend starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "demo backend failed");
        std::process::exit(1);
    }
}
