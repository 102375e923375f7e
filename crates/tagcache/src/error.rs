use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tagcache_store::StoreError;
use thiserror::Error;

/// Failures that end a request handled by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored payload that cannot be turned back into a response.
    #[error("cached entry {key:?} cannot be replayed: {reason}")]
    CorruptEntry { key: String, reason: String },
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "cache request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
