//! Completion events published after a MISS has been fully sent.

/// What happened to a captured response once its body finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The entry was written to the store.
    Stored { key: String, tags: Vec<String> },
    /// The store rejected the write. The client already has its response.
    StoreFailed { key: String, error: String },
    /// The body failed or was dropped early, so nothing was written.
    Abandoned { key: String, reason: String },
    /// The response policy kept this response out of the store.
    Skipped { key: String },
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Stored { key, .. }
            | CacheEvent::StoreFailed { key, .. }
            | CacheEvent::Abandoned { key, .. }
            | CacheEvent::Skipped { key } => key,
        }
    }
}
