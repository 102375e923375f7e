use std::sync::Arc;

/// Controls the cache's own diagnostic lines.
///
/// Failures are always logged; this only gates the HIT/MISS, cached and
/// purged lines.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub enabled: bool,
    /// Attached to every line as the `scope` field.
    pub scope: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: "CACHE".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CacheLog {
    enabled: bool,
    scope: Arc<str>,
}

impl CacheLog {
    pub(crate) fn new(options: &LogOptions) -> Self {
        Self {
            enabled: options.enabled,
            scope: Arc::from(options.scope.as_str()),
        }
    }

    pub(crate) fn lookup(&self, status: &'static str, key: &str) {
        if self.enabled {
            tracing::info!(scope = %self.scope, status, key = %key, "{status} {key:?}");
        }
    }

    pub(crate) fn cached(&self, key: &str, tags: &[String]) {
        if self.enabled {
            tracing::info!(
                scope = %self.scope,
                key = %key,
                tags = ?tags,
                "cached {key:?}: [{}]",
                tags.join(", ")
            );
        }
    }

    pub(crate) fn purged(&self, what: &str, purged: &[String]) {
        if !self.enabled {
            return;
        }
        if purged.is_empty() {
            tracing::warn!(scope = %self.scope, "purged {what}: []");
        } else {
            tracing::info!(
                scope = %self.scope,
                count = purged.len(),
                "purged {what}: [{}]",
                purged.join(", ")
            );
        }
    }
}
