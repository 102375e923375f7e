//! Tag extraction: from responses when storing, from requests when purging.

use axum::extract::Query;
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use tagcache_store::CachedResponse;

/// Response header read by [`HeaderTagExtractor::default`].
pub const DEFAULT_TAG_HEADER: &str = "edge-cache-tag";

/// Query parameter read by [`QueryTagExtractor::default`].
pub const DEFAULT_INVALIDATE_PARAM: &str = "invalidate";

/// Pulls tags out of a completed response, at write time.
///
/// The returned tags are appended after the entry's self-tag.
pub trait TagExtractor: Send + Sync + 'static {
    fn extract(&self, request: &Parts, response: &CachedResponse) -> Vec<String>;
}

impl<F> TagExtractor for F
where
    F: Fn(&Parts, &CachedResponse) -> Vec<String> + Send + Sync + 'static,
{
    fn extract(&self, request: &Parts, response: &CachedResponse) -> Vec<String> {
        self(request, response)
    }
}

/// Pulls the list of tags to invalidate out of a purge request.
pub trait InvalidationExtractor: Send + Sync + 'static {
    fn extract(&self, request: &Parts) -> Vec<String>;
}

impl<F> InvalidationExtractor for F
where
    F: Fn(&Parts) -> Vec<String> + Send + Sync + 'static,
{
    fn extract(&self, request: &Parts) -> Vec<String> {
        self(request)
    }
}

/// Reads comma-separated tags from a response header (every occurrence).
#[derive(Debug, Clone)]
pub struct HeaderTagExtractor {
    header: HeaderName,
}

impl HeaderTagExtractor {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderTagExtractor {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_TAG_HEADER))
    }
}

impl TagExtractor for HeaderTagExtractor {
    fn extract(&self, _request: &Parts, response: &CachedResponse) -> Vec<String> {
        response
            .header_values(self.header.as_str())
            .flat_map(|value| split_tags(&String::from_utf8_lossy(value)))
            .collect()
    }
}

/// Reads comma-separated tags from a query parameter (every occurrence).
#[derive(Debug, Clone)]
pub struct QueryTagExtractor {
    param: String,
}

impl QueryTagExtractor {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl Default for QueryTagExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_INVALIDATE_PARAM)
    }
}

impl InvalidationExtractor for QueryTagExtractor {
    fn extract(&self, request: &Parts) -> Vec<String> {
        // An unparsable query names no tags, so the purge removes nothing.
        let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(&request.uri) else {
            return Vec::new();
        };

        pairs
            .iter()
            .filter(|(name, _)| *name == self.param)
            .flat_map(|(_, value)| split_tags(value))
            .collect()
    }
}

/// Split `"one, two,,three"` into `["one", "two", "three"]`.
pub fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use bytes::Bytes;

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    fn response(headers: &[(&str, &str)]) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
                .collect(),
            body: Bytes::new(),
        }
    }

    #[test]
    fn split_drops_blanks_and_trims() {
        assert_eq!(split_tags("one,two,three"), vec!["one", "two", "three"]);
        assert_eq!(split_tags(" one , ,two,"), vec!["one", "two"]);
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn header_extractor_reads_all_occurrences() {
        let res = response(&[
            ("Edge-Cache-Tag", "one,two"),
            ("content-type", "text/plain"),
            ("edge-cache-tag", "three"),
        ]);
        let tags = HeaderTagExtractor::default().extract(&parts("/test"), &res);
        assert_eq!(tags, vec!["one", "two", "three"]);
    }

    #[test]
    fn header_extractor_without_header_yields_nothing() {
        let tags = HeaderTagExtractor::default().extract(&parts("/test"), &response(&[]));
        assert!(tags.is_empty());
    }

    #[test]
    fn custom_header_name() {
        let extractor = HeaderTagExtractor::new(HeaderName::from_static("cache-tags"));
        let res = response(&[("Cache-Tags", "a,b")]);
        assert_eq!(extractor.extract(&parts("/"), &res), vec!["a", "b"]);
    }

    #[test]
    fn query_extractor_reads_invalidate_param() {
        let extractor = QueryTagExtractor::default();
        assert_eq!(
            extractor.extract(&parts("/_cache/purge?invalidate=one,two")),
            vec!["one", "two"]
        );
        assert_eq!(
            extractor.extract(&parts("/_cache/purge?invalidate=a&other=x&invalidate=b")),
            vec!["a", "b"]
        );
        assert_eq!(
            extractor.extract(&parts("/_cache/purge?invalidate=%2Fposts%2F1")),
            vec!["/posts/1"]
        );
        assert!(extractor.extract(&parts("/_cache/purge")).is_empty());
    }
}
