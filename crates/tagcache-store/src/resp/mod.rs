mod cmd;
mod connection;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use crate::error::StoreError;
use crate::traits::{CacheEntry, Store};
use async_trait::async_trait;
use bytes::Bytes;
use connection::Connection;
use redis_protocol::resp2::types::BytesFrame;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default key prefix inside the shared RESP keyspace.
pub const DEFAULT_NAMESPACE: &str = "tagcache:";

/// Store backed by an external Redis-compatible process, spoken to over RESP2.
///
/// Entries are JSON under `<namespace><key>`. A single connection is opened
/// lazily and shared by all callers; commands are serialized on it. When a
/// command fails at the transport level the connection is dropped and the
/// next call reconnects. Nothing is retried.
pub struct RespStore {
    addr: String,
    namespace: String,
    conn: Mutex<Option<Connection>>,
}

impl RespStore {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_namespace(addr, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(addr: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            namespace: namespace.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn namespaced(&self, key: &str) -> Bytes {
        Bytes::from(format!("{}{}", self.namespace, key))
    }

    /// Run one command on the shared connection.
    ///
    /// The connection is taken out for the duration of the request and only
    /// put back once its reply has been read. If the caller is cancelled in
    /// between, the half-used connection is dropped instead of handing a
    /// stale reply to the next caller.
    async fn request(&self, frame: BytesFrame) -> Result<BytesFrame, StoreError> {
        let mut guard = self.conn.lock().await;

        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::connect(&self.addr).await?,
        };

        match conn.request(&frame).await {
            Ok(reply) => {
                *guard = Some(conn);
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, addr = %self.addr, "RESP store request failed, dropping connection");
                Err(e)
            }
        }
    }

    async fn raw_keys(&self) -> Result<Vec<String>, StoreError> {
        let pattern = Bytes::from(format!("{}*", glob_escape(&self.namespace)));
        let reply = self
            .request(cmd::command([Bytes::from_static(b"KEYS"), pattern]))
            .await?;
        cmd::expect_strings(reply)
    }

    fn strip<'a>(&self, raw: &'a str) -> Option<&'a str> {
        raw.strip_prefix(self.namespace.as_str())
    }
}

/// Escape KEYS glob metacharacters so the namespace matches literally.
fn glob_escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl Store for RespStore {
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheEntry>>, StoreError> {
        let reply = self
            .request(cmd::command([Bytes::from_static(b"GET"), self.namespaced(key)]))
            .await?;

        match cmd::expect_bulk(reply)? {
            Some(json) => Ok(Some(Arc::new(serde_json::from_slice(&json)?))),
            None => Ok(None),
        }
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
        let json = serde_json::to_vec(&entry)?;
        let reply = self
            .request(cmd::command([
                Bytes::from_static(b"SET"),
                self.namespaced(&key),
                Bytes::from(json),
            ]))
            .await?;
        cmd::expect_ok(reply)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let reply = self
            .request(cmd::command([Bytes::from_static(b"DEL"), self.namespaced(key)]))
            .await?;
        cmd::expect_integer(reply).map(|_| ())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let raw = self.raw_keys().await?;
        Ok(raw
            .iter()
            .filter_map(|k| self.strip(k))
            .map(str::to_owned)
            .collect())
    }

    async fn clear(&self) -> Result<Vec<String>, StoreError> {
        let raw = self.raw_keys().await?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = Vec::with_capacity(raw.len() + 1);
        args.push(Bytes::from_static(b"DEL"));
        args.extend(raw.iter().map(|k| Bytes::from(k.clone())));
        cmd::expect_integer(self.request(cmd::command(args)).await?)?;

        Ok(raw
            .iter()
            .filter_map(|k| self.strip(k))
            .map(str::to_owned)
            .collect())
    }

    fn name(&self) -> &'static str {
        "resp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CachedResponse;
    use std::time::Duration;
    use super::testing::TestServer;

    fn entry(key: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            response: CachedResponse {
                status: 201,
                headers: vec![("x-raw".into(), Bytes::from_static(&[0xff, 0x00, b'a']))],
                body: Bytes::from_static(b"payload"),
            },
        }
    }

    #[tokio::test]
    async fn put_then_get_over_the_wire() {
        let server = TestServer::spawn().await;
        let store = RespStore::new(server.addr());

        assert!(store.get("GET:/a").await.unwrap().is_none());

        let e = entry("GET:/a", &["/a", "one"]);
        store.put("GET:/a".into(), e.clone()).await.unwrap();

        assert!(server.contains("tagcache:GET:/a"));
        assert_eq!(*store.get("GET:/a").await.unwrap().unwrap(), e);
    }

    #[tokio::test]
    async fn keys_and_clear_stay_inside_namespace() {
        let server = TestServer::spawn().await;
        server.insert("other:thing", Bytes::from_static(b"keep"));

        let store = RespStore::with_namespace(server.addr(), "ns:");
        store.put("a".into(), entry("a", &[])).await.unwrap();
        store.put("b".into(), entry("b", &[])).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.del("a").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["b"]);

        assert_eq!(store.clear().await.unwrap(), vec!["b"]);
        assert!(store.keys().await.unwrap().is_empty());
        assert!(store.clear().await.unwrap().is_empty());
        assert!(server.contains("other:thing"));
    }

    #[tokio::test]
    async fn namespace_glob_characters_match_literally() {
        let server = TestServer::spawn().await;
        server.insert("cache[1]:x", Bytes::from_static(b"neighbour"));

        let store = RespStore::with_namespace(server.addr(), "cache[1]*:");
        store.put("a".into(), entry("a", &[])).await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["a"]);
        assert_eq!(store.clear().await.unwrap(), vec!["a"]);
        assert!(server.contains("cache[1]:x"));
    }

    #[test]
    fn glob_escaping() {
        assert_eq!(glob_escape("tagcache:"), "tagcache:");
        assert_eq!(glob_escape("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[tokio::test]
    async fn cancelled_request_does_not_leak_its_reply() {
        let server = TestServer::spawn().await;
        let store = RespStore::new(server.addr());
        store.put("a".into(), entry("a", &["one"])).await.unwrap();

        server.delay_key("tagcache:a", Duration::from_millis(200));
        let cancelled = tokio::time::timeout(Duration::from_millis(50), store.get("a")).await;
        assert!(cancelled.is_err());

        // The reply for "a" is still in flight on the old connection.
        assert!(store.get("b").await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn unreachable_server_is_an_io_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let store = RespStore::new(addr);
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_codec_error() {
        let server = TestServer::spawn().await;
        server.insert("tagcache:bad", Bytes::from_static(b"not json"));

        let store = RespStore::new(server.addr());
        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)), "got {err:?}");
    }
}
