//! In-process RESP2 server for tests: GET, SET, DEL and KEYS.
//!
//! Enabled for this crate's own tests and, through the `test-util`
//! feature, for crates that want to run a [`RespStore`](super::RespStore)
//! without an external server.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use redis_protocol::resp2::decode::decode_bytes;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct Shared {
    db: Mutex<BTreeMap<String, Bytes>>,
    delays: Mutex<HashMap<String, Duration>>,
    connections: AtomicUsize,
}

/// Handle to a running test server. The server lives until the runtime
/// shuts down.
#[derive(Clone)]
pub struct TestServer {
    addr: String,
    shared: Arc<Shared>,
}

impl TestServer {
    /// Bind an ephemeral local port and start accepting connections.
    ///
    /// Panics if the port cannot be bound.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test RESP server");
        let addr = listener
            .local_addr()
            .expect("test RESP server address")
            .to_string();
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_shared)));
            }
        });

        Self { addr, shared }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Write a raw value, bypassing any store.
    pub fn insert(&self, key: &str, value: Bytes) {
        self.shared.db.lock().insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.db.lock().contains_key(key)
    }

    /// Hold back every `GET key` reply by `delay`.
    pub fn delay_key(&self, key: &str, delay: Duration) {
        self.shared.delays.lock().insert(key.to_string(), delay);
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

async fn handle_connection(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        while let Ok(Some((frame, consumed))) = decode_bytes(&buf.clone().freeze()) {
            let _ = buf.split_to(consumed);
            let (response, delay) = dispatch(&frame, &shared);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut out = BytesMut::new();
            if extend_encode(&mut out, &response, false).is_err()
                || stream.write_all(&out).await.is_err()
            {
                return;
            }
        }
    }
}

fn dispatch(frame: &BytesFrame, shared: &Shared) -> (BytesFrame, Option<Duration>) {
    let BytesFrame::Array(args) = frame else {
        return (BytesFrame::Error("ERR expected array".into()), None);
    };
    let arg = |i: usize| match args.get(i) {
        Some(BytesFrame::BulkString(b)) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    };

    let mut db = shared.db.lock();
    let reply = match arg(0).to_uppercase().as_str() {
        "GET" => {
            let key = arg(1);
            let delay = shared.delays.lock().get(&key).copied();
            let reply = match db.get(&key) {
                Some(v) => BytesFrame::BulkString(v.clone()),
                None => BytesFrame::Null,
            };
            return (reply, delay);
        }
        "SET" => match args.get(2) {
            Some(BytesFrame::BulkString(value)) => {
                db.insert(arg(1), value.clone());
                BytesFrame::SimpleString("OK".into())
            }
            _ => BytesFrame::Error("ERR wrong number of arguments for 'set'".into()),
        },
        "DEL" => {
            let removed = (1..args.len())
                .filter(|&i| db.remove(&arg(i)).is_some())
                .count();
            BytesFrame::Integer(removed as i64)
        }
        "KEYS" => {
            let pattern = arg(1);
            BytesFrame::Array(
                db.keys()
                    .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                    .map(|k| BytesFrame::BulkString(Bytes::from(k.clone())))
                    .collect(),
            )
        }
        other => BytesFrame::Error(format!("ERR unknown command '{other}'").as_str().into()),
    };
    (reply, None)
}

/// Redis-style glob: `*`, `?`, `[set]` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'\\', rest)) => match rest.split_first() {
            Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
            None => text == b"\\",
        },
        Some((b'[', rest)) => {
            let Some(end) = rest.iter().position(|&c| c == b']') else {
                return text.first() == Some(&b'[') && glob_match(rest, &text[1..]);
            };
            match text.first() {
                Some(c) => rest[..end].contains(c) && glob_match(&rest[end + 1..], &text[1..]),
                None => false,
            }
        }
        Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
    }
}
