use crate::error::StoreError;
use bytes::BytesMut;
use redis_protocol::resp2::decode::decode_bytes;
use redis_protocol::resp2::encode::extend_encode;
use redis_protocol::resp2::types::BytesFrame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One client connection to a RESP2 server.
pub struct Connection {
    stream: TcpStream,
    buf: BytesMut,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %addr, "RESP store connected");
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        })
    }

    /// Send one command frame and wait for exactly one reply frame.
    ///
    /// Not cancel safe: dropping the future after the write leaves the reply
    /// unread on the socket, so the connection must be discarded.
    pub async fn request(&mut self, frame: &BytesFrame) -> Result<BytesFrame, StoreError> {
        let mut out = BytesMut::new();
        // false = don't encode integers as bulk strings (standard RESP2)
        extend_encode(&mut out, frame, false)
            .map_err(|e| StoreError::Protocol(e.to_string()))?;
        self.stream.write_all(&out).await?;

        loop {
            // clone().freeze() gives us &Bytes without copying the data
            match decode_bytes(&self.buf.clone().freeze()) {
                Ok(Some((reply, consumed))) => {
                    let _ = self.buf.split_to(consumed);
                    return Ok(reply);
                }
                Ok(None) => {} // Need more data
                Err(e) => return Err(StoreError::Protocol(e.to_string())),
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "RESP server closed the connection",
                )));
            }
        }
    }
}
