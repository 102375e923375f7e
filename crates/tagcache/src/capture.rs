//! Recording a response on its way to the client.
//!
//! [`CaptureBody`] wraps the downstream body and implements the same
//! `http_body::Body` capability. Every frame is forwarded unchanged; data
//! frames are also copied into a buffer. When the response finishes the
//! recording is delivered once through a oneshot channel, whether the body
//! ended normally, failed, or was dropped half-way (client disconnect).

use axum::body::Body;
use axum::http::response::Parts;
use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tagcache_store::CachedResponse;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a capture did not produce a storable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("response body failed: {0}")]
    Body(String),

    #[error("response was dropped before it finished")]
    Aborted,
}

/// Resolves once with the recorded response, or with the reason there is none.
pub type Completion = oneshot::Receiver<Result<CachedResponse, CaptureError>>;

struct Recorder {
    status: StatusCode,
    headers: HeaderMap,
    buf: BytesMut,
    tx: oneshot::Sender<Result<CachedResponse, CaptureError>>,
}

impl Recorder {
    fn finish(self, outcome: Result<(), CaptureError>) {
        let result = outcome.map(|()| CachedResponse {
            status: self.status.as_u16(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_owned(),
                        Bytes::copy_from_slice(value.as_bytes()),
                    )
                })
                .collect(),
            body: self.buf.freeze(),
        });
        // Receiver gone means nobody wants the recording.
        let _ = self.tx.send(result);
    }
}

/// Body decorator that records what it forwards.
pub struct CaptureBody<B: HttpBody = Body> {
    inner: B,
    // Taken exactly once, by whichever of end / error / drop happens first.
    recorder: Option<Recorder>,
}

impl<B: HttpBody> CaptureBody<B> {
    /// Wrap `inner`, snapshotting status and headers from `head` now.
    ///
    /// Headers added to `head` after this call are not recorded.
    pub fn new(inner: B, head: &Parts) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let recorder = Recorder {
            status: head.status,
            headers: head.headers.clone(),
            buf: BytesMut::new(),
            tx,
        };
        (
            Self {
                inner,
                recorder: Some(recorder),
            },
            rx,
        )
    }
}

impl<B> HttpBody for CaptureBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let (Some(data), Some(recorder)) = (frame.data_ref(), this.recorder.as_mut()) {
                    recorder.buf.extend_from_slice(data);
                }
            }
            Some(Err(e)) => {
                if let Some(recorder) = this.recorder.take() {
                    recorder.finish(Err(CaptureError::Body(e.to_string())));
                }
            }
            None => {
                if let Some(recorder) = this.recorder.take() {
                    recorder.finish(Ok(()));
                }
            }
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: HttpBody> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            // Servers stop polling once `is_end_stream` reports true, so a
            // finished body may be dropped without ever yielding `None`.
            if self.inner.is_end_stream() {
                recorder.finish(Ok(()));
            } else {
                recorder.finish(Err(CaptureError::Aborted));
            }
        }
    }
}
