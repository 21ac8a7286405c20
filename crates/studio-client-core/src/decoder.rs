//! Incremental JSON framing over a streamed response body.
//!
//! The server writes one JSON document per flush with no delimiter. Bytes are
//! accumulated and, after every chunk, every complete document at the front
//! of the buffer is emitted and removed. An incomplete remainder waits for
//! more bytes; whatever is left when the body ends is dropped.
//!
//! Protocol assumption: a chunk boundary never splits a top-level scalar such
//! that its prefix is valid JSON on its own. `123` followed by `4` in the next
//! chunk decodes as two values, `123` and `4`. Chunk boundaries are controlled
//! by the server, so this is accepted rather than worked around.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, ready};
use serde_json::Value;

/// Stream of JSON values decoded from a stream of byte chunks.
///
/// Finite and not restartable: it ends when the body ends, or right after
/// yielding the first error from the body.
pub struct JsonStream<S> {
    inner: S,
    buffer: BytesMut,
    ready: VecDeque<Value>,
    done: bool,
}

impl<S> JsonStream<S> {
    /// Wrap a byte stream.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Number of bytes waiting for the rest of a document.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        let mut values = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        let mut consumed = 0;
        loop {
            match values.next() {
                Some(Ok(value)) => {
                    consumed = values.byte_offset();
                    self.ready.push_back(value);
                }
                Some(Err(e)) if e.is_eof() => {
                    tracing::trace!(buffered = self.buffer.len() - consumed, "incomplete JSON, buffering");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "JSON parse error, buffering");
                    break;
                }
                None => {
                    consumed = values.byte_offset();
                    break;
                }
            }
        }
        self.buffer.advance(consumed);
    }

    fn finish(&mut self) {
        self.done = true;
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            tracing::warn!(
                bytes = self.buffer.len(),
                "dropping undecoded data at end of stream"
            );
        }
        self.buffer.clear();
    }
}

impl<S, E> Stream for JsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Value, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(value) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(value)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.push_chunk(&chunk),
                Some(Err(e)) => {
                    this.finish();
                    return Poll::Ready(Some(Err(e)));
                }
                None => this.finish(),
            }
        }
    }
}
