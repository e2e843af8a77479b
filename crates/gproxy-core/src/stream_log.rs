//! Wraps a streamed upstream body so the Request Logger can capture
//! time-to-first-byte and emit its record once the stream ends or the caller
//! disconnects, without buffering the body itself.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;

pub struct LoggingStream {
    inner: ReceiverStream<Bytes>,
    start: Instant,
    first_byte_ms: Option<u64>,
    on_finish: Option<Box<dyn FnOnce(Option<u64>) + Send>>,
}

impl LoggingStream {
    pub fn new(
        rx: tokio::sync::mpsc::Receiver<Bytes>,
        start: Instant,
        on_finish: Box<dyn FnOnce(Option<u64>) + Send>,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            start,
            first_byte_ms: None,
            on_finish: Some(on_finish),
        }
    }
}

impl Stream for LoggingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                if this.first_byte_ms.is_none() && !chunk.is_empty() {
                    this.first_byte_ms = Some(this.start.elapsed().as_millis() as u64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if let Some(cb) = this.on_finish.take() {
                    cb(this.first_byte_ms);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// Fires on a dropped-before-exhausted stream too (caller disconnect
// mid-stream): no cooldown is applied for that case since `markFailure` was
// never called, only a best-effort log record with whatever latency was
// observed so far.
impl Drop for LoggingStream {
    fn drop(&mut self) {
        if let Some(cb) = self.on_finish.take() {
            cb(self.first_byte_ms);
        }
    }
}
