//! Event-stream decoding.
//!
//! Some operations answer with a framed binary stream of events instead of
//! a single body. [`EventStream`] exposes such a response as an async
//! sequence: it accumulates raw chunks in a frame buffer, splits out each
//! complete frame (frames are length-prefixed with a big-endian total
//! length), and hands the frame to an injected [`EventParser`] that knows
//! the event shape. The sequence is finite — it terminates when the
//! underlying stream ends — and is not restartable. There is no blocking
//! iteration surface; the only way to consume events is through the
//! [`futures::Stream`] implementation.

use crate::body::StreamingBody;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Frames below this size cannot hold a prelude and trailing checksum.
const MIN_FRAME_LEN: usize = 16;
/// Sanity cap on a declared frame length.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Decodes one complete frame into an event document.
///
/// Implementations come from the embedding SDK and are constructed against
/// the event-shape descriptor of the operation being streamed.
pub trait EventParser: Send + Sync {
    /// Parses the full frame bytes (prelude included) into an event.
    fn parse_event(&self, frame: &[u8]) -> Result<Value>;
}

/// An async sequence of decoded events over a framed byte stream.
///
/// Events are yielded strictly in arrival order; the next frame is not
/// decoded until the previous event has been consumed. After a framing or
/// parse error the sequence is poisoned and ends.
pub struct EventStream {
    stream: BoxStream<'static, Result<Bytes>>,
    parser: Arc<dyn EventParser>,
    buffer: BytesMut,
    done: bool,
    failed: bool,
}

impl EventStream {
    /// Wraps a raw byte stream with an event parser.
    pub fn new(stream: BoxStream<'static, Result<Bytes>>, parser: Arc<dyn EventParser>) -> Self {
        Self {
            stream,
            parser,
            buffer: BytesMut::new(),
            done: false,
            failed: false,
        }
    }

    /// Builds an event stream from a streaming response body.
    pub fn from_body(body: StreamingBody, parser: Arc<dyn EventParser>) -> Self {
        Self::new(body.into_inner(), parser)
    }

    /// Returns the declared length of the next frame, if the prelude has
    /// arrived.
    fn next_frame_len(&self) -> Result<Option<usize>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.buffer[..4]);
        let total = u32::from_be_bytes(prefix) as usize;
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total) {
            return Err(Error::EventStreamFrame(format!(
                "declared frame length {total} is outside {MIN_FRAME_LEN}..{MAX_FRAME_LEN}"
            )));
        }
        Ok(Some(total))
    }
}

impl Stream for EventStream {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        loop {
            match this.next_frame_len() {
                Err(e) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Ok(Some(len)) if this.buffer.len() >= len => {
                    let frame = this.buffer.split_to(len).freeze();
                    return match this.parser.parse_event(&frame) {
                        Ok(event) => Poll::Ready(Some(Ok(event))),
                        Err(e) => {
                            this.failed = true;
                            Poll::Ready(Some(Err(e)))
                        }
                    };
                }
                Ok(_) => {}
            }
            if this.done {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                this.failed = true;
                return Poll::Ready(Some(Err(Error::EventStreamFrame(format!(
                    "stream ended with {} bytes of an unfinished frame",
                    this.buffer.len()
                )))));
            }
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use serde_json::json;

    /// Parses the payload between the 12-byte prelude and the 4-byte
    /// trailing checksum as UTF-8.
    struct PayloadParser;

    impl EventParser for PayloadParser {
        fn parse_event(&self, frame: &[u8]) -> Result<Value> {
            let payload = &frame[12..frame.len() - 4];
            Ok(json!({ "payload": String::from_utf8_lossy(payload) }))
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let total = (payload.len() + MIN_FRAME_LEN) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]); // rest of the prelude
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0u8; 4]); // trailing checksum
        out
    }

    fn events_over(chunks: Vec<Vec<u8>>) -> EventStream {
        let items: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        EventStream::new(stream::iter(items).boxed(), Arc::new(PayloadParser))
    }

    #[tokio::test]
    async fn two_events_then_end() {
        let mut bytes = frame(b"first");
        bytes.extend_from_slice(&frame(b"second"));
        let mut events = events_over(vec![bytes]);

        assert_eq!(
            events.next().await.unwrap().unwrap(),
            json!({"payload": "first"})
        );
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            json!({"payload": "second"})
        );
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reassembled() {
        let bytes = frame(b"split-me");
        let (a, b) = bytes.split_at(7);
        let mut events = events_over(vec![a.to_vec(), b.to_vec()]);

        assert_eq!(
            events.next().await.unwrap().unwrap(),
            json!({"payload": "split-me"})
        );
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_trailing_frame_is_an_error() {
        let mut bytes = frame(b"whole");
        bytes.extend_from_slice(&frame(b"cut")[..10]);
        let mut events = events_over(vec![bytes]);

        assert!(events.next().await.unwrap().is_ok());
        assert!(matches!(
            events.next().await,
            Some(Err(Error::EventStreamFrame(_)))
        ));
        // Poisoned after the error.
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn absurd_frame_length_is_an_error() {
        let mut bytes = vec![0u8; 4]; // declared length 0
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut events = events_over(vec![bytes]);
        assert!(matches!(
            events.next().await,
            Some(Err(Error::EventStreamFrame(_)))
        ));
    }
}
