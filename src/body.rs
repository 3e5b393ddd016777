//! Streaming response bodies.
//!
//! [`StreamingBody`] wraps the transport's raw byte stream and is what
//! callers of streaming-output operations receive. It offers bounded
//! reads, chunked and line-based async iteration, and verifies the number
//! of bytes read against the declared content length — a short body
//! raises an incomplete-read error even if the caller already consumed
//! partial data.

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Default size of chunks yielded by async iteration.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// A response body consumed as a stream.
///
/// Async iteration yields fixed-size chunks (default 1 KiB, adjustable
/// with [`StreamingBody::chunks`]); [`StreamingBody::read`] gives bounded
/// reads; [`StreamingBody::lines`] reassembles lines across chunk
/// boundaries. Once the caller holds a `StreamingBody` it owns the
/// underlying stream and is responsible for draining or dropping it.
pub struct StreamingBody {
    stream: Option<BoxStream<'static, Result<Bytes>>>,
    buffer: BytesMut,
    content_length: Option<u64>,
    bytes_read: u64,
    chunk_size: usize,
    exhausted: bool,
    verified: bool,
}

impl StreamingBody {
    /// Wraps a raw stream with an optional declared content length.
    pub fn new(stream: BoxStream<'static, Result<Bytes>>, content_length: Option<u64>) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::new(),
            content_length,
            bytes_read: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            exhausted: false,
            verified: false,
        }
    }

    /// The content length the response declared, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Bytes pulled off the underlying stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads up to `limit` bytes, or the full remainder when `limit` is
    /// `None`.
    ///
    /// A read that observes the end of the stream verifies the byte count
    /// against the declared content length and fails with an
    /// incomplete-read error on mismatch.
    pub async fn read(&mut self, limit: Option<usize>) -> Result<Bytes> {
        match limit {
            None => {
                self.fill(usize::MAX).await?;
                let out = self.buffer.split().freeze();
                if self.exhausted {
                    self.verify()?;
                }
                Ok(out)
            }
            Some(limit) => {
                self.fill(limit).await?;
                if self.buffer.is_empty() {
                    if self.exhausted {
                        self.verify()?;
                    }
                    return Ok(Bytes::new());
                }
                let take = limit.min(self.buffer.len());
                Ok(self.buffer.split_to(take).freeze())
            }
        }
    }

    /// Sets the chunk size used by async iteration.
    ///
    /// Every yielded chunk has exactly `size` bytes except the final one.
    pub fn chunks(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Converts this body into a line stream.
    ///
    /// Lines are split on `\n` (a preceding `\r` is stripped); a partial
    /// line at the end of one chunk is prepended to the next, and a
    /// trailing unterminated line is yielded last.
    pub fn lines(self, chunk_size: usize) -> Lines {
        Lines {
            body: self.chunks(chunk_size),
            pending: BytesMut::new(),
            done: false,
        }
    }

    /// Releases the underlying stream.
    ///
    /// Any buffered bytes are discarded and no length verification is
    /// performed; subsequent reads return empty.
    pub fn close(&mut self) {
        self.stream = None;
        self.buffer.clear();
    }

    /// Consumes the body and returns the remaining raw stream.
    ///
    /// Buffered bytes, if any, are replayed ahead of the stream. Used to
    /// hand a streaming response over to an event-stream decoder.
    pub fn into_inner(mut self) -> BoxStream<'static, Result<Bytes>> {
        let buffered = self.buffer.split().freeze();
        let inner = self.stream.take().unwrap_or_else(|| stream::empty().boxed());
        if buffered.is_empty() {
            inner
        } else {
            stream::iter([Ok(buffered)]).chain(inner).boxed()
        }
    }

    /// Pulls from the underlying stream until `target` bytes are buffered
    /// or the stream ends.
    async fn fill(&mut self, target: usize) -> Result<()> {
        while self.buffer.len() < target {
            let Some(inner) = self.stream.as_mut() else {
                break;
            };
            match inner.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_read += chunk.len() as u64;
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.stream = None;
                    self.exhausted = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn verify(&self) -> Result<()> {
        if let Some(expected) = self.content_length {
            if self.bytes_read != expected {
                return Err(Error::IncompleteRead {
                    actual: self.bytes_read,
                    expected,
                });
            }
        }
        Ok(())
    }
}

impl Stream for StreamingBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.buffer.len() >= this.chunk_size {
                let chunk = this.buffer.split_to(this.chunk_size).freeze();
                return Poll::Ready(Some(Ok(chunk)));
            }
            match this.stream.as_mut() {
                Some(inner) => match inner.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(chunk))) => {
                        this.bytes_read += chunk.len() as u64;
                        this.buffer.extend_from_slice(&chunk);
                    }
                    Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                    Poll::Ready(None) => {
                        this.stream = None;
                        this.exhausted = true;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                None => {
                    if !this.buffer.is_empty() {
                        let rest = this.buffer.split().freeze();
                        return Poll::Ready(Some(Ok(rest)));
                    }
                    if this.exhausted && !this.verified {
                        this.verified = true;
                        if let Err(e) = this.verify() {
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBody")
            .field("content_length", &self.content_length)
            .field("bytes_read", &self.bytes_read)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Async line iterator over a [`StreamingBody`].
pub struct Lines {
    body: StreamingBody,
    pending: BytesMut,
    done: bool,
}

impl Stream for Lines {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(pos) = this.pending.iter().position(|&b| b == b'\n') {
                let mut line = this.pending.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Poll::Ready(Some(Ok(line.freeze())));
            }
            if this.done {
                if this.pending.is_empty() {
                    return Poll::Ready(None);
                }
                let last = this.pending.split().freeze();
                return Poll::Ready(Some(Ok(last)));
            }
            match Pin::new(&mut this.body).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.pending.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_from(chunks: Vec<&'static [u8]>, content_length: Option<u64>) -> StreamingBody {
        let items: Vec<Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c)))
            .collect();
        StreamingBody::new(stream::iter(items).boxed(), content_length)
    }

    #[tokio::test]
    async fn read_one_byte_then_remainder() {
        let mut body = body_from(vec![b"body contents"], Some(13));
        assert_eq!(&body.read(Some(1)).await.unwrap()[..], b"b");
        // The second read drains the stream and passes length verification.
        assert_eq!(&body.read(None).await.unwrap()[..], b"ody contents");
        assert_eq!(body.bytes_read(), 13);
    }

    #[tokio::test]
    async fn short_body_raises_incomplete_read_on_the_next_read() {
        let mut body = body_from(vec![b"123456789"], Some(10));
        assert_eq!(&body.read(Some(9)).await.unwrap()[..], b"123456789");

        match body.read(Some(9)).await {
            Err(Error::IncompleteRead { actual, expected }) => {
                assert_eq!(actual, 9);
                assert_eq!(expected, 10);
            }
            other => panic!("expected IncompleteRead, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn matching_length_verifies_cleanly() {
        let mut body = body_from(vec![b"12345", b"6789"], Some(9));
        let all = body.read(None).await.unwrap();
        assert_eq!(&all[..], b"123456789");
        assert_eq!(&body.read(None).await.unwrap()[..], b"");
    }

    #[tokio::test]
    async fn default_iteration_yields_kilobyte_chunks() {
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let payload: &'static [u8] = Box::leak(payload.into_boxed_slice());
        let mut body = body_from(vec![payload], Some(2500));

        let mut sizes = Vec::new();
        while let Some(chunk) = body.next().await {
            sizes.push(chunk.unwrap().len());
        }
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[tokio::test]
    async fn explicit_chunk_size_is_exact_except_the_last() {
        let mut body = body_from(vec![b"abc", b"defgh", b"ij"], None).chunks(4);
        let mut chunks = Vec::new();
        while let Some(chunk) = body.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh"), Bytes::from_static(b"ij")]);
    }

    #[tokio::test]
    async fn stream_iteration_surfaces_incomplete_read() {
        let mut body = body_from(vec![b"123456789"], Some(10)).chunks(4);
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"1234");
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"5678");
        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"9");
        assert!(matches!(
            body.next().await,
            Some(Err(Error::IncompleteRead {
                actual: 9,
                expected: 10
            }))
        ));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn lines_reassemble_across_chunks() {
        let mut lines = body_from(vec![b"ab\ncd", b"ef\r\n", b"gh"], None).lines(3);
        let mut collected = Vec::new();
        while let Some(line) = lines.next().await {
            collected.push(line.unwrap());
        }
        assert_eq!(
            collected,
            vec![
                Bytes::from_static(b"ab"),
                Bytes::from_static(b"cdef"),
                Bytes::from_static(b"gh")
            ]
        );
    }

    #[tokio::test]
    async fn close_releases_without_verification() {
        let mut body = body_from(vec![b"123456789"], Some(100));
        let _ = body.read(Some(4)).await.unwrap();
        body.close();
        assert_eq!(&body.read(None).await.unwrap()[..], b"");
    }

    #[tokio::test]
    async fn into_inner_replays_buffered_bytes() {
        let mut body = body_from(vec![b"abcdef"], None);
        let first = body.read(Some(2)).await.unwrap();
        assert_eq!(&first[..], b"ab");

        let mut raw = body.into_inner();
        let mut rest = Vec::new();
        while let Some(chunk) = raw.next().await {
            rest.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(&rest[..], b"cdef");
    }
}
