//! Chunk reader over an arbitrary byte source.
//!
//! [`ChunkReader`] pulls `Bytes` chunks from any `Stream<Item = Result<Bytes, E>>`
//! (an HTTP body, a [`ReaderStream`] over an `AsyncRead`, an in-memory iterator in tests)
//! one at a time and in order. It adds the source-level policies the demultiplexer relies on:
//! - errors from the source are mapped into [`StreamError::Source`] and end the reader;
//! - zero-length chunks are skipped or rejected according to [`EmptyChunkPolicy`];
//! - an optional idle timeout bounds the wait for the next chunk;
//! - an optional [`CancellationToken`] is checked before every read.
//!
//! After the first error or the end of the source the reader is fused and keeps
//! returning `Ok(None)`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::AsyncRead;
use tokio::time::{Instant, Sleep};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace};

use crate::error::{BoxError, StreamError, StreamResult};
use crate::settings::EmptyChunkPolicy;

/// Ordered, single-consumer reader of byte chunks.
pub struct ChunkReader<S> {
    inner: S,
    label: Arc<str>,
    empty_chunks: EmptyChunkPolicy,

    idle_timeout: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
    idle_armed: bool,

    cancel: Option<Pin<Box<WaitForCancellationFutureOwned>>>,

    chunks: u64,
    bytes: u64,
    done: bool,
}

impl<S> std::fmt::Debug for ChunkReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("label", &self.label)
            .field("empty_chunks", &self.empty_chunks)
            .field("idle_timeout", &self.idle_timeout)
            .field("chunks", &self.chunks)
            .field("bytes", &self.bytes)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S> ChunkReader<S> {
    /// Wrap a chunk source.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            label: Arc::from("byte source"),
            empty_chunks: EmptyChunkPolicy::default(),
            idle_timeout: None,
            idle: None,
            idle_armed: false,
            cancel: None,
            chunks: 0,
            bytes: 0,
            done: false,
        }
    }

    /// Name used in logs and timeout errors (typically the request URL).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the zero-length chunk policy.
    #[must_use]
    pub fn with_empty_chunks(mut self, policy: EmptyChunkPolicy) -> Self {
        self.empty_chunks = policy;
        self
    }

    /// Fail with [`StreamError::Timeout`] when no chunk arrives within `timeout`.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Fail with [`StreamError::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(Box::pin(token.cancelled_owned()));
        self
    }

    /// Non-empty chunks delivered so far.
    pub fn chunks_read(&self) -> u64 {
        self.chunks
    }

    /// Bytes delivered so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Whether the source has ended or failed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<R> ChunkReader<ReaderStream<R>>
where
    R: AsyncRead + Unpin,
{
    /// Read chunks from any [`AsyncRead`].
    pub fn from_async_read(reader: R) -> Self {
        Self::new(ReaderStream::new(reader))
    }
}

impl<S, E> ChunkReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    /// Read the next chunk; `Ok(None)` signals the end of the source.
    pub async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        std::future::poll_fn(|cx| self.poll_next_chunk(cx)).await
    }

    /// Poll-based form of [`next_chunk`](Self::next_chunk).
    pub fn poll_next_chunk(&mut self, cx: &mut Context<'_>) -> Poll<StreamResult<Option<Bytes>>> {
        if self.done {
            return Poll::Ready(Ok(None));
        }

        if let Some(cancel) = self.cancel.as_mut() {
            if cancel.as_mut().poll(cx).is_ready() {
                debug!(source = %self.label, chunks = self.chunks, "read cancelled");
                return Poll::Ready(self.fail(StreamError::Cancelled));
            }
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        match self.empty_chunks {
                            EmptyChunkPolicy::Skip => {
                                trace!(source = %self.label, "skipping zero-length chunk");
                                continue;
                            }
                            EmptyChunkPolicy::Reject => {
                                return Poll::Ready(self.fail(StreamError::EmptyChunk));
                            }
                        }
                    }

                    self.chunks += 1;
                    self.bytes += chunk.len() as u64;
                    self.idle_armed = false;
                    trace!(
                        source = %self.label,
                        chunk = self.chunks,
                        len = chunk.len(),
                        "chunk received"
                    );
                    return Poll::Ready(Ok(Some(chunk)));
                }
                Poll::Ready(Some(Err(e))) => {
                    let err = StreamError::source_failed(e);
                    debug!(source = %self.label, chunks = self.chunks, error = %err, "source failed");
                    return Poll::Ready(self.fail(err));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    debug!(
                        source = %self.label,
                        chunks = self.chunks,
                        bytes = self.bytes,
                        "source exhausted"
                    );
                    return Poll::Ready(Ok(None));
                }
                Poll::Pending => break,
            }
        }

        if let Some(timeout) = self.idle_timeout {
            let sleep = self
                .idle
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
            if !self.idle_armed {
                sleep.as_mut().reset(Instant::now() + timeout);
                self.idle_armed = true;
            }
            if sleep.as_mut().poll(cx).is_ready() {
                debug!(source = %self.label, ?timeout, "no chunk within idle timeout");
                let err = StreamError::Timeout(self.label.to_string());
                return Poll::Ready(self.fail(err));
            }
        }

        Poll::Pending
    }

    fn fail(&mut self, err: StreamError) -> StreamResult<Option<Bytes>> {
        self.done = true;
        Err(err)
    }
}

impl<S, E> Stream for ChunkReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    type Item = StreamResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .poll_next_chunk(cx)
            .map(|res| res.transpose())
    }
}
