//! Hand-off from a demultiplexed reply to the chat view and the playback engine.
//!
//! [`hand_off`] is the single place where the ordering guarantee is enforced at the
//! boundary: the metadata record is given to the [`MetadataSink`] before the first audio
//! chunk is given to the [`PlaybackDriver`]. A failure while streaming audio aborts the
//! driver and is returned to the caller; nothing is retried.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::demux::Demuxed;
use crate::error::{BoxError, StreamError, StreamResult};
use crate::metadata::MetadataRecord;

/// Receives the metadata record of a framed reply (e.g. renders the message).
pub trait MetadataSink {
    fn on_metadata(&mut self, record: &MetadataRecord);
}

impl<F> MetadataSink for F
where
    F: FnMut(&MetadataRecord),
{
    fn on_metadata(&mut self, record: &MetadataRecord) {
        self(record)
    }
}

/// Consumes audio chunks in order.
#[allow(async_fn_in_trait)]
pub trait PlaybackDriver {
    /// Play (or enqueue) the next chunk.
    async fn play(&mut self, chunk: Bytes) -> StreamResult<()>;

    /// The reply ended normally.
    async fn finish(&mut self) -> StreamResult<()> {
        Ok(())
    }

    /// The reply failed; stop playback.
    async fn abort(&mut self, _err: &StreamError) {}
}

/// Counters reported after a completed hand-off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub had_metadata: bool,
    pub chunks: u64,
    pub bytes: u64,
}

/// Deliver metadata to `sink`, then stream every audio chunk to `driver`.
pub async fn hand_off<S, E, M, P>(
    reply: Demuxed<S>,
    sink: &mut M,
    driver: &mut P,
) -> StreamResult<PlaybackSummary>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
    M: MetadataSink + ?Sized,
    P: PlaybackDriver,
{
    let Demuxed {
        metadata,
        mut audio,
    } = reply;

    let mut summary = PlaybackSummary {
        had_metadata: metadata.is_some(),
        ..PlaybackSummary::default()
    };

    if let Some(record) = &metadata {
        sink.on_metadata(record);
    }

    while let Some(next) = audio.next().await {
        let chunk = match next {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(chunks = summary.chunks, error = %e, "audio stream failed");
                driver.abort(&e).await;
                return Err(e);
            }
        };

        summary.chunks += 1;
        summary.bytes += chunk.len() as u64;
        if let Err(e) = driver.play(chunk).await {
            driver.abort(&e).await;
            return Err(e);
        }
    }

    driver.finish().await?;
    debug!(
        chunks = summary.chunks,
        bytes = summary.bytes,
        "playback hand-off complete"
    );
    Ok(summary)
}

/// Messages delivered by a [`QueueDriver`].
#[derive(Debug)]
pub enum PlaybackMsg {
    /// Next audio chunk.
    Chunk(Bytes),
    /// The reply ended normally.
    End,
    /// The reply failed; the message carries the error text.
    Aborted(String),
}

/// [`PlaybackDriver`] that forwards chunks into a bounded channel.
///
/// The receiving side is typically a playback task. The bound gives backpressure: the
/// network is not read faster than the consumer drains the channel.
#[derive(Debug, Clone)]
pub struct QueueDriver {
    tx: mpsc::Sender<PlaybackMsg>,
}

impl QueueDriver {
    /// Create a driver and the receiver it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PlaybackMsg>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, msg: PlaybackMsg) -> StreamResult<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| StreamError::Cancelled.with_context("playback receiver dropped"))
    }
}

impl PlaybackDriver for QueueDriver {
    async fn play(&mut self, chunk: Bytes) -> StreamResult<()> {
        self.send(PlaybackMsg::Chunk(chunk)).await
    }

    async fn finish(&mut self) -> StreamResult<()> {
        self.send(PlaybackMsg::End).await
    }

    async fn abort(&mut self, err: &StreamError) {
        // The receiver may already be gone.
        let _ = self.send(PlaybackMsg::Aborted(err.to_string())).await;
    }
}
