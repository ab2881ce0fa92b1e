//! Reply demultiplexer.
//!
//! A [`Demuxer`] turns one [`ChunkReader`] into a [`Demuxed`] reply: the decoded
//! [`MetadataRecord`] (framed replies only) and an [`AudioChunks`] stream with the rest of
//! the body.
//!
//! # Contract
//! - [`Demuxer::into_parts`] reads only as far as the end of the metadata frame. It returns
//!   after the record is decoded, so the record is always in the caller's hands before the
//!   first audio chunk can be polled.
//! - Audio chunks concatenate to exactly the bytes after the frame, in order. Bytes that
//!   arrived in the same network chunk as the end of the frame come out first.
//! - Framing or decode failures surface from `into_parts`; no audio stream is produced.
//! - A source failure after the frame is yielded once by [`AudioChunks`], which then ends.
//! - Dropping [`AudioChunks`] drops the underlying source (for HTTP: closes the body).
//!
//! Plain replies go through the same type with the frame phase skipped.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tracing::{debug, trace};

use crate::error::{BoxError, StreamError, StreamResult};
use crate::framing::{FrameDecoder, FrameEvent};
use crate::metadata::MetadataRecord;
use crate::reader::ChunkReader;
use crate::settings::DemuxSettings;

/// Splits one reply body into metadata and audio.
pub struct Demuxer<S> {
    reader: ChunkReader<S>,
    decoder: FrameDecoder,
}

/// A reply split into its parts.
pub struct Demuxed<S> {
    /// Decoded metadata; `None` for plain replies.
    pub metadata: Option<MetadataRecord>,
    /// Audio payload.
    pub audio: AudioChunks<S>,
}

// Manual impls: HTTP body streams are not `Debug`.
impl<S> fmt::Debug for Demuxer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demuxer")
            .field("reader", &self.reader)
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl<S> fmt::Debug for Demuxed<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demuxed")
            .field("metadata", &self.metadata)
            .field("audio", &self.audio)
            .finish()
    }
}

impl<S> Demuxer<S> {
    /// Demultiplexer for a reply that starts with a metadata frame.
    pub fn framed(reader: ChunkReader<S>, settings: &DemuxSettings) -> Self {
        Self {
            reader: reader.with_empty_chunks(settings.empty_chunks),
            decoder: FrameDecoder::framed(settings.max_metadata_len),
        }
    }

    /// Demultiplexer for a reply that is audio from the first byte.
    pub fn plain(reader: ChunkReader<S>) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::passthrough(),
        }
    }

    /// Skip straight to the audio stream of a plain reply.
    ///
    /// Fails with [`StreamError::InvalidParams`] on a framed demuxer; use
    /// [`Demuxer::into_parts`] there.
    pub fn into_audio(self) -> StreamResult<AudioChunks<S>> {
        if self.decoder.awaiting_metadata() {
            return Err(StreamError::InvalidParams(
                "framed reply must be split with into_parts",
            ));
        }
        Ok(AudioChunks::new(self.reader, None))
    }
}

impl<S, E> Demuxer<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    /// Read and decode the metadata frame, then hand over the rest as audio.
    ///
    /// For plain replies this does no I/O.
    pub async fn into_parts(self) -> StreamResult<Demuxed<S>> {
        let Self {
            mut reader,
            mut decoder,
        } = self;

        while decoder.awaiting_metadata() {
            let Some(chunk) = reader.next_chunk().await? else {
                decoder.finish()?;
                break;
            };

            match decoder.push(chunk)? {
                FrameEvent::Pending => {}
                FrameEvent::Metadata { body, payload } => {
                    let record = MetadataRecord::decode(&body)?;
                    debug!(
                        source = reader.label(),
                        metadata_len = body.len(),
                        actions = record.actions.len(),
                        leftover = payload.as_ref().map_or(0, Bytes::len),
                        "metadata frame decoded"
                    );
                    return Ok(Demuxed {
                        metadata: Some(record),
                        audio: AudioChunks::new(reader, payload),
                    });
                }
                FrameEvent::Payload(chunk) => {
                    return Ok(Demuxed {
                        metadata: None,
                        audio: AudioChunks::new(reader, Some(chunk)),
                    });
                }
            }
        }

        Ok(Demuxed {
            metadata: None,
            audio: AudioChunks::new(reader, None),
        })
    }
}

/// Lazy, ordered, single-consumer stream of audio chunks.
pub struct AudioChunks<S> {
    reader: ChunkReader<S>,
    leftover: Option<Bytes>,
    chunks: u64,
    bytes: u64,
    finished: bool,
}

impl<S> fmt::Debug for AudioChunks<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChunks")
            .field("reader", &self.reader)
            .field("leftover", &self.leftover.as_ref().map(Bytes::len))
            .field("chunks", &self.chunks)
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl<S> AudioChunks<S> {
    fn new(reader: ChunkReader<S>, leftover: Option<Bytes>) -> Self {
        Self {
            reader,
            leftover: leftover.filter(|b| !b.is_empty()),
            chunks: 0,
            bytes: 0,
            finished: false,
        }
    }

    /// Audio chunks emitted so far.
    pub fn chunks_emitted(&self) -> u64 {
        self.chunks
    }

    /// Audio bytes emitted so far.
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes
    }

    fn emit(&mut self, chunk: Bytes) -> Poll<Option<StreamResult<Bytes>>> {
        self.chunks += 1;
        self.bytes += chunk.len() as u64;
        trace!(chunk = self.chunks, len = chunk.len(), "audio chunk");
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl<S, E> Stream for AudioChunks<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    type Item = StreamResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.leftover.take() {
            return this.emit(chunk);
        }

        match this.reader.poll_next_chunk(cx) {
            Poll::Ready(Ok(Some(chunk))) => this.emit(chunk),
            Poll::Ready(Ok(None)) => {
                if !this.finished {
                    this.finished = true;
                    debug!(
                        source = this.reader.label(),
                        chunks = this.chunks,
                        bytes = this.bytes,
                        "audio stream finished"
                    );
                }
                Poll::Ready(None)
            }
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}
