//! Metadata framing.
//!
//! Wire layout of a framed reply:
//!
//! ```text
//! [4 bytes: big-endian u32 N][N bytes: UTF-8 JSON][remaining bytes: opaque audio]
//! ```
//!
//! [`FrameDecoder`] is a synchronous state machine fed with chunks in arrival order.
//! While the frame is incomplete it accumulates bytes in a [`BytesMut`]; the moment the
//! frame is complete the buffer is split into the metadata body and whatever audio bytes
//! arrived in the same chunk, and the buffer itself is released. Every later chunk passes
//! through untouched.
//!
//! A decoder created with [`FrameDecoder::passthrough`] starts past the frame, which is
//! how the unframed (plain audio) replies are handled.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{StreamError, StreamResult};

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Result of feeding one chunk to a [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// The frame is still incomplete; nothing to emit yet.
    Pending,
    /// The frame completed with this chunk.
    Metadata {
        /// Raw metadata body (`N` bytes, prefix stripped).
        body: Bytes,
        /// Audio bytes that followed the frame in the same chunk(s), if any.
        payload: Option<Bytes>,
    },
    /// Payload bytes, passed through unchanged.
    Payload(Bytes),
}

#[derive(Debug)]
enum Phase {
    /// Accumulating the prefix and body.
    Frame(BytesMut),
    /// Frame consumed (or never present).
    Payload,
}

/// Splits a byte stream into a leading metadata frame and the payload after it.
#[derive(Debug)]
pub struct FrameDecoder {
    phase: Phase,
    max_metadata_len: usize,
}

impl FrameDecoder {
    /// Decoder for a reply that starts with a metadata frame.
    pub fn framed(max_metadata_len: usize) -> Self {
        Self {
            phase: Phase::Frame(BytesMut::new()),
            max_metadata_len,
        }
    }

    /// Decoder for a reply without a metadata frame.
    pub fn passthrough() -> Self {
        Self {
            phase: Phase::Payload,
            max_metadata_len: 0,
        }
    }

    /// Whether the decoder is still waiting for (part of) the metadata frame.
    pub fn awaiting_metadata(&self) -> bool {
        matches!(self.phase, Phase::Frame(_))
    }

    /// Number of bytes currently held in the accumulation buffer.
    pub fn buffered(&self) -> usize {
        match &self.phase {
            Phase::Frame(buf) => buf.len(),
            Phase::Payload => 0,
        }
    }

    /// Feed the next chunk.
    ///
    /// Fails with [`StreamError::MetadataTooLarge`] as soon as the prefix declares a body
    /// above the configured limit. After a failure the decoder must be discarded.
    pub fn push(&mut self, chunk: Bytes) -> StreamResult<FrameEvent> {
        let buf = match &mut self.phase {
            Phase::Payload => return Ok(FrameEvent::Payload(chunk)),
            Phase::Frame(buf) => buf,
        };

        buf.extend_from_slice(&chunk);
        if buf.len() < LENGTH_PREFIX_LEN {
            trace!(buffered = buf.len(), "waiting for metadata length prefix");
            return Ok(FrameEvent::Pending);
        }

        let declared = (&buf[..LENGTH_PREFIX_LEN]).get_u32();
        let body_len = declared as usize;
        if body_len > self.max_metadata_len {
            return Err(StreamError::MetadataTooLarge {
                length: declared,
                limit: self.max_metadata_len,
            });
        }

        let frame_len = LENGTH_PREFIX_LEN + body_len;
        if buf.len() < frame_len {
            trace!(buffered = buf.len(), frame_len, "waiting for metadata body");
            return Ok(FrameEvent::Pending);
        }

        let mut frame = std::mem::take(buf);
        self.phase = Phase::Payload;

        frame.advance(LENGTH_PREFIX_LEN);
        let body = frame.split_to(body_len).freeze();
        let payload = (!frame.is_empty()).then(|| frame.freeze());
        trace!(
            metadata_len = body_len,
            leftover = payload.as_ref().map_or(0, Bytes::len),
            "metadata frame complete"
        );

        Ok(FrameEvent::Metadata { body, payload })
    }

    /// Signal end of input.
    ///
    /// Fails with a truncation error if the frame never completed.
    pub fn finish(&self) -> StreamResult<()> {
        match &self.phase {
            Phase::Payload => Ok(()),
            Phase::Frame(buf) if buf.len() < LENGTH_PREFIX_LEN => {
                Err(StreamError::TruncatedPrefix {
                    received: buf.len(),
                })
            }
            Phase::Frame(buf) => Err(StreamError::TruncatedMetadata {
                expected: (&buf[..LENGTH_PREFIX_LEN]).get_u32(),
                received: buf.len() - LENGTH_PREFIX_LEN,
            }),
        }
    }
}

/// Encode a metadata frame: big-endian length prefix followed by `body`.
pub fn encode_metadata_frame(body: &[u8]) -> StreamResult<Bytes> {
    let len = u32::try_from(body.len())
        .map_err(|_| StreamError::InvalidParams("metadata body longer than u32::MAX"))?;
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_LEN + body.len());
    out.put_u32(len);
    out.put_slice(body);
    Ok(out.freeze())
}
