//! Client-side streaming for a talking-avatar backend.
//!
//! A backend reply is a single HTTP response body. Plain replies are audio from the
//! first byte. Framed replies start with a metadata frame:
//!
//! ```text
//! [u32 big-endian length N][N bytes UTF-8 JSON][audio bytes until end of body]
//! ```
//!
//! The frame may arrive split at any byte position across network chunks; the
//! result does not depend on where the splits fall. The metadata record is always
//! delivered before the first audio byte.
//!
//! This crate is composed of several modules:
//! - `reader`: `ChunkReader`, ordered chunk reads with idle timeout and cancellation.
//! - `framing`: `FrameDecoder`, incremental length-prefix + metadata body decoding.
//! - `metadata`: the decoded `MetadataRecord` and its `Action`s.
//! - `demux`: `Demuxer`, splitting a reply into metadata and an audio chunk stream.
//! - `playback`: hand-off of a demultiplexed reply to a sink and a playback driver.
//! - `session`: explicit per-conversation state.
//! - `client`: `AvatarClient`, the HTTP call sites.
//! - `settings`: demux and client configuration.
//! - `error`: unified error types.
//!
//! This file (`lib.rs`) acts as a facade: it re-exports the main types from the
//! internal modules to form the public API of the crate.

mod client;
mod demux;
mod error;
mod framing;
mod metadata;
mod playback;
mod reader;
mod session;
mod settings;

pub use crate::client::{
    AgentTurn, AvatarClient, ByteStream, FramedReply, LatestVideos, MediaUpload, ReplyAudio,
    VideoLink, VideoSegment,
};
pub use crate::demux::{AudioChunks, Demuxed, Demuxer};
pub use crate::error::{BoxError, StreamError, StreamResult};
pub use crate::framing::{FrameDecoder, FrameEvent, LENGTH_PREFIX_LEN, encode_metadata_frame};
pub use crate::metadata::{Action, MetadataRecord};
pub use crate::playback::{
    MetadataSink, PlaybackDriver, PlaybackMsg, PlaybackSummary, QueueDriver, hand_off,
};
pub use crate::reader::ChunkReader;
pub use crate::session::{Session, SessionId};
pub use crate::settings::{ClientSettings, DemuxSettings, EmptyChunkPolicy};

// Re-export for convenience
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
