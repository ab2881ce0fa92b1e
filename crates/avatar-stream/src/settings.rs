//! Settings for `avatar-stream`.
//!
//! [`DemuxSettings`] controls how a reply body is split into its metadata frame and audio
//! payload. [`ClientSettings`] adds the HTTP-level knobs used by
//! [`AvatarClient`](crate::AvatarClient) and embeds a `DemuxSettings`.

use std::time::Duration;

use url::Url;

/// How the chunk reader treats a zero-length chunk from its source.
///
/// A zero-length chunk is never interpreted as end-of-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyChunkPolicy {
    /// Drop the chunk and keep reading (default).
    #[default]
    Skip,
    /// Fail the read with [`StreamError::EmptyChunk`](crate::StreamError::EmptyChunk).
    Reject,
}

/// Settings for splitting a reply body.
#[derive(Debug, Clone)]
pub struct DemuxSettings {
    /// Largest metadata body accepted, in bytes. A larger declared length fails as a
    /// framing error before any of the body is buffered.
    /// Default: 1 MiB.
    pub max_metadata_len: usize,

    /// Treatment of zero-length chunks.
    /// Default: [`EmptyChunkPolicy::Skip`].
    pub empty_chunks: EmptyChunkPolicy,
}

impl Default for DemuxSettings {
    fn default() -> Self {
        Self {
            max_metadata_len: 1024 * 1024,
            empty_chunks: EmptyChunkPolicy::Skip,
        }
    }
}

impl DemuxSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata size limit.
    pub fn with_max_metadata_len(mut self, len: usize) -> Self {
        self.max_metadata_len = len;
        self
    }

    /// Set the zero-length chunk policy.
    pub fn with_empty_chunks(mut self, policy: EmptyChunkPolicy) -> Self {
        self.empty_chunks = policy;
        self
    }
}

/// Settings for talking to the avatar backend.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    // ----------------------------
    // Endpoint
    // ----------------------------
    /// Base URL all API paths are resolved against.
    /// Default: `http://127.0.0.1:5000/`.
    pub base_url: Url,

    // ----------------------------
    // Timeouts
    // ----------------------------
    /// Timeout for sending a request and receiving the response head.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Maximum gap between two body chunks of a streaming reply. `None` disables it.
    /// Default: 30 seconds.
    pub idle_timeout: Option<Duration>,

    // ----------------------------
    // Reply framing
    // ----------------------------
    /// Framing settings applied to streaming replies.
    pub demux: DemuxSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://127.0.0.1:5000/").expect("static URL is valid"),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(30)),
            demux: DemuxSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend base URL.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set (or disable) the idle timeout between body chunks.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the framing settings.
    pub fn with_demux(mut self, demux: DemuxSettings) -> Self {
        self.demux = demux;
        self
    }
}
