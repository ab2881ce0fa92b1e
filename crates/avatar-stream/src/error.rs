//! Unified crate-level error types.
//!
//! This module provides a single [`StreamError`] type used across the crate and a
//! convenient [`StreamResult`] alias.
//!
//! Variants fall into three groups that callers usually branch on:
//! - framing errors: the length prefix or metadata body is truncated, oversized, or
//!   an empty chunk was rejected;
//! - decode errors: the metadata body is not UTF-8 JSON of the expected shape;
//! - source errors: the byte source failed, stalled, or was cancelled.
//!
//! All of them are fatal for the exchange they occurred in. Nothing in this crate
//! retries; the caller decides whether to start a new request.
//!
//! Note: HTTP client errors are carried as strings so that `reqwest` types do not
//! leak into the public API.

use std::error::Error as StdError;
use std::str::Utf8Error;

/// Result type used by this crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Boxed error produced by an arbitrary byte source.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Unified error type for the `avatar-stream` crate.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The source ended before the 4-byte metadata length prefix was complete.
    #[error("truncated metadata frame: stream ended after {received} of 4 length bytes")]
    TruncatedPrefix {
        /// Prefix bytes received before the end of the stream.
        received: usize,
    },

    /// The source ended before the declared metadata body was complete.
    #[error("truncated metadata frame: expected {expected} body bytes, got {received}")]
    TruncatedMetadata {
        /// Declared body length.
        expected: u32,
        /// Body bytes received before the end of the stream.
        received: usize,
    },

    /// The declared metadata length exceeds the configured limit.
    #[error("metadata frame of {length} bytes exceeds limit of {limit} bytes")]
    MetadataTooLarge {
        /// Declared body length.
        length: u32,
        /// Configured maximum.
        limit: usize,
    },

    /// The source produced a zero-length chunk and the reader is configured to reject them.
    #[error("source produced a zero-length chunk")]
    EmptyChunk,

    /// Metadata body is not valid UTF-8.
    #[error("metadata is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    /// Metadata body is not valid JSON of the expected shape.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    /// The underlying byte source failed.
    #[error("source read failed: {0}")]
    Source(#[source] BoxError),

    /// No chunk arrived within the idle timeout.
    #[error("read timeout for {0}")]
    Timeout(String),

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP request returned a non-success status.
    #[error("HTTP error: {status} for {url}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
        /// Response text, if any could be read.
        body: String,
    },

    /// Building or sending the HTTP request failed.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered but reported a failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Invalid parameters provided by the caller.
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Wrap an arbitrary source failure.
    pub fn source_failed(err: impl Into<BoxError>) -> Self {
        StreamError::Source(err.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        StreamError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Returns `true` for truncated, oversized, or otherwise malformed framing.
    pub fn is_framing(&self) -> bool {
        match self {
            StreamError::TruncatedPrefix { .. }
            | StreamError::TruncatedMetadata { .. }
            | StreamError::MetadataTooLarge { .. }
            | StreamError::EmptyChunk => true,
            StreamError::Context { source, .. } => source.is_framing(),
            _ => false,
        }
    }

    /// Returns `true` when the metadata body could not be decoded.
    pub fn is_decode(&self) -> bool {
        match self {
            StreamError::InvalidUtf8(_) | StreamError::InvalidMetadata(_) => true,
            StreamError::Context { source, .. } => source.is_decode(),
            _ => false,
        }
    }

    /// Returns `true` when the byte source itself failed, stalled, or was cancelled.
    pub fn is_source(&self) -> bool {
        match self {
            StreamError::Source(_) | StreamError::Timeout(_) | StreamError::Cancelled => true,
            StreamError::Context { source, .. } => source.is_source(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Request(err.to_string())
    }
}
