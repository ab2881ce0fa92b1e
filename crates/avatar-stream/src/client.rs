//! HTTP client for the avatar backend.
//!
//! Two reply shapes exist:
//! - plain replies (`/api/audio-chat-streaming`, `/api/image-commentary-streaming`) are audio
//!   from the first byte and are returned as [`ReplyAudio`];
//! - framed replies (`/api/video-auto-chat-with-tts`, `/api/chat`) start with a metadata frame
//!   and are returned as [`FramedReply`], with the record already decoded.
//!
//! Both go through the same [`Demuxer`]; only the framing mode differs.
//!
//! Notes:
//! - `request_timeout` bounds sending the request and receiving the response head, and
//!   separately any body read in full (JSON replies, error text); `idle_timeout` bounds the
//!   gap between chunks of a streamed reply.
//! - Every call races the client's [`CancellationToken`]; cancelling it also stops any
//!   reply body still being read.
//! - Nothing is retried. A non-success status becomes [`StreamError::Http`] with the
//!   response text.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::demux::{AudioChunks, Demuxed, Demuxer};
use crate::error::{StreamError, StreamResult};
use crate::reader::ChunkReader;
use crate::session::Session;
use crate::settings::ClientSettings;

const AUDIO_CHAT_PATH: &str = "api/audio-chat-streaming";
const IMAGE_COMMENTARY_PATH: &str = "api/image-commentary-streaming";
const VIDEO_CHAT_PATH: &str = "api/video-auto-chat-with-tts";
const AGENT_CHAT_PATH: &str = "api/chat";
const CLEAR_CONVERSATION_PATH: &str = "api/conversation/clear";
const SYSTEM_PROMPT_PATH: &str = "api/system-prompt";
const LATEST_VIDEOS_PATH: &str = "api/latest-videos";

/// Response body as a boxed chunk stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Audio of a plain reply.
pub type ReplyAudio = AudioChunks<ByteStream>;

/// Metadata and audio of a framed reply.
pub type FramedReply = Demuxed<ByteStream>;

/// A file attached to a multipart request.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: String,
    pub mime: String,
    pub data: Bytes,
}

impl MediaUpload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// A recorded microphone clip (`recording.webm`).
    pub fn webm_audio(data: impl Into<Bytes>) -> Self {
        Self::new("recording.webm", "audio/webm", data)
    }

    /// A recorded camera clip.
    pub fn webm_video(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(file_name, "video/webm", data)
    }

    /// A still image.
    pub fn image(file_name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(file_name, mime, data)
    }

    fn into_part(self) -> StreamResult<Part> {
        let len = self.data.len() as u64;
        Part::stream_with_length(self.data, len)
            .file_name(self.file_name)
            .mime_str(&self.mime)
            .map_err(|e| StreamError::Request(format!("invalid MIME type `{}`: {e}", self.mime)))
    }
}

/// Inputs of an agent chat turn. At least one of them must be set.
#[derive(Debug, Clone, Default)]
pub struct AgentTurn {
    pub text: Option<String>,
    /// Knowledge topic the turn is about.
    pub topic: Option<String>,
    pub video: Option<MediaUpload>,
    pub audio: Option<MediaUpload>,
    pub image: Option<MediaUpload>,
}

impl AgentTurn {
    fn is_empty(&self) -> bool {
        self.text.is_none() && self.video.is_none() && self.audio.is_none() && self.image.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

impl Ack {
    fn into_result(self) -> StreamResult<Self> {
        let rejected = match self.success {
            Some(success) => !success,
            None => self.error.is_some(),
        };
        if rejected {
            let msg = self.error.unwrap_or_else(|| "request rejected".to_string());
            return Err(StreamError::Backend(msg));
        }
        Ok(self)
    }
}

/// Avatar video clips rendered for the most recent reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LatestVideos {
    /// Individual clips in playback order.
    #[serde(default)]
    pub segments: Vec<VideoSegment>,
    /// All segments joined into one clip, when the backend produced it.
    #[serde(default)]
    pub merged: Option<VideoLink>,
}

impl LatestVideos {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.merged.is_none()
    }
}

/// One rendered clip.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoSegment {
    /// `before-speaking`, `speaking`, or another backend tag.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Backend-relative URL of the clip.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoLink {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct LatestVideosReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    videos: LatestVideos,
}

/// Client for one avatar backend.
#[derive(Debug, Clone)]
pub struct AvatarClient {
    http: Client,
    settings: Arc<ClientSettings>,
    cancel: CancellationToken,
}

impl AvatarClient {
    /// Create a client.
    pub fn new(settings: ClientSettings) -> StreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
        })
    }

    /// Use `cancel` for every request and reply body of this client.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ----------------------------
    // Streaming replies
    // ----------------------------

    /// Send a voice recording; the reply is spoken audio without metadata.
    #[instrument(skip(self, recording), fields(len = recording.data.len()))]
    pub async fn audio_chat(&self, recording: MediaUpload) -> StreamResult<ReplyAudio> {
        let form = Form::new().part("audio", recording.into_part()?);
        let response = self.post_form(AUDIO_CHAT_PATH, form).await?;
        Demuxer::plain(self.reader(response)).into_audio()
    }

    /// Send an image for spoken commentary; the reply is audio without metadata.
    #[instrument(skip(self, image), fields(len = image.data.len()))]
    pub async fn image_commentary(&self, image: MediaUpload) -> StreamResult<ReplyAudio> {
        let form = Form::new().part("image", image.into_part()?);
        let response = self.post_form(IMAGE_COMMENTARY_PATH, form).await?;
        Demuxer::plain(self.reader(response)).into_audio()
    }

    /// Send one or more captured video clips; the reply carries metadata then audio.
    #[instrument(skip(self, session, clips), fields(session = %session.id(), clips = clips.len()))]
    pub async fn video_chat(
        &self,
        session: &Session,
        clips: Vec<MediaUpload>,
    ) -> StreamResult<FramedReply> {
        if clips.is_empty() {
            return Err(StreamError::InvalidParams("at least one video clip is required"));
        }

        let mut form = Form::new().text("session_id", session.id().to_string());
        if let Some(student) = session.student_id() {
            form = form.text("student_id", student.to_string());
        }
        for clip in clips {
            form = form.part("videos", clip.into_part()?);
        }

        let response = self.post_form(VIDEO_CHAT_PATH, form).await?;
        self.demux_framed(response)
            .await
            .map_err(|e| e.with_context("video chat reply"))
    }

    /// Run one agent turn for the session's student; the reply carries metadata then audio.
    #[instrument(skip(self, session, turn), fields(session = %session.id()))]
    pub async fn agent_chat(&self, session: &Session, turn: AgentTurn) -> StreamResult<FramedReply> {
        let Some(student) = session.student_id() else {
            return Err(StreamError::InvalidParams("agent chat requires a student id"));
        };
        if turn.is_empty() {
            return Err(StreamError::InvalidParams(
                "agent chat requires text, video, audio, or an image",
            ));
        }

        let mut form = Form::new()
            .text("student_id", student.to_string())
            .text("session_id", session.id().to_string());
        if let Some(topic) = turn.topic {
            form = form.text("topic", topic);
        }
        if let Some(text) = turn.text {
            form = form.text("text", text);
        }
        for (name, upload) in [("video", turn.video), ("audio", turn.audio), ("image", turn.image)] {
            if let Some(upload) = upload {
                form = form.part(name, upload.into_part()?);
            }
        }

        let response = self.post_form(AGENT_CHAT_PATH, form).await?;
        self.demux_framed(response)
            .await
            .map_err(|e| e.with_context("agent chat reply"))
    }

    // ----------------------------
    // JSON calls
    // ----------------------------

    /// Drop the backend's history for `session`.
    #[instrument(skip(self, session), fields(session = %session.id()))]
    pub async fn clear_conversation(&self, session: &Session) -> StreamResult<()> {
        let body = json!({ "session_id": session.id().as_str() });
        let ack: Ack = self.post_json(CLEAR_CONVERSATION_PATH, &body).await?;
        ack.into_result()?;
        Ok(())
    }

    /// Current system prompt.
    #[instrument(skip(self))]
    pub async fn system_prompt(&self) -> StreamResult<String> {
        let url = self.url(SYSTEM_PROMPT_PATH)?;
        let response = self.send(self.http.get(url.clone()), &url).await?;
        let ack: Ack = self.bounded(&url, response.json()).await?;
        Ok(ack.into_result()?.prompt.unwrap_or_default())
    }

    /// Replace the system prompt; returns the prompt as stored by the backend.
    #[instrument(skip(self, prompt), fields(len = prompt.len()))]
    pub async fn set_system_prompt(&self, prompt: &str) -> StreamResult<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(StreamError::InvalidParams("system prompt must not be empty"));
        }
        let ack: Ack = self
            .post_json(SYSTEM_PROMPT_PATH, &json!({ "prompt": prompt }))
            .await?;
        let ack = ack.into_result()?;
        Ok(ack.prompt.unwrap_or_else(|| prompt.to_string()))
    }

    /// Clips rendered for the latest reply; empty when the backend has none yet.
    #[instrument(skip(self))]
    pub async fn latest_videos(&self) -> StreamResult<LatestVideos> {
        let url = self.url(LATEST_VIDEOS_PATH)?;
        let response = self.send(self.http.get(url.clone()), &url).await?;
        let reply: LatestVideosReply = self.bounded(&url, response.json()).await?;
        if let Some(error) = reply.error {
            debug!(url = %url, error = %error, "no rendered videos");
            return Ok(LatestVideos::default());
        }
        Ok(reply.videos)
    }

    // ----------------------------
    // Internals
    // ----------------------------

    fn url(&self, path: &str) -> StreamResult<Url> {
        self.settings
            .base_url
            .join(path)
            .map_err(|e| StreamError::Request(format!("invalid URL for `{path}`: {e}")))
    }

    async fn post_form(&self, path: &str, form: Form) -> StreamResult<Response> {
        let url = self.url(path)?;
        self.send(self.http.post(url.clone()).multipart(form), &url)
            .await
    }

    async fn post_json<T>(&self, path: &str, body: &serde_json::Value) -> StreamResult<T>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        let response = self.send(self.http.post(url.clone()).json(body), &url).await?;
        self.bounded(&url, response.json()).await
    }

    /// Run `fut` under the client's cancel token and `request_timeout`.
    async fn bounded<F, T>(&self, url: &Url, fut: F) -> StreamResult<T>
    where
        F: Future<Output = Result<T, reqwest::Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamError::Cancelled),
            res = timeout(self.settings.request_timeout, fut) => match res {
                Ok(res) => Ok(res?),
                Err(_) => Err(StreamError::Timeout(url.to_string())),
            },
        }
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> StreamResult<Response> {
        let response = self.bounded(url, request.send()).await?;

        let status = response.status();
        if !status.is_success() {
            // A stalled or broken error body only loses the text.
            let body = match self.bounded(url, response.text()).await {
                Ok(body) => body,
                Err(StreamError::Cancelled) => return Err(StreamError::Cancelled),
                Err(e) => {
                    debug!(url = %url, error = %e, "error body unreadable");
                    String::new()
                }
            };
            debug!(url = %url, status = status.as_u16(), "request rejected");
            return Err(StreamError::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        debug!(url = %url, status = status.as_u16(), "response head received");
        Ok(response)
    }

    fn reader(&self, response: Response) -> ChunkReader<ByteStream> {
        let label = response.url().to_string();
        ChunkReader::new(response.bytes_stream().boxed())
            .with_label(label)
            .with_idle_timeout(self.settings.idle_timeout)
            .with_empty_chunks(self.settings.demux.empty_chunks)
            .with_cancellation(self.cancel.clone())
    }

    async fn demux_framed(&self, response: Response) -> StreamResult<FramedReply> {
        Demuxer::framed(self.reader(response), &self.settings.demux)
            .into_parts()
            .await
    }
}
