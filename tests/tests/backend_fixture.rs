//! In-memory avatar backend for client integration tests.
//!
//! The fixture serves the same routes as the real backend:
//! - `POST /api/video-auto-chat-with-tts` and `POST /api/chat`: framed replies
//!   (`[u32 BE length][metadata JSON][audio]`);
//! - `POST /api/audio-chat-streaming` and `POST /api/image-commentary-streaming`: plain audio;
//! - `POST /api/conversation/clear`, `GET`/`POST /api/system-prompt`,
//!   `GET /api/latest-videos`: JSON.
//!
//! Reply bodies are cut into chunks following a configurable size pattern and sent with a
//! short pause between chunks, so the client sees the frame split at chosen positions.
//! `ReplyMode` injects the failure cases (truncation, error status, stalls).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::{Value, json};
use url::Url;

/// Audio bytes returned by every streaming route.
pub const AUDIO_LEN: usize = 64;

const CHUNK_PAUSE: Duration = Duration::from_millis(1);

/// How streaming routes answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Normal,
    /// Framed replies carry a zero-length metadata body.
    EmptyMetadata,
    /// Framed replies declare a metadata body longer than what is sent, then end.
    TruncatedFrame,
    /// Every streaming route answers `500` with body `boom`.
    ServerError,
    /// Every streaming route answers `500`, sends `bo`, then never finishes the body.
    ServerErrorStalledBody,
    /// Send the frame and the first audio chunk, then never send more.
    StallAfterFirstAudio,
}

/// One multipart request as received by the fixture.
#[derive(Debug, Clone, Default)]
pub struct ReceivedForm {
    pub path: &'static str,
    pub fields: Vec<(String, String)>,
    /// `(field name, file name, length)` of every file part.
    pub files: Vec<(String, String, usize)>,
}

impl ReceivedForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn file_count(&self, name: &str) -> usize {
        self.files.iter().filter(|(n, _, _)| n == name).count()
    }
}

#[derive(Debug)]
struct FixtureState {
    mode: ReplyMode,
    chunk_pattern: Vec<usize>,
    forms: Mutex<Vec<ReceivedForm>>,
    cleared: Mutex<Vec<String>>,
    prompt: Mutex<String>,
    videos: Mutex<Option<Value>>,
}

/// Builder and handle for the fixture server.
#[derive(Debug, Clone)]
pub struct AvatarFixture {
    state: Arc<FixtureState>,
}

impl Default for AvatarFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl AvatarFixture {
    /// Normal replies, each body sent as 7-byte chunks.
    pub fn new() -> Self {
        Self::with(ReplyMode::Normal, vec![7])
    }

    /// Fixture with a reply mode and a chunk size pattern (cycled over the body).
    pub fn with(mode: ReplyMode, chunk_pattern: Vec<usize>) -> Self {
        assert!(
            !chunk_pattern.is_empty() && chunk_pattern.iter().all(|&n| n > 0),
            "chunk pattern must be non-empty and positive"
        );
        Self {
            state: Arc::new(FixtureState {
                mode,
                chunk_pattern,
                forms: Mutex::new(Vec::new()),
                cleared: Mutex::new(Vec::new()),
                prompt: Mutex::new("You are a friendly tutor.".to_string()),
                videos: Mutex::new(None),
            }),
        }
    }

    /// Expected audio payload.
    pub fn audio() -> Vec<u8> {
        (0..AUDIO_LEN).map(|i| (i % 251) as u8 ^ 0x5A).collect()
    }

    /// Multipart requests received so far.
    pub fn forms(&self) -> Vec<ReceivedForm> {
        self.state.forms.lock().unwrap().clone()
    }

    /// Session ids passed to the clear route.
    pub fn cleared_sessions(&self) -> Vec<String> {
        self.state.cleared.lock().unwrap().clone()
    }

    /// Start the fixture server and return the base URL (ending with `/`).
    pub async fn start(&self) -> Url {
        let app = self.build_router();

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind local fixture server");
        listener
            .set_nonblocking(true)
            .expect("failed to set nonblocking on fixture listener");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("failed to convert fixture listener to tokio listener");
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{addr}/")).expect("failed to build base url")
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/api/video-auto-chat-with-tts", post(video_chat))
            .route("/api/chat", post(agent_chat))
            .route("/api/audio-chat-streaming", post(audio_chat))
            .route("/api/image-commentary-streaming", post(image_commentary))
            .route("/api/conversation/clear", post(clear_conversation))
            .route(
                "/api/system-prompt",
                get(get_system_prompt).post(set_system_prompt),
            )
            .route("/api/latest-videos", get(latest_videos))
            .with_state(self.state.clone())
    }
}

async fn read_form(path: &'static str, mut multipart: Multipart) -> ReceivedForm {
    let mut form = ReceivedForm {
        path,
        ..ReceivedForm::default()
    };
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let data = field.bytes().await.unwrap();
                form.files.push((name, file_name, data.len()));
            }
            None => {
                let text = field.text().await.unwrap();
                form.fields.push((name, text));
            }
        }
    }
    form
}

fn record(state: &FixtureState, form: &ReceivedForm) {
    state.forms.lock().unwrap().push(form.clone());
}

async fn video_chat(State(state): State<Arc<FixtureState>>, multipart: Multipart) -> Response {
    let form = read_form("/api/video-auto-chat-with-tts", multipart).await;
    record(&state, &form);

    let clips = form.file_count("videos");
    if clips == 0 {
        return (StatusCode::BAD_REQUEST, "no video uploaded").into_response();
    }
    *state.videos.lock().unwrap() = Some(json!({
        "segments": [
            { "type": "before-speaking", "url": "/videos/segment_0.mp4" },
            { "type": "speaking", "url": "/videos/segment_1.mp4" },
        ],
        "merged": { "url": "/videos/merged.mp4" },
    }));
    let metadata = json!({
        "type": "metadata",
        "message": format!("saw {clips} clips"),
        "actions": [],
        "session_id": form.field("session_id"),
    });
    framed_reply(&state, metadata)
}

async fn agent_chat(State(state): State<Arc<FixtureState>>, multipart: Multipart) -> Response {
    let form = read_form("/api/chat", multipart).await;
    record(&state, &form);

    let Some(student) = form.field("student_id") else {
        return (StatusCode::BAD_REQUEST, "student_id is required").into_response();
    };
    let text = form.field("text").unwrap_or("(media)");
    let mut actions = Vec::new();
    if let Some(topic) = form.field("topic") {
        actions.push(json!({ "type": "show_topic", "topic": topic }));
    }
    let metadata = json!({
        "type": "metadata",
        "message": format!("echo: {text}"),
        "actions": actions,
        "session_id": form.field("session_id"),
        "student_id": student,
    });
    framed_reply(&state, metadata)
}

async fn audio_chat(State(state): State<Arc<FixtureState>>, multipart: Multipart) -> Response {
    let form = read_form("/api/audio-chat-streaming", multipart).await;
    record(&state, &form);
    if form.file_count("audio") != 1 {
        return (StatusCode::BAD_REQUEST, "no audio uploaded").into_response();
    }
    plain_reply(&state)
}

async fn image_commentary(
    State(state): State<Arc<FixtureState>>,
    multipart: Multipart,
) -> Response {
    let form = read_form("/api/image-commentary-streaming", multipart).await;
    record(&state, &form);
    if form.file_count("image") != 1 {
        return (StatusCode::BAD_REQUEST, "no image uploaded").into_response();
    }
    plain_reply(&state)
}

async fn clear_conversation(
    State(state): State<Arc<FixtureState>>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    match body.get("session_id").and_then(Value::as_str) {
        Some(id) => {
            state.cleared.lock().unwrap().push(id.to_string());
            axum::Json(json!({ "success": true })).into_response()
        }
        None => axum::Json(json!({ "success": false, "error": "missing session_id" }))
            .into_response(),
    }
}

async fn get_system_prompt(State(state): State<Arc<FixtureState>>) -> Response {
    let prompt = state.prompt.lock().unwrap().clone();
    axum::Json(json!({ "success": true, "prompt": prompt })).into_response()
}

async fn set_system_prompt(
    State(state): State<Arc<FixtureState>>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if prompt.is_empty() {
        return axum::Json(json!({ "success": false, "error": "prompt is empty" }))
            .into_response();
    }
    *state.prompt.lock().unwrap() = prompt.clone();
    axum::Json(json!({ "success": true, "prompt": prompt })).into_response()
}

async fn latest_videos(State(state): State<Arc<FixtureState>>) -> Response {
    match state.videos.lock().unwrap().clone() {
        Some(videos) => axum::Json(videos).into_response(),
        None => axum::Json(json!({ "error": "no videos yet" })).into_response(),
    }
}

fn framed_reply(state: &FixtureState, metadata: Value) -> Response {
    let body = match state.mode {
        ReplyMode::EmptyMetadata => Vec::new(),
        _ => serde_json::to_vec(&metadata).unwrap(),
    };

    let mut wire = Vec::new();
    if state.mode == ReplyMode::TruncatedFrame {
        wire.extend_from_slice(&((body.len() + 100) as u32).to_be_bytes());
        wire.extend_from_slice(&body);
    } else {
        wire.extend_from_slice(&(body.len() as u32).to_be_bytes());
        wire.extend_from_slice(&body);
        wire.extend_from_slice(&AvatarFixture::audio());
    }

    let stall_after = (state.mode == ReplyMode::StallAfterFirstAudio).then(|| 4 + body.len() + 1);
    stream_reply(state, wire, stall_after)
}

fn plain_reply(state: &FixtureState) -> Response {
    let stall_after = (state.mode == ReplyMode::StallAfterFirstAudio).then_some(1);
    stream_reply(state, AvatarFixture::audio(), stall_after)
}

/// Send `wire` as chunks cut by the fixture's pattern.
///
/// With `stall_after = Some(n)`, only the first `n` bytes are sent (as their own chunks)
/// and the body then stays open without further data.
fn stream_reply(state: &FixtureState, wire: Vec<u8>, stall_after: Option<usize>) -> Response {
    match state.mode {
        ReplyMode::ServerError => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        }
        ReplyMode::ServerErrorStalledBody => {
            let body = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"bo"))])
                .chain(stream::pending());
            return (StatusCode::INTERNAL_SERVER_ERROR, Body::from_stream(body)).into_response();
        }
        _ => {}
    }

    let sent = match stall_after {
        Some(n) => &wire[..n.min(wire.len())],
        None => &wire[..],
    };
    let chunks = split_by_pattern(sent, &state.chunk_pattern);

    let paced = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(CHUNK_PAUSE).await;
        Ok::<_, std::io::Error>(chunk)
    });
    let body: BoxStream<'static, Result<Bytes, std::io::Error>> = match stall_after {
        Some(_) => paced.chain(stream::pending()).boxed(),
        None => paced.boxed(),
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

/// Cut `data` into chunks whose sizes cycle through `pattern`.
pub fn split_by_pattern(data: &[u8], pattern: &[usize]) -> Vec<Bytes> {
    let mut out = Vec::new();
    let mut rest = data;
    for &size in pattern.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(size.min(rest.len()));
        out.push(Bytes::copy_from_slice(head));
        rest = tail;
    }
    out
}
