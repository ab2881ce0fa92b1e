//! Send recorded video clips to a running backend, print the reply metadata, and save the
//! spoken audio.
//!
//! Usage: `video_chat <clip.webm>... [--out reply.mp3]`
//!
//! The backend URL defaults to `http://127.0.0.1:5000/` and can be overridden with
//! `AVATAR_BACKEND_URL`.

use std::error::Error;
use std::path::PathBuf;

use avatar_stream::{
    AvatarClient, Bytes, ClientSettings, MediaUpload, MetadataRecord, PlaybackDriver, Session,
    StreamError, StreamResult, hand_off,
};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use url::Url;

/// Writes reply audio to a file as it arrives.
struct FileDriver {
    file: File,
}

impl PlaybackDriver for FileDriver {
    async fn play(&mut self, chunk: Bytes) -> StreamResult<()> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|e| StreamError::source_failed(e).with_context("writing reply audio"))
    }

    async fn finish(&mut self) -> StreamResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| StreamError::source_failed(e).with_context("flushing reply audio"))
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("avatar_stream=debug".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let mut clips = Vec::new();
    let mut out = PathBuf::from("reply.mp3");
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--out" {
            out = args.next().ok_or("--out needs a path")?.into();
            continue;
        }
        let path = PathBuf::from(&arg);
        let data = tokio::fs::read(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.webm".to_string());
        clips.push(MediaUpload::webm_video(name, data));
    }
    if clips.is_empty() {
        return Err("usage: video_chat <clip.webm>... [--out reply.mp3]".into());
    }

    let mut settings = ClientSettings::default();
    if let Ok(base) = std::env::var("AVATAR_BACKEND_URL") {
        settings = settings.with_base_url(Url::parse(&base)?);
    }
    let client = AvatarClient::new(settings)?;
    let session = Session::new();
    info!(session = %session.id(), clips = clips.len(), "sending clips");

    let reply = client.video_chat(&session, clips).await?;

    let mut show = |record: &MetadataRecord| {
        println!("avatar: {}", record.message);
        for action in &record.actions {
            println!("  action: {}", action.kind);
        }
    };
    let mut driver = FileDriver {
        file: File::create(&out).await?,
    };
    let summary = hand_off(reply, &mut show, &mut driver).await?;

    info!(
        bytes = summary.bytes,
        chunks = summary.chunks,
        out = %out.display(),
        "reply audio saved"
    );
    Ok(())
}
