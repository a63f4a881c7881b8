pub mod assembler;
pub mod chunk;
pub mod client;
pub mod coordinator;
pub mod fetch;
pub mod job;
pub mod progress;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    capture::{CapturedMedia, MediaKind, MediaPair},
    error::{AttemptError, DownloadError, PipelineError, ProbeError},
    merge::Merger,
    options::Options,
};

use chunk::ChunkSpec;
use client::DownloadClient;
use job::DownloadJob;

/// Where chunk bytes come from. One attempt per call; retrying is the caller's business.
#[async_trait]
pub trait MediaSource: Send + Sync {
    fn describe(&self) -> String;

    /// Total length in bytes. Never zero on success.
    async fn content_length(&self) -> Result<u64, ProbeError>;

    async fn fetch_range(&self, spec: &ChunkSpec) -> Result<Bytes, AttemptError>;
}

pub fn stream_path(output: &Path, kind: MediaKind) -> PathBuf {
    output.with_extension(format!("{kind}.mp4"))
}

async fn download_stream(
    kind: MediaKind,
    media: &CapturedMedia,
    path: &Path,
    options: &Options,
) -> Result<PathBuf, DownloadError> {
    let url = Url::parse(&media.url)?;
    let client = DownloadClient::new(url, &media.cookies, options)?;

    let mut job = DownloadJob::new(kind.to_string(), Arc::new(client), path, options);
    let result = job.run().await;

    debug!(
        media = %kind,
        state = ?job.state(),
        downloaded = job.progress().map(|progress| progress.done()),
        "job finished"
    );

    result
}

async fn remove_streams(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "could not remove stream file"),
        }
    }
}

/// Downloads the video stream, then the audio stream, and merges both into `output`.
pub async fn download(
    pair: &MediaPair,
    output: &Path,
    options: &Options,
    merger: &dyn Merger,
) -> Result<PathBuf, PipelineError> {
    if output.exists() {
        warn!(output = %output.display(), "file already exists");
        return Err(PipelineError::OutputExists(output.to_path_buf()));
    }

    let video_path = stream_path(output, MediaKind::Video);
    let audio_path = stream_path(output, MediaKind::Audio);

    // leftovers of an earlier run that failed to merge
    remove_streams(&[video_path.as_path(), audio_path.as_path()]).await;

    info!(output = %output.display(), "downloading video stream");
    let video = download_stream(MediaKind::Video, &pair.video, &video_path, options)
        .await
        .map_err(|source| PipelineError::Stream {
            kind: MediaKind::Video,
            source,
        })?;

    info!(output = %output.display(), "downloading audio stream");
    let audio = match download_stream(MediaKind::Audio, &pair.audio, &audio_path, options).await {
        Ok(audio) => audio,
        Err(source) => {
            remove_streams(&[video.as_path()]).await;
            return Err(PipelineError::Stream {
                kind: MediaKind::Audio,
                source,
            });
        }
    };

    info!(output = %output.display(), "merging streams");
    merger.merge(&video, &audio, output).await?;

    remove_streams(&[video.as_path(), audio.as_path()]).await;

    info!(output = %output.display(), "merge complete");
    Ok(output.to_path_buf())
}
