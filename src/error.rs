use std::{path::PathBuf, time::Duration};

use reqwest::{header::InvalidHeaderValue, StatusCode};
use thiserror::Error;

use crate::{capture::MediaKind, download::chunk::ChunkSpec};

/// A single failed attempt at fetching a byte range. Absorbed by the retry loop.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("server answered range {received:?}, requested bytes={start}-{end}")]
    RangeMismatch {
        start: u64,
        end: u64,
        received: String,
    },

    #[error("expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },
}

/// A chunk that failed on every allowed attempt.
#[derive(Debug, Error)]
#[error("{spec} failed after {attempts} attempts: {source}")]
pub struct ChunkExhausted {
    pub spec: ChunkSpec,
    pub attempts: u32,
    #[source]
    pub source: AttemptError,
}

/// Why the size probe could not produce a usable length.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("response carries no content length")]
    MissingLength,

    #[error("content length {0:?} is not a number")]
    InvalidLength(String),

    #[error("content length is zero")]
    ZeroLength,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("size unavailable: {0}")]
    SizeUnavailable(#[from] ProbeError),

    #[error("chunk download failed: {0}")]
    ChunkDownloadFailed(#[from] ChunkExhausted),

    #[error("could not persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("incomplete download, missing chunks {missing:?}")]
    IncompleteDownload { missing: Vec<usize> },

    #[error("download was already finalized")]
    AlreadyFinalized,

    #[error("chunk {index} is not part of this download or was already accepted")]
    UnexpectedChunk { index: usize },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("download worker stopped unexpectedly: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("output {} already exists", .0.display())]
    OutputExists(PathBuf),
}

impl DownloadError {
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no {missing:?} stream captured within {timeout:?}")]
    Timeout {
        missing: Vec<MediaKind>,
        timeout: Duration,
    },

    #[error("capture closed before {missing:?} stream was seen")]
    Closed { missing: Vec<MediaKind> },
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("ffmpeg not found, install it and add it to PATH")]
    FfmpegMissing,

    #[error("could not run ffmpeg: {0}")]
    Spawn(std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("output {} already exists", .0.display())]
    OutputExists(PathBuf),

    #[error("{kind} stream: {source}")]
    Stream {
        kind: MediaKind,
        #[source]
        source: DownloadError,
    },

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}
