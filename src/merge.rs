use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::MergeError;

/// Muxes a finished video stream and audio stream into one container.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MergeError>;
}

/// Stream-copies both inputs with `ffmpeg`, overwriting the output.
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Merger for Ffmpeg {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MergeError> {
        debug!(program = %self.program.display(), video = %video.display(), audio = %audio.display(), "running ffmpeg");

        let result = Command::new(&self.program)
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .arg("-c")
            .arg("copy")
            .arg(output)
            .output()
            .await;

        let result = match result {
            Ok(result) => result,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(MergeError::FfmpegMissing)
            }
            Err(err) => return Err(MergeError::Spawn(err)),
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            error!(status = %result.status, %stderr, "ffmpeg failed");
            return Err(MergeError::Failed {
                status: result.status,
                stderr,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = Ffmpeg::with_program(dir.path().join("no-such-ffmpeg"));

        let err = ffmpeg
            .merge(Path::new("v.mp4"), Path::new("a.mp4"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::FfmpegMissing), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_binary_reports_status() {
        let ffmpeg = Ffmpeg::with_program("false");

        let err = ffmpeg
            .merge(Path::new("v.mp4"), Path::new("a.mp4"), Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Failed { .. }), "{err}");
    }
}
