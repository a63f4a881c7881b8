use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::DownloadError;

use super::chunk::ChunkPayload;

const STAGING_NAME: &str = "assembled.part";

/// Persists chunks as they arrive and stitches them together in index order.
///
/// Pieces live in `<output>_segments/` next to the output. The output path is
/// only ever written by a rename of the fully assembled file.
#[derive(Debug)]
pub struct Assembler {
    output: PathBuf,
    folder: PathBuf,
    received: Vec<bool>,
    finalized: bool,
}

impl Assembler {
    pub async fn create(output: &Path, expected: usize) -> Result<Self, DownloadError> {
        let folder = segment_folder(output);

        fs::create_dir_all(&folder)
            .await
            .map_err(|err| DownloadError::persist(&folder, err))?;

        debug!(folder = %folder.display(), expected, "segment folder ready");

        Ok(Self {
            output: output.to_path_buf(),
            folder,
            received: vec![false; expected],
            finalized: false,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn piece_path(&self, index: usize) -> PathBuf {
        self.folder.join(format!("chunk_{index:04}.dat"))
    }

    pub fn missing(&self) -> Vec<usize> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, received)| !**received)
            .map(|(index, _)| index)
            .collect()
    }

    pub async fn accept(&mut self, payload: ChunkPayload) -> Result<(), DownloadError> {
        if self.finalized {
            return Err(DownloadError::AlreadyFinalized);
        }

        let index = payload.spec.index;
        match self.received.get(index) {
            Some(false) => {}
            _ => return Err(DownloadError::UnexpectedChunk { index }),
        }

        let path = self.piece_path(index);
        fs::write(&path, &payload.bytes)
            .await
            .map_err(|err| DownloadError::persist(&path, err))?;

        self.received[index] = true;
        Ok(())
    }

    /// Concatenates every piece in ascending index order, moves the result to
    /// the output path and removes the segment folder.
    pub async fn finalize(&mut self) -> Result<PathBuf, DownloadError> {
        if self.finalized {
            return Err(DownloadError::AlreadyFinalized);
        }

        let missing = self.missing();
        if !missing.is_empty() {
            return Err(DownloadError::IncompleteDownload { missing });
        }

        let staging = self.folder.join(STAGING_NAME);
        let mut file = fs::File::create(&staging)
            .await
            .map_err(|err| DownloadError::persist(&staging, err))?;

        for index in 0..self.received.len() {
            let piece_path = self.piece_path(index);
            let mut piece = fs::File::open(&piece_path)
                .await
                .map_err(|err| DownloadError::persist(&piece_path, err))?;

            tokio::io::copy(&mut piece, &mut file)
                .await
                .map_err(|err| DownloadError::persist(&staging, err))?;

            fs::remove_file(&piece_path)
                .await
                .map_err(|err| DownloadError::persist(&piece_path, err))?;
        }

        file.flush()
            .await
            .map_err(|err| DownloadError::persist(&staging, err))?;
        file.sync_all()
            .await
            .map_err(|err| DownloadError::persist(&staging, err))?;
        drop(file);

        fs::rename(&staging, &self.output)
            .await
            .map_err(|err| DownloadError::persist(&self.output, err))?;

        if let Err(err) = fs::remove_dir_all(&self.folder).await {
            warn!(folder = %self.folder.display(), error = %err, "could not remove segment folder");
        }

        self.finalized = true;
        Ok(self.output.clone())
    }

    /// Drops every intermediate piece. Failures are logged, not returned.
    pub async fn abandon(self) {
        if self.finalized {
            return;
        }

        match fs::remove_dir_all(&self.folder).await {
            Ok(()) => debug!(folder = %self.folder.display(), "removed segment folder"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(folder = %self.folder.display(), error = %err, "could not remove segment folder")
            }
        }
    }
}

pub fn segment_folder(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());

    output
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(name + "_segments")
}
