use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error, info, warn};

use crate::{error::DownloadError, options::Options};

use super::{
    assembler::Assembler, chunk, coordinator::DownloadCoordinator, fetch::ChunkFetcher,
    progress::Progress, MediaSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Planning,
    Fetching,
    Assembling,
    Complete,
    Failed,
}

impl JobState {
    fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Planning, Fetching)
                | (Planning, Failed)
                | (Fetching, Assembling)
                | (Fetching, Failed)
                | (Assembling, Complete)
                | (Assembling, Failed)
        )
    }
}

/// Downloads one remote resource into `output`.
///
/// A job runs once; to try again build a new one.
pub struct DownloadJob {
    label: String,
    source: Arc<dyn MediaSource>,
    output: PathBuf,
    options: Options,
    state: JobState,
    progress: Option<Arc<Progress>>,
}

impl DownloadJob {
    pub fn new(
        label: impl Into<String>,
        source: Arc<dyn MediaSource>,
        output: &Path,
        options: &Options,
    ) -> Self {
        Self {
            label: label.into(),
            source,
            output: output.to_path_buf(),
            options: options.clone(),
            state: JobState::Planning,
            progress: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Byte counter of the running job, available once the size is known.
    pub fn progress(&self) -> Option<Arc<Progress>> {
        self.progress.clone()
    }

    fn transition(&mut self, next: JobState) {
        if self.state.can_become(next) {
            self.state = next;
        } else {
            warn!(media = %self.label, from = ?self.state, to = ?next, "ignoring invalid job transition");
        }
    }

    fn fail(&mut self, err: DownloadError) -> DownloadError {
        error!(media = %self.label, source = %self.source.describe(), error = %err, "download failed");
        self.transition(JobState::Failed);
        err
    }

    pub async fn run(&mut self) -> Result<PathBuf, DownloadError> {
        if self.state != JobState::Planning {
            return Err(DownloadError::AlreadyFinalized);
        }

        if self.output.exists() {
            let err = DownloadError::OutputExists(self.output.clone());
            return Err(self.fail(err));
        }

        let total = match self.source.content_length().await {
            Ok(total) => total,
            Err(err) => return Err(self.fail(err.into())),
        };

        let specs = chunk::plan(total, self.options.chunk_size);
        info!(
            media = %self.label,
            total_mb = total / 1024 / 1024,
            total,
            chunks = specs.len(),
            "starting download"
        );

        let mut assembler = match Assembler::create(&self.output, specs.len()).await {
            Ok(assembler) => assembler,
            Err(err) => return Err(self.fail(err)),
        };

        debug!(media = %self.label, folder = %assembler.folder().display(), "storing segments");

        let progress = Arc::new(Progress::new(self.label.clone(), total));
        self.progress = Some(Arc::clone(&progress));

        let coordinator = DownloadCoordinator::new(
            ChunkFetcher::new(Arc::clone(&self.source), &self.options),
            &self.options,
            progress,
        );

        self.transition(JobState::Fetching);
        if let Err(err) = coordinator.run(specs, &mut assembler).await {
            assembler.abandon().await;
            return Err(self.fail(err));
        }

        self.transition(JobState::Assembling);
        match assembler.finalize().await {
            Ok(path) => {
                self.transition(JobState::Complete);
                info!(
                    media = %self.label,
                    path = %path.display(),
                    bytes = self.progress.as_ref().map(|progress| progress.total()),
                    "download complete"
                );
                Ok(path)
            }
            Err(err) => {
                assembler.abandon().await;
                Err(self.fail(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        download::{assembler::segment_folder, client::DownloadClient, fetch::mock::ScriptedSource},
        error::ProbeError,
    };

    fn options(chunk_size: u64, workers: usize, retries: u32) -> Options {
        Options {
            chunk_size: chunk_size.try_into().unwrap(),
            max_workers: workers.try_into().unwrap(),
            retries_per_chunk: retries,
            retry_backoff: Duration::ZERO,
            ..Options::default()
        }
    }

    #[test]
    fn only_forward_transitions_are_allowed() {
        use JobState::*;
        assert!(Planning.can_become(Fetching));
        assert!(Fetching.can_become(Assembling));
        assert!(Assembling.can_become(Complete));
        assert!(Fetching.can_become(Failed));
        assert!(Assembling.can_become(Failed));
        assert!(!Complete.can_become(Failed));
        assert!(!Failed.can_become(Fetching));
        assert!(!Assembling.can_become(Fetching));
    }

    #[tokio::test]
    async fn job_downloads_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        let source = Arc::new(ScriptedSource::patterned(2_500));

        let mut job = DownloadJob::new("video", source.clone(), &output, &options(1_000, 4, 3));
        let path = job.run().await.unwrap();

        assert_eq!(path, output);
        assert_eq!(job.state(), JobState::Complete);
        assert_eq!(std::fs::read(&output).unwrap(), source.data.as_ref());
        assert_eq!(job.progress().unwrap().done(), 2_500);
        assert!(!segment_folder(&output).exists());

        assert!(matches!(job.run().await, Err(DownloadError::AlreadyFinalized)));
    }

    #[tokio::test]
    async fn size_probe_failure_prevents_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        let source = Arc::new(ScriptedSource::patterned(100).probe_status(StatusCode::FORBIDDEN));

        let mut job = DownloadJob::new("video", source.clone(), &output, &options(10, 4, 3));
        let err = job.run().await.unwrap_err();

        assert!(matches!(err, DownloadError::SizeUnavailable(ProbeError::Status(StatusCode::FORBIDDEN))));
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(source.probes(), 1);
        assert_eq!(source.total_calls(), 0);
        assert!(!segment_folder(&output).exists());
    }

    #[tokio::test]
    async fn failed_chunk_leaves_no_output_and_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        let source = Arc::new(ScriptedSource::patterned(1_000).failing(7, usize::MAX));

        let mut job = DownloadJob::new("video", source.clone(), &output, &options(100, 4, 3));
        let err = job.run().await.unwrap_err();

        match err {
            DownloadError::ChunkDownloadFailed(exhausted) => {
                assert_eq!(exhausted.spec.index, 7);
                assert_eq!((exhausted.spec.start, exhausted.spec.end), (700, 799));
            }
            other => panic!("unexpected {other}"),
        }

        assert_eq!(job.state(), JobState::Failed);
        assert!(job.progress().unwrap().done() <= 900);
        assert!(!output.exists());
        assert!(!segment_folder(&output).exists());
    }

    #[tokio::test]
    async fn existing_output_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        std::fs::write(&output, b"keep me").unwrap();
        let source = Arc::new(ScriptedSource::patterned(100));

        let mut job = DownloadJob::new("video", source.clone(), &output, &options(10, 4, 3));
        assert!(matches!(job.run().await, Err(DownloadError::OutputExists(_))));
        assert_eq!(source.probes(), 0);
        assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
    }

    fn serve_ranges(
        body: Vec<u8>,
    ) -> impl Fn(&wiremock::Request) -> ResponseTemplate + Send + Sync + 'static {
        move |request: &wiremock::Request| {
            let range = request
                .headers
                .get("range")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("bytes="))
                .and_then(|value| value.split_once('-'))
                .and_then(|(start, end)| Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?)));

            match range {
                Some((start, end)) => ResponseTemplate::new(206)
                    .insert_header("content-range", format!("bytes {start}-{end}/{}", body.len()))
                    .set_body_bytes(body[start..=end].to_vec()),
                None => ResponseTemplate::new(416),
            }
        }
    }

    #[tokio::test]
    async fn job_over_http_reassembles_byte_exact() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..25_000u32).map(|i| (i % 253) as u8).collect();

        Mock::given(method("HEAD"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(serve_ranges(body.clone()))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        let options = options(10_000, 4, 3);
        let url = url::Url::parse(&format!("{}/v.mp4", server.uri())).unwrap();
        let client = DownloadClient::new(url, &[], &options).unwrap();

        let mut job = DownloadJob::new("video", Arc::new(client), &output, &options);
        job.run().await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), body);
    }

    #[tokio::test]
    async fn forbidden_probe_over_http_sends_no_range_request() {
        let server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("video.mp4");
        let options = Options::default();
        let url = url::Url::parse(&format!("{}/v.mp4", server.uri())).unwrap();
        let client = DownloadClient::new(url, &[], &options).unwrap();

        let mut job = DownloadJob::new("video", Arc::new(client), &output, &options);
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, DownloadError::SizeUnavailable(_)), "{err}");
    }
}
