use std::sync::Arc;

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{ChunkExhausted, DownloadError},
    options::Options,
};

use super::{
    assembler::Assembler,
    chunk::{ChunkPayload, ChunkSpec},
    fetch::ChunkFetcher,
    progress::Progress,
};

type ChunkResult = Result<ChunkPayload, ChunkExhausted>;

/// Runs chunk fetches on a fixed pool of workers and feeds the results to the assembler.
pub struct DownloadCoordinator {
    fetcher: Arc<ChunkFetcher>,
    workers: usize,
    progress: Arc<Progress>,
}

impl DownloadCoordinator {
    pub fn new(fetcher: ChunkFetcher, options: &Options, progress: Arc<Progress>) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            workers: options.max_workers.get(),
            progress,
        }
    }

    /// Fetches every spec, handing each finished chunk to `assembler` as it lands.
    ///
    /// The first chunk that exhausts its retries, or the first write that fails,
    /// stops scheduling and cancels in-flight fetches. Results still queued at
    /// that point are dropped without touching storage.
    pub async fn run(
        &self,
        specs: Vec<ChunkSpec>,
        assembler: &mut Assembler,
    ) -> Result<(), DownloadError> {
        let worker_count = self.workers.min(specs.len()).max(1);
        let queue = Arc::new(Mutex::new(specs.into_iter()));
        let cancel = CancellationToken::new();
        let (results_tx, mut results_rx) = mpsc::channel::<ChunkResult>(worker_count);

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            workers.spawn(work(
                worker,
                Arc::clone(&self.fetcher),
                Arc::clone(&queue),
                cancel.clone(),
                results_tx.clone(),
            ));
        }
        drop(results_tx);

        let mut failure = None;
        while let Some(result) = results_rx.recv().await {
            let payload = match result {
                Ok(payload) => payload,
                Err(exhausted) => {
                    failure = Some(DownloadError::ChunkDownloadFailed(exhausted));
                    break;
                }
            };

            // a worker has already failed; its error is still queued behind this one
            if cancel.is_cancelled() {
                debug!(chunk = payload.spec.index, "dropping chunk that finished after a failure");
                continue;
            }

            let spec = payload.spec;
            let bytes = payload.bytes.len() as u64;
            if let Err(err) = assembler.accept(payload).await {
                failure = Some(err);
                break;
            }
            self.progress.advance(&spec, bytes);
        }

        if failure.is_some() {
            cancel.cancel();
        }
        drop(results_rx);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "download worker did not finish cleanly");
                cancel.cancel();
                failure.get_or_insert(DownloadError::Worker(err));
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn work(
    worker: usize,
    fetcher: Arc<ChunkFetcher>,
    queue: Arc<Mutex<std::vec::IntoIter<ChunkSpec>>>,
    cancel: CancellationToken,
    results: mpsc::Sender<ChunkResult>,
) {
    loop {
        let spec = {
            let mut queue = queue.lock().await;
            if cancel.is_cancelled() {
                break;
            }
            match queue.next() {
                Some(spec) => spec,
                None => break,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker, chunk = spec.index, "fetch cancelled");
                break;
            }
            result = fetcher.fetch(&spec) => result,
        };

        // stop the pool before the coordinator even sees the failure
        if result.is_err() {
            cancel.cancel();
        }

        if results.send(result).await.is_err() {
            break;
        }
    }
}
