use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    error::{AttemptError, ChunkExhausted},
    options::Options,
};

use super::{
    chunk::{ChunkPayload, ChunkSpec},
    MediaSource,
};

/// Fetches one chunk, retrying the same range until the attempt budget is spent.
pub struct ChunkFetcher {
    source: Arc<dyn MediaSource>,
    options: Options,
}

impl ChunkFetcher {
    pub fn new(source: Arc<dyn MediaSource>, options: &Options) -> Self {
        Self {
            source,
            options: options.clone(),
        }
    }

    async fn attempt(&self, spec: &ChunkSpec) -> Result<bytes::Bytes, AttemptError> {
        let limit = self.options.per_attempt_timeout;
        match tokio::time::timeout(limit, self.source.fetch_range(spec)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(limit)),
        }
    }

    pub async fn fetch(&self, spec: &ChunkSpec) -> Result<ChunkPayload, ChunkExhausted> {
        let attempts = self.options.total_attempts();
        let mut attempt = 1;

        loop {
            match self.attempt(spec).await {
                Ok(bytes) => {
                    if attempt > 1 {
                        info!(chunk = spec.index, attempts = attempt, "chunk succeeded after retry");
                    }
                    return Ok(ChunkPayload { spec: *spec, bytes });
                }
                Err(err) if attempt < attempts => {
                    let delay = self.options.backoff_for(attempt);

                    warn!(
                        chunk = spec.index,
                        range = %spec.range_header(),
                        error = %err,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "chunk attempt failed, retrying"
                    );

                    attempt += 1;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    error!(
                        chunk = spec.index,
                        range = %spec.range_header(),
                        error = %err,
                        attempts = attempt,
                        "chunk failed on every attempt"
                    );
                    return Err(ChunkExhausted {
                        spec: *spec,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;

    use crate::{
        download::{chunk::ChunkSpec, MediaSource},
        error::{AttemptError, ProbeError},
    };

    /// An in-memory resource whose chunks can be told to fail or stall.
    pub struct ScriptedSource {
        pub data: Bytes,
        probe: Option<StatusCode>,
        /// index -> number of leading attempts that fail; `usize::MAX` fails forever
        failures: HashMap<usize, usize>,
        /// index -> delay before answering
        delays: HashMap<usize, Duration>,
        calls: Mutex<HashMap<usize, usize>>,
        probes: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(data: impl Into<Bytes>) -> Self {
            Self {
                data: data.into(),
                probe: None,
                failures: HashMap::new(),
                delays: HashMap::new(),
                calls: Mutex::new(HashMap::new()),
                probes: AtomicUsize::new(0),
            }
        }

        /// A resource of `len` bytes whose content depends on position.
        pub fn patterned(len: usize) -> Self {
            Self::new((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
        }

        pub fn probe_status(mut self, status: StatusCode) -> Self {
            self.probe = Some(status);
            self
        }

        pub fn failing(mut self, index: usize, times: usize) -> Self {
            self.failures.insert(index, times);
            self
        }

        pub fn delayed(mut self, index: usize, delay: Duration) -> Self {
            self.delays.insert(index, delay);
            self
        }

        pub fn calls(&self, index: usize) -> usize {
            self.calls.lock().unwrap().get(&index).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }

        pub fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn content_length(&self) -> Result<u64, ProbeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            match self.probe {
                Some(status) => Err(ProbeError::Status(status)),
                None if self.data.is_empty() => Err(ProbeError::ZeroLength),
                None => Ok(self.data.len() as u64),
            }
        }

        async fn fetch_range(&self, spec: &ChunkSpec) -> Result<Bytes, AttemptError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(spec.index).or_insert(0);
                *count += 1;
                *count
            };

            if let Some(delay) = self.delays.get(&spec.index) {
                tokio::time::sleep(*delay).await;
            }

            if call <= self.failures.get(&spec.index).copied().unwrap_or(0) {
                return Err(AttemptError::Status(StatusCode::SERVICE_UNAVAILABLE));
            }

            Ok(self.data.slice(spec.start as usize..=spec.end as usize))
        }
    }
}
