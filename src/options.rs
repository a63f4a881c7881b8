use std::{
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use crate::capture::CaptureFilter;

pub const MIB: u64 = 1024 * 1024;

const DEFAULT_CHUNK_SIZE: NonZeroU64 = match NonZeroU64::new(10 * MIB) {
    Some(size) => size,
    None => unreachable!(),
};

const DEFAULT_MAX_WORKERS: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(workers) => workers,
    None => unreachable!(),
};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
pub const DEFAULT_REFERER: &str = "https://www.douyin.com/";

/// Per-job download settings. Every job gets its own copy.
#[derive(Debug, Clone)]
pub struct Options {
    pub chunk_size: NonZeroU64,
    pub max_workers: NonZeroUsize,
    /// Additional attempts after the first one.
    pub retries_per_chunk: u32,
    pub per_attempt_timeout: Duration,
    /// Linear backoff step between attempts, capped at [`MAX_RETRY_BACKOFF`].
    pub retry_backoff: Duration,
    pub user_agent: String,
    pub referer: String,
    pub capture_timeout: Duration,
    pub capture_filter: CaptureFilter,
}

pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);

impl Default for Options {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            retries_per_chunk: 3,
            per_attempt_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(250),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            capture_timeout: Duration::from_secs(30),
            capture_filter: CaptureFilter::default(),
        }
    }
}

impl Options {
    /// Converts a block size given in mebibytes, saturating instead of overflowing.
    pub fn chunk_size_from_mib(mib: NonZeroU64) -> NonZeroU64 {
        NonZeroU64::new(mib.get().saturating_mul(MIB)).unwrap_or(NonZeroU64::MAX)
    }

    /// Delay before the given retry (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_backoff.saturating_mul(retry).min(MAX_RETRY_BACKOFF)
    }

    pub fn total_attempts(&self) -> u32 {
        self.retries_per_chunk.saturating_add(1)
    }
}
