use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use super::chunk::ChunkSpec;

/// Aggregate byte counter for one job.
#[derive(Debug)]
pub struct Progress {
    label: String,
    total: u64,
    done: AtomicU64,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: u64) -> Self {
        Self {
            label: label.into(),
            total,
            done: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    /// Records an accepted chunk and returns the new total.
    pub fn advance(&self, spec: &ChunkSpec, bytes: u64) -> u64 {
        let done = self.done.fetch_add(bytes, Ordering::AcqRel) + bytes;
        debug_assert!(done <= self.total, "progress {done} exceeds {}", self.total);

        info!(
            media = %self.label,
            chunk = spec.index,
            done,
            total = self.total,
            "downloaded {:5.2}%",
            done as f64 / self.total.max(1) as f64 * 100.
        );

        done
    }
}
