use std::{fmt, num::NonZeroU64};

use bytes::Bytes;

/// One inclusive byte range of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ChunkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} [{}]", self.index, self.range_header())
    }
}

/// The downloaded body of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub spec: ChunkSpec,
    pub bytes: Bytes,
}

/// Splits `[0, total_length)` into `chunk_size` ranges, the last one cut at the real end.
///
/// A zero length yields no chunks; the size probe never lets one through.
pub fn plan(total_length: u64, chunk_size: NonZeroU64) -> Vec<ChunkSpec> {
    let chunk_size = chunk_size.get();
    let count = total_length.div_ceil(chunk_size);

    (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = start.saturating_add(chunk_size - 1).min(total_length - 1);
            ChunkSpec {
                index: index as usize,
                start,
                end,
            }
        })
        .collect()
}
