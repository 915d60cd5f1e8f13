//! Chunk: a contiguous, inclusive byte range assigned to exactly one worker
//! (§3). Grounded in `Fluxaus-FluxDM`'s `engine::chunked::Chunk` /
//! `calculate_chunks`, generalized to the exact tiling invariant required
//! here (no `min_chunk_size`-gated single-chunk fallback — that decision is
//! made one level up, in the downloader, from `accept_ranges`).

use serde::{Deserialize, Serialize};

/// Status of a single chunk (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A unit of parallel download work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u32,
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub status: ChunkStatus,
}

impl Chunk {
    /// Size of this chunk in bytes (`end - start + 1`).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Bytes remaining to be downloaded for this chunk.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.size() - self.downloaded
    }

    /// The absolute byte offset to resume this chunk from
    /// (`start + downloaded`).
    #[must_use]
    pub fn current_offset(&self) -> u64 {
        self.start + self.downloaded
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.size()
    }
}

/// Partitions `[0, content_length-1]` into `num_chunks` contiguous,
/// inclusive ranges per §4.2 step 3: base size `= content_length /
/// num_chunks`, and the first `content_length mod num_chunks` chunks each
/// receive one extra byte, so the tiling invariant in §3 holds exactly for
/// any `content_length > 0` and any `num_chunks >= 1`.
#[must_use]
pub fn plan_chunks(content_length: u64, num_chunks: u32) -> Vec<Chunk> {
    assert!(num_chunks >= 1, "num_chunks must be at least 1");
    if content_length == 0 {
        return vec![Chunk {
            id: 0,
            start: 0,
            end: 0,
            downloaded: 0,
            status: ChunkStatus::Pending,
        }];
    }

    let num_chunks = u64::from(num_chunks);
    let base = content_length / num_chunks;
    let remainder = content_length % num_chunks;

    let mut chunks = Vec::with_capacity(num_chunks as usize);
    let mut start = 0u64;
    for i in 0..num_chunks {
        let size = if i < remainder { base + 1 } else { base };
        if size == 0 {
            // More requested chunks than bytes: stop once the file is tiled.
            break;
        }
        let end = start + size - 1;
        chunks.push(Chunk {
            id: i as u32,
            start,
            end,
            downloaded: 0,
            status: ChunkStatus::Pending,
        });
        start = end + 1;
    }

    chunks
}

/// Asserts the tiling invariant from §3: intervals cover `[0,
/// content_length-1]` exactly once, with no gap or overlap. Used by tests
/// and debug assertions around state reconstruction.
#[must_use]
pub fn tiles_exactly(chunks: &[Chunk], content_length: u64) -> bool {
    if content_length == 0 {
        return true;
    }
    let mut expected_start = 0u64;
    for chunk in chunks {
        if chunk.start != expected_start || chunk.start > chunk.end {
            return false;
        }
        expected_start = chunk.end + 1;
    }
    expected_start == content_length
}
