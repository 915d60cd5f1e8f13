//! The persisted sidecar (§3 `DownloadState`, §6.2 wire format).
//!
//! Lifecycle: created on first request, saved periodically and on every
//! terminal event except successful completion, deleted on success. Reading
//! and writing the bytes on disk is delegated to the `storage` crate;
//! this module owns the shape and the resume-compatibility rules.

use crate::chunk::Chunk;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The sidecar payload (§6.2): `{ url, filename, total_size, accept_ranges,
/// created_at, updated_at, chunks: [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    pub url: String,
    pub filename: String,
    pub total_size: u64,
    pub accept_ranges: bool,
    pub created_at: u64,
    pub updated_at: u64,
    pub chunks: Vec<Chunk>,
}

impl DownloadState {
    #[must_use]
    pub fn new(url: String, filename: String, total_size: u64, accept_ranges: bool, chunks: Vec<Chunk>) -> Self {
        let now = now_unix();
        Self {
            url,
            filename,
            total_size,
            accept_ranges,
            created_at: now,
            updated_at: now,
            chunks,
        }
    }

    /// Refreshes `updated_at` to the current time, called before each save.
    pub fn touch(&mut self) {
        self.updated_at = now_unix();
    }

    /// A sidecar is only valid for resuming a download whose URL and total
    /// size match exactly (§4.2 step 2); anything else is a different file
    /// and the sidecar must be discarded.
    #[must_use]
    pub fn matches(&self, url: &str, total_size: u64) -> bool {
        self.url == url && self.total_size == total_size
    }

    #[must_use]
    pub fn all_chunks_completed(&self) -> bool {
        self.chunks
            .iter()
            .all(|c| c.status == crate::chunk::ChunkStatus::Completed)
    }
}

/// Returns the sidecar path for a given output path: `<output_path>.burkut-state`.
#[must_use]
pub fn sidecar_path(output_path: &Path) -> PathBuf {
    let mut os = output_path.as_os_str().to_owned();
    os.push(".burkut-state");
    PathBuf::from(os)
}

/// Loads a sidecar for `output_path`, returning `None` if it doesn't exist,
/// is malformed, or doesn't match the fresh metadata's `url`/`total_size`
/// (§4.2 step 2).
pub async fn load_matching(
    output_path: &Path,
    url: &str,
    total_size: u64,
) -> Result<Option<DownloadState>, crate::error::DownloadError> {
    let path = sidecar_path(output_path);
    let state: Option<DownloadState> = storage::load(&path)
        .await
        .map_err(|e| crate::error::DownloadError::Io(std::io::Error::other(e.to_string())))?;

    Ok(state.filter(|s| s.matches(url, total_size)))
}

/// Persists `state` to its sidecar atomically.
pub async fn save(output_path: &Path, state: &DownloadState) -> Result<(), crate::error::DownloadError> {
    let path = sidecar_path(output_path);
    storage::save_atomic(&path, state)
        .await
        .map_err(|e| crate::error::DownloadError::Io(std::io::Error::other(e.to_string())))
}

/// Deletes the sidecar for `output_path`, if any.
pub async fn delete(output_path: &Path) -> Result<(), crate::error::DownloadError> {
    let path = sidecar_path(output_path);
    storage::delete(&path)
        .await
        .map_err(|e| crate::error::DownloadError::Io(std::io::Error::other(e.to_string())))
}
