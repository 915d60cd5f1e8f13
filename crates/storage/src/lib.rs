//! Sidecar state persistence.
//!
//! A sidecar is a small file co-located with a download's target that
//! records enough state to resume it later. This crate owns the low-level
//! "write atomically, tolerate malformed content" contract so `engine` can
//! treat save/load as a black box.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Errors produced while reading or writing a sidecar file.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("sidecar I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sidecar serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serializes `value` to `path` atomically: write to a temp file in the same
/// directory, flush, then rename over the destination. A reader never
/// observes a partially-written sidecar.
pub async fn save_atomic<T>(path: &Path, value: &T) -> Result<(), SidecarError>
where
    T: Serialize,
{
    let body = serde_json::to_vec_pretty(value)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&body).await?;
        tmp.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    tracing::debug!(path = %path.display(), "sidecar saved");
    Ok(())
}

/// Loads and deserializes the sidecar at `path`.
///
/// Returns `Ok(None)` when the file does not exist *or* its contents are
/// malformed — callers fall back to a fresh download in both cases, per the
/// sidecar's "tolerates malformed content" contract. Only genuine I/O
/// failures (permission denied, etc.) are surfaced as `Err`.
pub async fn load<T>(path: &Path) -> Result<Option<T>, SidecarError>
where
    T: DeserializeOwned,
{
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&body) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed sidecar, discarding");
            Ok(None)
        }
    }
}

/// Deletes the sidecar at `path`, ignoring a not-found error (idempotent).
pub async fn delete(path: &Path) -> Result<(), SidecarError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}
