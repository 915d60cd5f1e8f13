//! `FileWriter`: owns a file descriptor and serializes positioned writes
//! (§4.3). Grounded in `Fluxaus-FluxDM`'s `chunked.rs`, which opens a file
//! handle per chunk and seeks before each write; here a single handle is
//! shared across chunk workers and writes go through `write_at` (`pwrite`
//! on unix, `seek_write` on windows) so concurrent workers never fight over
//! a shared seek cursor.

use crate::error::DownloadError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

struct Inner {
    file: Option<std::fs::File>,
    written: u64,
}

/// Owns a file descriptor; provides positioned and sequential writes plus
/// sync/truncate/close. Safe to share across chunk workers via `Arc`.
pub struct FileWriter {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileWriter {
    /// Creates a new file, sparsely pre-allocated to `size` bytes: seeks to
    /// `size - 1` and writes one zero byte, then leaves the cursor state
    /// irrelevant since all writes are positional (§4.2 step 4).
    pub fn create_sparse(path: &Path, size: u64) -> Result<Arc<Self>, DownloadError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        if size > 0 {
            file.set_len(size)?;
            #[cfg(unix)]
            file.write_at(&[0u8], size - 1)?;
            #[cfg(windows)]
            file.seek_write(&[0u8], size - 1)?;
        }

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                file: Some(file),
                written: 0,
            }),
        }))
    }

    /// Opens an existing file for random-access writes without truncating
    /// it, used when resuming from a sidecar with prior progress.
    pub fn open_existing(path: &Path) -> Result<Arc<Self>, DownloadError> {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                file: Some(file),
                written: 0,
            }),
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `bytes` at the given absolute offset. Serialized by an
    /// internal mutex so the underlying positioned write never races with
    /// another caller's.
    pub async fn write_at(&self, bytes: &[u8], offset: u64) -> Result<(), DownloadError> {
        let mut guard = self.inner.lock().await;
        let file = guard.file.as_ref().ok_or(DownloadError::Closed)?;
        #[cfg(unix)]
        file.write_at(bytes, offset)?;
        #[cfg(windows)]
        file.seek_write(bytes, offset)?;
        guard.written += bytes.len() as u64;
        Ok(())
    }

    /// Appends `bytes` at the writer's current monotonic write position.
    /// Used by non-chunked, sequential downloads (§4.2 step 9 single-chunk
    /// fallback).
    pub async fn write(&self, bytes: &[u8]) -> Result<(), DownloadError> {
        let mut guard = self.inner.lock().await;
        let offset = guard.written;
        {
            let file = guard.file.as_ref().ok_or(DownloadError::Closed)?;
            #[cfg(unix)]
            file.write_at(bytes, offset)?;
            #[cfg(windows)]
            file.seek_write(bytes, offset)?;
        }
        guard.written += bytes.len() as u64;
        Ok(())
    }

    /// Flushes the file's contents and metadata to stable storage.
    pub async fn sync(&self) -> Result<(), DownloadError> {
        let guard = self.inner.lock().await;
        let file = guard.file.as_ref().ok_or(DownloadError::Closed)?;
        file.sync_all()?;
        Ok(())
    }

    /// Truncates (or extends) the file to exactly `size` bytes, used once
    /// every chunk completes and `content_length` is known precisely.
    pub async fn truncate(&self, size: u64) -> Result<(), DownloadError> {
        let guard = self.inner.lock().await;
        let file = guard.file.as_ref().ok_or(DownloadError::Closed)?;
        file.set_len(size)?;
        Ok(())
    }

    /// Idempotent. Operations on a closed writer return `DownloadError::Closed`.
    pub async fn close(&self) -> Result<(), DownloadError> {
        let mut guard = self.inner.lock().await;
        if let Some(file) = guard.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_sparse_preallocates_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let writer = FileWriter::create_sparse(&path, 1024).unwrap();
        writer.close().await.unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 1024);
    }

    #[tokio::test]
    async fn positioned_writes_land_at_the_right_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let writer = FileWriter::create_sparse(&path, 10).unwrap();
        writer.write_at(b"AB", 0).await.unwrap();
        writer.write_at(b"CD", 5).await.unwrap();
        writer.close().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..2], b"AB");
        assert_eq!(&data[5..7], b"CD");
    }

    #[tokio::test]
    async fn sequential_write_advances_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.bin");
        let writer = FileWriter::create_sparse(&path, 0).unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        writer.close().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn truncate_shrinks_to_final_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.bin");
        let writer = FileWriter::create_sparse(&path, 1024).unwrap();
        writer.truncate(10).await.unwrap();
        writer.close().await.unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 10);
    }

    #[tokio::test]
    async fn operations_after_close_return_closed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.bin");
        let writer = FileWriter::create_sparse(&path, 4).unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap(); // idempotent

        let err = writer.write_at(b"x", 0).await.unwrap_err();
        assert!(matches!(err, DownloadError::Closed));
    }

    #[tokio::test]
    async fn open_existing_does_not_truncate_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.bin");
        {
            let writer = FileWriter::create_sparse(&path, 4).unwrap();
            writer.write_at(b"AB", 0).await.unwrap();
            writer.close().await.unwrap();
        }
        let writer = FileWriter::open_existing(&path).unwrap();
        writer.write_at(b"CD", 2).await.unwrap();
        writer.close().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data, b"ABCD");
    }
}
