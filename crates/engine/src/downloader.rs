//! Parallel chunked downloader orchestration (§4.2). The coordinator owns
//! no file handle or socket directly (§9 "ownership of the file
//! descriptor"): it hands each worker a shared `Arc<FileWriter>` and a
//! shared `DownloadState`, and dispatches strictly through the `Transport`
//! trait object so HTTP/1.1, HTTP/2, and any future adapter compose the
//! same way (§9 "polymorphism over transports").

use crate::chunk::{plan_chunks, ChunkStatus};
use crate::conditional;
use crate::error::DownloadError;
use crate::progress::{build_progress, ChunkStatusSnapshot, Progress, SpeedTracker};
use crate::rate_limiter::RateLimiter;
use crate::retry::{self, RetryConfig};
use crate::state::{self, DownloadState};
use crate::transport::Transport;
use crate::writer::FileWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Tunables for a `ParallelDownloader` (§4.2, §4.4, §4.5).
#[derive(Clone)]
pub struct DownloaderConfig {
    pub connections: u32,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub retry: RetryConfig,
    pub progress_interval: Duration,
    pub state_save_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connections: 4,
            rate_limiter: None,
            retry: RetryConfig::default(),
            progress_interval: Duration::from_millis(100),
            state_save_interval: Duration::from_secs(5),
        }
    }
}

/// Orchestrates a single resumable, parallel download (§6.1's public
/// surface: `set_progress_callback`, `download`, `get_progress`, `cancel`).
pub struct ParallelDownloader {
    transport: Arc<dyn Transport>,
    config: DownloaderConfig,
    progress_callback: Arc<std::sync::Mutex<Option<ProgressCallback>>>,
    latest_progress: Arc<std::sync::Mutex<Option<Progress>>>,
    cancel_token: CancellationToken,
}

impl ParallelDownloader {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: DownloaderConfig) -> Self {
        Self {
            transport,
            config,
            progress_callback: Arc::new(std::sync::Mutex::new(None)),
            latest_progress: Arc::new(std::sync::Mutex::new(None)),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        *self.progress_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    #[must_use]
    pub fn get_progress(&self) -> Option<Progress> {
        self.latest_progress.lock().unwrap().clone()
    }

    /// Cancels the in-flight download cooperatively. An alternative to
    /// cancelling via the caller's own context/token.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Downloads `url` to `output_path`, resuming from a matching sidecar
    /// if one exists (§4.2 steps 1-9).
    pub async fn download(&self, url: &str, output_path: &Path) -> Result<(), DownloadError> {
        let metadata = retry::retry(&self.config.retry, &self.cancel_token, || self.transport.head(url)).await?;

        let existing = state::load_matching(output_path, url, metadata.content_length).await?;

        let (download_state, resuming) = match existing {
            Some(state) => (state, true),
            None => {
                let num_chunks = if metadata.accept_ranges && metadata.content_length > 0 {
                    self.config.connections
                } else {
                    1
                };
                let chunks = plan_chunks(metadata.content_length, num_chunks);
                (
                    DownloadState::new(
                        url.to_string(),
                        metadata.filename.clone(),
                        metadata.content_length,
                        metadata.accept_ranges,
                        chunks,
                    ),
                    false,
                )
            }
        };

        let accept_ranges = download_state.accept_ranges;
        let total_size = download_state.total_size;
        let already_downloaded: u64 = download_state.chunks.iter().map(|c| c.downloaded).sum();

        let writer = if resuming {
            FileWriter::open_existing(output_path)?
        } else {
            FileWriter::create_sparse(output_path, total_size)?
        };

        let state = Arc::new(AsyncMutex::new(download_state));
        let total_downloaded = Arc::new(AtomicU64::new(already_downloaded));
        let start_time = Instant::now();

        let progress_handle = self.spawn_progress_ticker(
            state.clone(),
            total_downloaded.clone(),
            total_size,
            start_time,
        );
        let save_handle = self.spawn_state_saver(state.clone(), output_path.to_path_buf());

        let pending_ids: Vec<u32> = {
            let guard = state.lock().await;
            guard
                .chunks
                .iter()
                .filter(|c| c.status != ChunkStatus::Completed)
                .map(|c| c.id)
                .collect()
        };

        let mut join_set = tokio::task::JoinSet::new();
        for chunk_id in pending_ids {
            let transport = self.transport.clone();
            let writer = writer.clone();
            let state = state.clone();
            let total_downloaded = total_downloaded.clone();
            let rate_limiter = self.config.rate_limiter.clone();
            let retry_config = self.config.retry.clone();
            let cancel = self.cancel_token.clone();
            let url = url.to_string();

            join_set.spawn(run_chunk(
                transport,
                url,
                writer,
                state,
                chunk_id,
                accept_ranges,
                total_downloaded,
                rate_limiter,
                retry_config,
                cancel,
            ));
        }

        let mut first_error = None;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                    self.cancel_token.cancel();
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(DownloadError::Io(std::io::Error::other(join_error.to_string())));
                    }
                    self.cancel_token.cancel();
                }
            }
        }

        // Stop both tickers and join them before touching the sidecar, so a
        // pending save can never race the delete below (§9 design note).
        progress_handle.abort();
        save_handle.abort();
        let _ = progress_handle.await;
        let _ = save_handle.await;

        if let Some(error) = first_error {
            let guard = state.lock().await;
            let _ = state::save(output_path, &guard).await;
            return Err(error);
        }

        writer.truncate(total_size).await?;
        writer.close().await?;

        if let Some(last_modified) = metadata.last_modified {
            let _ = filetime::set_file_mtime(output_path, filetime::FileTime::from_system_time(last_modified));
        }

        state::delete(output_path).await?;
        Ok(())
    }

    fn spawn_progress_ticker(
        &self,
        state: Arc<AsyncMutex<DownloadState>>,
        total_downloaded: Arc<AtomicU64>,
        total_size: u64,
        start_time: Instant,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.config.progress_interval;
        let progress_callback = self.progress_callback.clone();
        let latest_progress = self.latest_progress.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut speed_tracker = SpeedTracker::default();
            loop {
                ticker.tick().await;
                let downloaded = total_downloaded.load(Ordering::SeqCst);
                let now = Instant::now();
                let speed = speed_tracker.sample(now, downloaded);

                let chunk_status: Vec<ChunkStatusSnapshot> = {
                    let guard = state.lock().await;
                    guard
                        .chunks
                        .iter()
                        .map(|c| ChunkStatusSnapshot {
                            id: c.id,
                            downloaded: c.downloaded,
                            total: c.size(),
                            status: c.status,
                        })
                        .collect()
                };

                let progress = build_progress(downloaded, total_size, speed, start_time, now, chunk_status);

                *latest_progress.lock().unwrap() = Some(progress.clone());
                if let Some(callback) = progress_callback.lock().unwrap().as_ref() {
                    callback(progress);
                }
            }
        })
    }

    fn spawn_state_saver(
        &self,
        state: Arc<AsyncMutex<DownloadState>>,
        output_path: PathBuf,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.config.state_save_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let mut guard = state.lock().await;
                guard.touch();
                if let Err(error) = state::save(&output_path, &guard).await {
                    tracing::warn!(?error, "periodic state save failed, skipping this tick");
                }
            }
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_chunk(
    transport: Arc<dyn Transport>,
    url: String,
    writer: Arc<FileWriter>,
    state: Arc<AsyncMutex<DownloadState>>,
    chunk_id: u32,
    accept_ranges: bool,
    total_downloaded: Arc<AtomicU64>,
    rate_limiter: Option<Arc<RateLimiter>>,
    retry_config: RetryConfig,
    cancel: CancellationToken,
) -> Result<(), DownloadError> {
    use futures_util::StreamExt;

    retry::retry(&retry_config, &cancel, || {
        let transport = transport.clone();
        let url = url.clone();
        let writer = writer.clone();
        let state = state.clone();
        let total_downloaded = total_downloaded.clone();
        let rate_limiter = rate_limiter.clone();
        let cancel = cancel.clone();

        async move {
            let (start, end) = {
                let mut guard = state.lock().await;
                let chunk = &mut guard.chunks[chunk_id as usize];
                chunk.status = ChunkStatus::InProgress;
                (chunk.start + chunk.downloaded, chunk.end)
            };

            if start > end {
                let mut guard = state.lock().await;
                guard.chunks[chunk_id as usize].status = ChunkStatus::Completed;
                return Ok(());
            }

            let mut stream = if accept_ranges {
                transport.get_range(&url, start, end).await?
            } else {
                transport.get(&url).await?.0
            };

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        let mut guard = state.lock().await;
                        guard.chunks[chunk_id as usize].status = ChunkStatus::Pending;
                        return Err(DownloadError::Cancelled);
                    }
                    next = stream.next() => {
                        match next {
                            Some(Ok(bytes)) => {
                                if let Some(limiter) = &rate_limiter {
                                    limiter.acquire(&cancel, bytes.len() as u64).await?;
                                }
                                for part in bytes.chunks(32 * 1024) {
                                    let offset = {
                                        let guard = state.lock().await;
                                        let chunk = &guard.chunks[chunk_id as usize];
                                        chunk.start + chunk.downloaded
                                    };
                                    writer.write_at(part, offset).await?;
                                    total_downloaded.fetch_add(part.len() as u64, Ordering::SeqCst);
                                    let mut guard = state.lock().await;
                                    let chunk = &mut guard.chunks[chunk_id as usize];
                                    chunk.downloaded += part.len() as u64;
                                    chunk.status = ChunkStatus::InProgress;
                                }
                            }
                            Some(Err(error)) => {
                                let mut guard = state.lock().await;
                                guard.chunks[chunk_id as usize].status = ChunkStatus::Failed;
                                return Err(error);
                            }
                            None => {
                                let mut guard = state.lock().await;
                                guard.chunks[chunk_id as usize].status = ChunkStatus::Completed;
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    })
    .await
}

/// Decides whether to skip a download entirely because the local file is
/// already current (§4.8), consulting timestamp first and falling back to
/// ETag when provided.
#[must_use]
pub fn should_skip(
    local_path: &Path,
    local_etag: Option<&str>,
    metadata: &crate::metadata::Metadata,
) -> conditional::Decision {
    if let Some(local_etag) = local_etag {
        if metadata.etag.is_some() {
            return conditional::check_etag(local_path, Some(local_etag), metadata);
        }
    }
    conditional::check_timestamp(local_path, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;

    fn metadata_with(etag: Option<&str>, last_modified: Option<std::time::SystemTime>) -> Metadata {
        Metadata {
            url: "https://x/f".to_string(),
            filename: "f".to_string(),
            content_length: 5,
            accept_ranges: true,
            content_type: None,
            last_modified,
            etag: etag.map(str::to_string),
            protocol: "HTTP/1.1".to_string(),
        }
    }

    #[test]
    fn default_config_matches_the_documented_tunables() {
        let config = DownloaderConfig::default();
        assert_eq!(config.connections, 4);
        assert!(config.rate_limiter.is_none());
        assert_eq!(config.progress_interval, Duration::from_millis(100));
        assert_eq!(config.state_save_interval, Duration::from_secs(5));
    }

    #[test]
    fn should_skip_prefers_etag_when_both_sides_have_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let metadata = metadata_with(Some("\"abc\""), Some(std::time::SystemTime::now() + Duration::from_secs(3600)));
        // remote looks newer by timestamp, but matching etags should still skip.
        let decision = should_skip(&path, Some("\"abc\""), &metadata);
        assert!(!decision.should_download);
    }

    #[test]
    fn should_skip_falls_back_to_timestamp_without_a_local_etag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let metadata = metadata_with(Some("\"abc\""), Some(std::time::SystemTime::now() - Duration::from_secs(3600)));
        let decision = should_skip(&path, None, &metadata);
        assert!(!decision.should_download);
    }
}
