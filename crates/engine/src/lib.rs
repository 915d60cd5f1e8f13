//! Transfer engine: HTTP(S) transport, resumable parallel chunked
//! downloads, rate limiting, retries, mirror failover, and checksum
//! verification. Everything here is a library used by a CLI, TUI, or
//! scheduler built on top; this crate has no entry point of its own.

pub mod checksum;
pub mod chunk;
pub mod conditional;
pub mod downloader;
pub mod error;
pub mod metadata;
pub mod mirror;
pub mod progress;
pub mod rate_limiter;
pub mod retry;
pub mod state;
pub mod tls;
pub mod transport;
pub mod writer;

pub use checksum::{Algorithm, Checksum, ChecksumWriter};
pub use chunk::{plan_chunks, tiles_exactly, Chunk, ChunkStatus};
pub use conditional::{check_etag, check_timestamp, Decision};
pub use downloader::{DownloaderConfig, ParallelDownloader, ProgressCallback};
pub use error::DownloadError;
pub use metadata::sanitize_filename;
pub use mirror::{download_with_mirrors, MirrorSelector, MirrorStrategy};
pub use progress::Progress;
pub use rate_limiter::{PerHostRateLimiter, RateLimiter};
pub use retry::RetryConfig;
pub use state::DownloadState;
pub use transport::{HttpTransport, Metadata, Transport, TransportConfig};
pub use writer::FileWriter;
