//! Error taxonomy for the transfer engine.
//!
//! Each variant carries its own recovery/propagation policy (see §7 of the
//! spec this crate implements): the retry controller and mirror selector key
//! off `DownloadError::is_retryable`, and the CLI-equivalent collaborator
//! maps each kind to one of the documented process exit codes.

/// Errors surfaced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Connect failure, DNS failure, read/write timeout as reported by the transport.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP status outside the expected set for the operation (status >= 400,
    /// or an unexpected success status).
    #[error("http error: status {status}")]
    Http { status: u16 },

    /// The server returned 200 for a ranged GET instead of 206; accepting the
    /// full body would corrupt the parallel write plan.
    #[error("server does not support range requests")]
    RangeUnsupported,

    /// TLS handshake, certificate validation, or public-key pinning failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// HTTP 401/407.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Local filesystem failure (permission denied, no space left, etc).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol named by a URL scheme this transport cannot speak.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The download was cancelled cooperatively (ctx cancellation or `cancel()`).
    #[error("interrupted")]
    Cancelled,

    /// Downloaded content did not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A URL, header value, or sidecar value was structurally invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Writer was used after `close()`.
    #[error("writer is closed")]
    Closed,

    /// Every mirror was tried and failed.
    #[error("all mirrors failed: {0}")]
    AllMirrorsFailed(String),
}

impl DownloadError {
    /// Whether the retry controller should attempt this operation again,
    /// absent an explicit allow-list match. Only genuine network-layer
    /// failures are retried by default; everything else is either a
    /// permanent failure or handled by a different layer (mirror selection,
    /// cancellation propagation).
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        matches!(self, DownloadError::Network(_))
    }

    /// Cancellation is never retried, regardless of allow-lists.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }

    /// Process exit code per §6.6.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            DownloadError::Network(_) | DownloadError::Http { .. } | DownloadError::RangeUnsupported => 3,
            DownloadError::Auth(_) => 4,
            DownloadError::Tls(_) => 5,
            DownloadError::ChecksumMismatch { .. } => 6,
            DownloadError::Cancelled => 8,
            DownloadError::InvalidInput(_) => 2,
            DownloadError::Io(_) | DownloadError::Closed | DownloadError::AllMirrorsFailed(_) => 1,
            DownloadError::UnsupportedProtocol(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(DownloadError::Network("x".into()).exit_code(), 3);
        assert_eq!(DownloadError::Http { status: 503 }.exit_code(), 3);
        assert_eq!(DownloadError::RangeUnsupported.exit_code(), 3);
        assert_eq!(DownloadError::Auth("x".into()).exit_code(), 4);
        assert_eq!(DownloadError::Tls("x".into()).exit_code(), 5);
        assert_eq!(
            DownloadError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(DownloadError::Cancelled.exit_code(), 8);
    }

    #[test]
    fn only_network_errors_are_retryable_by_default() {
        assert!(DownloadError::Network("timeout".into()).is_network_error());
        assert!(!DownloadError::Http { status: 404 }.is_network_error());
        assert!(!DownloadError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_network_error());
    }

    #[test]
    fn cancellation_is_never_network_retryable() {
        assert!(DownloadError::Cancelled.is_cancellation());
        assert!(!DownloadError::Cancelled.is_network_error());
    }
}
