//! Conditional download checks (§4.8): decide whether a local file is
//! already current before spending a transfer.

use crate::metadata::{normalize_etag, Metadata};
use std::path::Path;
use std::time::SystemTime;

/// Outcome of a conditional check, with a human-readable reason for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub should_download: bool,
    pub reason: &'static str,
}

fn decision(should_download: bool, reason: &'static str) -> Decision {
    Decision { should_download, reason }
}

/// Compares local file metadata against the remote's `last_modified` and
/// `content_length`.
#[must_use]
pub fn check_timestamp(local_path: &Path, metadata: &Metadata) -> Decision {
    let Ok(local_meta) = std::fs::metadata(local_path) else {
        return decision(true, "local file does not exist");
    };

    let Some(remote_modified) = metadata.last_modified else {
        return decision(true, "remote last-modified is absent, cannot compare");
    };

    let Ok(local_modified) = local_meta.modified() else {
        return decision(true, "local mtime unavailable, cannot compare");
    };

    if local_modified < remote_modified {
        return decision(true, "remote is newer than local");
    }

    // local_modified >= remote_modified: the timestamp alone settles it,
    // even if the reported content length disagrees with the local size.
    decision(false, "local file is up to date")
}

/// Compares a locally recorded ETag against the remote's, after normalizing
/// both (weak prefix and quotes stripped).
#[must_use]
pub fn check_etag(local_path: &Path, local_etag: Option<&str>, metadata: &Metadata) -> Decision {
    if std::fs::metadata(local_path).is_err() {
        return decision(true, "local file does not exist");
    }

    let Some(remote_etag) = metadata.etag.as_deref() else {
        return decision(true, "remote etag is absent, cannot compare");
    };
    let Some(local_etag) = local_etag else {
        return decision(true, "no locally recorded etag, cannot compare");
    };

    if normalize_etag(local_etag) == normalize_etag(remote_etag) {
        decision(false, "etags match")
    } else {
        decision(true, "etags differ")
    }
}

#[must_use]
pub fn system_time_from_unix(seconds: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use std::time::Duration;

    fn base_metadata() -> Metadata {
        Metadata {
            url: "https://x/f".to_string(),
            filename: "f".to_string(),
            content_length: 0,
            accept_ranges: true,
            content_type: None,
            last_modified: None,
            etag: None,
            protocol: "HTTP/1.1".to_string(),
        }
    }

    #[test]
    fn missing_local_file_always_downloads() {
        let metadata = base_metadata();
        let decision = check_timestamp(Path::new("/nonexistent/does-not-exist"), &metadata);
        assert!(decision.should_download);
    }

    #[test]
    fn absent_remote_timestamp_always_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"x").unwrap();
        let metadata = base_metadata();
        let decision = check_timestamp(&path, &metadata);
        assert!(decision.should_download);
    }

    #[test]
    fn up_to_date_local_file_with_matching_size_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut metadata = base_metadata();
        metadata.content_length = 5;
        metadata.last_modified = Some(SystemTime::now() - Duration::from_secs(3600));

        let decision = check_timestamp(&path, &metadata);
        assert!(!decision.should_download);
    }

    #[test]
    fn newer_remote_triggers_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut metadata = base_metadata();
        metadata.content_length = 5;
        metadata.last_modified = Some(SystemTime::now() + Duration::from_secs(3600));

        let decision = check_timestamp(&path, &metadata);
        assert!(decision.should_download);
    }

    #[test]
    fn size_mismatch_with_current_timestamp_still_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut metadata = base_metadata();
        metadata.content_length = 999;
        metadata.last_modified = Some(SystemTime::now() - Duration::from_secs(3600));

        let decision = check_timestamp(&path, &metadata);
        assert!(!decision.should_download);
    }

    #[test]
    fn matching_normalized_etags_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut metadata = base_metadata();
        metadata.etag = Some("W/\"abc123\"".to_string());

        let decision = check_etag(&path, Some("\"abc123\""), &metadata);
        assert!(!decision.should_download);
    }

    #[test]
    fn differing_etags_trigger_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut metadata = base_metadata();
        metadata.etag = Some("\"new\"".to_string());

        let decision = check_etag(&path, Some("\"old\""), &metadata);
        assert!(decision.should_download);
    }
}
