//! Retry controller (§4.5). Grounded on `sps2`'s
//! `net::download::retry::calculate_backoff_delay` and `RetryConfig`,
//! generalized to operate over the async closure pattern and this crate's
//! `DownloadError` classification instead of a fixed download function.

use crate::error::DownloadError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `max_retries`, `initial_delay`, `max_delay`, `multiplier`, `jitter`, and
/// an optional allow-list of error kinds that are retried even though
/// they're not network errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub allow_list: Vec<fn(&DownloadError) -> bool>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            allow_list: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Delay for attempt `i`: `min(initial * multiplier^i, max) * (1 + U(-jitter, +jitter))`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32);
        let base = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter_factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter;
        Duration::from_secs_f64((base * jitter_factor).max(0.0))
    }

    fn should_retry(&self, error: &DownloadError) -> bool {
        if error.is_cancellation() {
            return false;
        }
        if self.allow_list.iter().any(|predicate| predicate(error)) {
            return true;
        }
        error.is_network_error()
    }
}

/// Runs `operation` up to `max_retries + 1` times total, classifying each
/// failure per §4.5's policy and sleeping (subject to cancellation) between
/// attempts.
pub async fn retry<F, Fut, T>(
    config: &RetryConfig,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, DownloadError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DownloadError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_retries || !config.should_retry(&error) {
                    return Err(error);
                }
                let delay = config.backoff_delay(attempt);
                tokio::select! {
                    () = token.cancelled() => return Err(DownloadError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_delay_grows_exponentially_and_caps() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2000));
        // attempt large enough that initial * multiplier^i would exceed max_delay
        assert_eq!(config.backoff_delay(20), config.max_delay);
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let config = RetryConfig::default();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, DownloadError> = retry(&config, &token, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_network_errors_up_to_the_limit() {
        let config = RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, DownloadError> = retry(&config, &token, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::Network("timeout".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let config = RetryConfig::default();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, DownloadError> = retry(&config, &token, || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::ChecksumMismatch {
                    expected: "a".into(),
                    actual: "b".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_never_retried() {
        let config = RetryConfig::default();
        let token = CancellationToken::new();
        let result: Result<u32, DownloadError> = retry(&config, &token, || async { Err(DownloadError::Cancelled) }).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[tokio::test]
    async fn allow_list_retries_non_network_errors() {
        let config = RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            allow_list: vec![|e| matches!(e, DownloadError::Http { status: 503 })],
            ..RetryConfig::default()
        };
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32, DownloadError> = retry(&config, &token, || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(DownloadError::Http { status: 503 })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
