//! Token-bucket rate limiter (§4.4). Implemented by hand rather than atop
//! `governor` (present in the wider workspace dependency set): the refill,
//! lock-release-before-sleep, and cooperative-cancellation semantics here
//! are specified exactly and don't map cleanly onto `governor`'s GCRA model.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// A single token bucket limiting throughput to `bytes_per_second`, with a
/// one-second burst (`max_tokens = bytes_per_second`). A limit of zero
/// disables limiting entirely.
pub struct RateLimiter {
    bytes_per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: bytes_per_second as f64,
            bucket: Mutex::new(Bucket {
                tokens: bytes_per_second as f64,
                last_update: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_second <= 0.0
    }

    /// Blocks until `n` bytes of credit are available, then deducts them.
    /// Returns `Err(DownloadError::Cancelled)` if `token` fires while
    /// waiting (§4.4 algorithm).
    pub async fn acquire(&self, token: &CancellationToken, n: u64) -> Result<(), DownloadError> {
        if self.is_unlimited() || n == 0 {
            return Ok(());
        }
        let n = n as f64;

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.bytes_per_second).min(self.bytes_per_second);
                bucket.last_update = now;

                if bucket.tokens >= n {
                    bucket.tokens -= n;
                    None
                } else {
                    let deficit = n - bucket.tokens;
                    bucket.tokens = 0.0;
                    Some(deficit / self.bytes_per_second)
                }
                // lock released here, before any sleep
            };

            match wait {
                None => return Ok(()),
                Some(seconds) => {
                    tokio::select! {
                        () = token.cancelled() => return Err(DownloadError::Cancelled),
                        () = tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)) => {}
                    }
                    // loop again: refill may have continued via another caller,
                    // re-check rather than assume we now have exactly `n`.
                }
            }
        }
    }
}

/// Owns a default limiter plus per-host overrides, instantiating one
/// `RateLimiter` per host on first use (§4.4 "Per-host variant").
pub struct PerHostRateLimiter {
    default_bps: u64,
    patterns: Vec<(String, u64)>,
    limiters: StdMutex<HashMap<String, std::sync::Arc<RateLimiter>>>,
}

impl PerHostRateLimiter {
    #[must_use]
    pub fn new(default_bytes_per_second: u64, host_limits: Vec<(String, u64)>) -> Self {
        Self {
            default_bps: default_bytes_per_second,
            patterns: host_limits,
            limiters: StdMutex::new(HashMap::new()),
        }
    }

    /// Matches `host` against the configured patterns. A pattern prefixed
    /// `*.` matches the suffix host and the apex itself (`*.cdn.example.com`
    /// matches both `a.cdn.example.com` and `cdn.example.com`).
    fn limit_for_host(&self, host: &str) -> u64 {
        for (pattern, limit) in &self.patterns {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                if host == suffix || host.ends_with(&format!(".{suffix}")) {
                    return *limit;
                }
            } else if pattern == host {
                return *limit;
            }
        }
        self.default_bps
    }

    /// Returns the limiter for `host`, creating it on first use.
    #[must_use]
    pub fn limiter_for(&self, host: &str) -> std::sync::Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().unwrap();
        if let Some(existing) = limiters.get(host) {
            return existing.clone();
        }
        let limiter = std::sync::Arc::new(RateLimiter::new(self.limit_for_host(host)));
        limiters.insert(host.to_string(), limiter.clone());
        limiter
    }
}
