//! Mirror selection and failover (§4.6). Grounded on the teacher's absent
//! equivalent and on `turbo-cdn`'s `ServerTracker`, which tracks per-server
//! health and latency across a fixed set of candidate URLs.

use crate::error::DownloadError;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Selection strategy for `MirrorSelector::next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStrategy {
    Failover,
    RoundRobin,
    Random,
    Fastest,
}

#[derive(Debug, Clone)]
struct MirrorEntry {
    url: String,
    priority: i32,
    weight: u32,
    healthy: bool,
    last_latency: Option<Duration>,
    fail_count: u32,
}

/// Maintains a list of mirrors with independent health, selecting one per
/// call according to `strategy`.
pub struct MirrorSelector {
    strategy: MirrorStrategy,
    mirrors: Vec<MirrorEntry>,
    round_robin_cursor: usize,
}

impl MirrorSelector {
    #[must_use]
    pub fn new(strategy: MirrorStrategy, urls: Vec<(String, i32, u32)>) -> Self {
        let mirrors = urls
            .into_iter()
            .map(|(url, priority, weight)| MirrorEntry {
                url,
                priority,
                weight,
                healthy: true,
                last_latency: None,
                fail_count: 0,
            })
            .collect();
        Self {
            strategy,
            mirrors,
            round_robin_cursor: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    fn healthy_indices(&self) -> Vec<usize> {
        self.mirrors
            .iter()
            .enumerate()
            .filter(|(_, m)| m.healthy)
            .map(|(i, _)| i)
            .collect()
    }

    /// Resets every mirror to healthy. Called automatically when none are
    /// healthy (forced retry round).
    pub fn reset_all_healthy(&mut self) {
        for mirror in &mut self.mirrors {
            mirror.healthy = true;
            mirror.fail_count = 0;
        }
    }

    /// Selects the next mirror URL per the configured strategy. Forces a
    /// health reset if every mirror is currently unhealthy.
    pub fn next(&mut self) -> Option<String> {
        if self.mirrors.is_empty() {
            return None;
        }
        if self.healthy_indices().is_empty() {
            self.reset_all_healthy();
        }

        let healthy = self.healthy_indices();
        if healthy.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            MirrorStrategy::Failover => *healthy
                .iter()
                .max_by_key(|&&i| (self.mirrors[i].priority, -(i as i64)))
                .unwrap(),
            MirrorStrategy::RoundRobin => {
                let idx = healthy[self.round_robin_cursor % healthy.len()];
                self.round_robin_cursor = self.round_robin_cursor.wrapping_add(1);
                idx
            }
            MirrorStrategy::Random => {
                let pick = rand::random::<usize>() % healthy.len();
                healthy[pick]
            }
            MirrorStrategy::Fastest => healthy
                .iter()
                .copied()
                .min_by_key(|&i| self.mirrors[i].last_latency.unwrap_or(Duration::MAX))
                .unwrap_or(healthy[0]),
        };

        Some(self.mirrors[chosen].url.clone())
    }

    /// Records a successful fetch's latency and clears the mirror's failure streak.
    pub fn record_success(&mut self, url: &str, latency: Duration) {
        if let Some(mirror) = self.mirrors.iter_mut().find(|m| m.url == url) {
            mirror.last_latency = Some(latency);
            mirror.fail_count = 0;
            mirror.healthy = true;
        }
    }

    /// Records a failure; three consecutive failures mark the mirror unhealthy.
    pub fn record_failure(&mut self, url: &str) {
        if let Some(mirror) = self.mirrors.iter_mut().find(|m| m.url == url) {
            mirror.fail_count += 1;
            if mirror.fail_count >= 3 {
                mirror.healthy = false;
            }
        }
    }
}

/// Wraps an async operation over a `MirrorSelector`, iterating at most
/// `mirror_count * max_retries` selections (§4.6), skipping URLs already
/// tried this call, and returning the first success or the last error.
pub async fn download_with_mirrors<F, Fut, T>(
    selector: &mut MirrorSelector,
    retry_config: &RetryConfig,
    mut operation: F,
) -> Result<T, DownloadError>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<(T, Duration), DownloadError>>,
{
    let max_attempts = selector.len() as u32 * (retry_config.max_retries + 1);
    let mut tried = std::collections::HashSet::new();
    let mut last_error: Option<DownloadError> = None;

    for _ in 0..max_attempts.max(1) {
        let Some(url) = selector.next() else {
            break;
        };
        if tried.contains(&url) {
            continue;
        }
        tried.insert(url.clone());

        match operation(url.clone()).await {
            Ok((value, latency)) => {
                selector.record_success(&url, latency);
                return Ok(value);
            }
            Err(error) => {
                selector.record_failure(&url);
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| DownloadError::AllMirrorsFailed("no mirrors configured".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_mirrors() -> MirrorSelector {
        MirrorSelector::new(
            MirrorStrategy::Failover,
            vec![
                ("https://a".to_string(), 1, 1),
                ("https://b".to_string(), 5, 1),
                ("https://c".to_string(), 5, 1),
            ],
        )
    }

    #[test]
    fn failover_picks_highest_priority_then_insertion_order() {
        let mut selector = three_mirrors();
        // b and c tie at priority 5; b inserted first.
        assert_eq!(selector.next(), Some("https://b".to_string()));
    }

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let mut selector = MirrorSelector::new(
            MirrorStrategy::RoundRobin,
            vec![("https://a".to_string(), 0, 1), ("https://b".to_string(), 0, 1)],
        );
        assert_eq!(selector.next(), Some("https://a".to_string()));
        assert_eq!(selector.next(), Some("https://b".to_string()));
        assert_eq!(selector.next(), Some("https://a".to_string()));
    }

    #[test]
    fn fastest_prefers_smallest_measured_latency() {
        let mut selector = MirrorSelector::new(
            MirrorStrategy::Fastest,
            vec![("https://a".to_string(), 0, 1), ("https://b".to_string(), 0, 1)],
        );
        selector.record_success("https://a", Duration::from_millis(500));
        selector.record_success("https://b", Duration::from_millis(50));
        assert_eq!(selector.next(), Some("https://b".to_string()));
    }

    #[test]
    fn three_consecutive_failures_mark_unhealthy_and_skip() {
        let mut selector = three_mirrors();
        selector.record_failure("https://b");
        selector.record_failure("https://b");
        selector.record_failure("https://b");
        // b is now unhealthy, c has the next-highest priority.
        assert_eq!(selector.next(), Some("https://c".to_string()));
    }

    #[test]
    fn all_unhealthy_forces_reset() {
        let mut selector = MirrorSelector::new(MirrorStrategy::Failover, vec![("https://a".to_string(), 0, 1)]);
        for _ in 0..3 {
            selector.record_failure("https://a");
        }
        // only mirror is unhealthy; next() must force a reset rather than return None.
        assert_eq!(selector.next(), Some("https://a".to_string()));
    }

    #[tokio::test]
    async fn download_with_mirrors_returns_first_success() {
        let mut selector = three_mirrors();
        let retry_config = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };

        let result = download_with_mirrors(&mut selector, &retry_config, |url| async move {
            if url == "https://b" {
                Ok((42, Duration::from_millis(10)))
            } else {
                Err(DownloadError::Network("down".into()))
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn download_with_mirrors_exhausts_and_returns_last_error() {
        let mut selector = three_mirrors();
        let retry_config = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };

        let result: Result<i32, DownloadError> =
            download_with_mirrors(&mut selector, &retry_config, |_url| async move {
                Err(DownloadError::Network("down".into()))
            })
            .await;

        assert!(result.is_err());
    }
}
