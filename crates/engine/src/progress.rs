//! `Progress` snapshots and the sliding-window speed smoother (§3, §4.2
//! step 6). The 100 ms ticker that drives this lives in `downloader.rs`;
//! this module only owns the pure data and the averaging math.

use std::time::{Duration, Instant};

/// Per-chunk status included in a `Progress` snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStatusSnapshot {
    pub id: u32,
    pub downloaded: u64,
    pub total: u64,
    pub status: crate::chunk::ChunkStatus,
}

/// A point-in-time view of a download, handed to the caller's progress
/// callback (§6.1 `set_progress_callback`).
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total_size: u64,
    pub speed: f64,
    pub percent: f64,
    pub start_time: Instant,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    pub chunk_status: Vec<ChunkStatusSnapshot>,
}

impl Progress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_size > 0 && self.downloaded >= self.total_size
    }
}

/// Sliding window of the last 10 `(elapsed_seconds, bytes)` samples (§4.2
/// step 6: "sliding window of 10 samples, simple mean").
pub struct SpeedTracker {
    window: std::collections::VecDeque<(Instant, u64)>,
    capacity: usize,
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SpeedTracker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a new `(now, total_downloaded)` sample and returns the mean
    /// bytes-per-second over the window.
    pub fn sample(&mut self, now: Instant, total_downloaded: u64) -> f64 {
        self.window.push_back((now, total_downloaded));
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        if self.window.len() < 2 {
            return 0.0;
        }

        let (first_time, first_bytes) = *self.window.front().unwrap();
        let (last_time, last_bytes) = *self.window.back().unwrap();
        let elapsed = last_time.duration_since(first_time).as_secs_f64();
        if elapsed <= 0.0 || last_bytes < first_bytes {
            return 0.0;
        }
        (last_bytes - first_bytes) as f64 / elapsed
    }
}

/// Builds a `Progress` snapshot from the current counters (§4.2 step 6:
/// `percent` and `eta = (total - downloaded) / speed`).
#[must_use]
pub fn build_progress(
    downloaded: u64,
    total_size: u64,
    speed: f64,
    start_time: Instant,
    now: Instant,
    chunk_status: Vec<ChunkStatusSnapshot>,
) -> Progress {
    let percent = if total_size > 0 {
        (downloaded as f64 / total_size as f64) * 100.0
    } else {
        0.0
    };

    let eta = if speed > 0.0 && total_size > downloaded {
        Some(Duration::from_secs_f64((total_size - downloaded) as f64 / speed))
    } else {
        None
    };

    Progress {
        downloaded,
        total_size,
        speed,
        percent,
        start_time,
        elapsed: now.duration_since(start_time),
        eta,
        chunk_status,
    }
}
