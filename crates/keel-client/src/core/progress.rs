use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::data::{ProgressInfo, ProgressSample};

/// Number of samples the rate is computed over.
pub const PROGRESS_WINDOW: usize = 10;

/// Turns a sequence of byte counts into rate, percentage and ETA.
///
/// Knows nothing about transport; callers feed it byte counts as chunks
/// move.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    samples: VecDeque<ProgressSample>,
    total: Option<u64>,
    loaded: u64,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            samples: VecDeque::with_capacity(PROGRESS_WINDOW + 1),
            total,
            loaded: 0,
        }
    }

    pub fn update(&mut self, loaded: u64, total: Option<u64>) -> ProgressInfo {
        self.update_at(Instant::now(), loaded, total)
    }

    pub fn update_at(&mut self, at: Instant, loaded: u64, total: Option<u64>) -> ProgressInfo {
        if total.is_some() {
            self.total = total;
        }
        self.loaded = loaded;

        self.samples.push_back(ProgressSample { at, loaded });
        if self.samples.len() > PROGRESS_WINDOW {
            self.samples.pop_front();
        }

        let rate = self.rate();
        ProgressInfo {
            loaded,
            total: self.total,
            percentage: self.percentage(),
            rate,
            eta: self.eta(rate),
            done: false,
        }
    }

    /// Terminal snapshot: 100%, zero rate, `done`.
    pub fn complete(&mut self, total: Option<u64>) -> ProgressInfo {
        if total.is_some() {
            self.total = total;
        }
        let loaded = self.total.unwrap_or(self.loaded);
        self.loaded = loaded;

        ProgressInfo {
            loaded,
            total: self.total,
            percentage: Some(100.0),
            rate: 0.0,
            eta: None,
            done: true,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &ProgressSample> {
        self.samples.iter()
    }

    fn rate(&self) -> f64 {
        let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = newest.at.saturating_duration_since(oldest.at).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        newest.loaded.saturating_sub(oldest.loaded) as f64 / elapsed
    }

    fn percentage(&self) -> Option<f64> {
        self.total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.loaded as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
            }
        })
    }

    fn eta(&self, rate: f64) -> Option<Duration> {
        let total = self.total?;
        if rate > 0.0 && total > self.loaded {
            Some(Duration::from_secs_f64((total - self.loaded) as f64 / rate))
        } else {
            None
        }
    }
}
