use std::time::Duration;

use tokio::time::Instant;

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Bytes transferred so far.
    pub loaded: u64,

    /// Total expected bytes, if known.
    pub total: Option<u64>,

    /// `loaded / total * 100` clamped to `[0, 100]`; `None` without a total.
    pub percentage: Option<f64>,

    /// Bytes per second over the retained sample window.
    pub rate: f64,

    /// Estimated time remaining; `None` when the rate or total is unknown.
    pub eta: Option<Duration>,

    /// Terminal snapshot.
    pub done: bool,
}

impl ProgressInfo {
    pub fn is_completed(&self) -> bool {
        self.done
    }
}

/// One `(time, bytes loaded)` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub at: Instant,
    pub loaded: u64,
}
