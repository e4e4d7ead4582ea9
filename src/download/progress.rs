//! Download progress reporting
//!
//! Progress is published on a broadcast channel as [`DownloadProgress`]
//! events. Fractional reports are throttled to one per interval; the final
//! 100% report always goes out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Capacity of the progress channel; slow subscribers miss old events
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// A progress event for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub url: String,
    /// 0.0 - 100.0
    pub percent: f64,
}

/// Rate limiter for progress reports
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a report at `now` is allowed; records it if so
    pub fn should_report(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Per-transfer reporter publishing throttled events for one URL
pub struct ProgressReporter {
    url: String,
    tx: broadcast::Sender<DownloadProgress>,
    throttle: ProgressThrottle,
}

impl ProgressReporter {
    pub fn new(url: &str, tx: broadcast::Sender<DownloadProgress>, interval: Duration) -> Self {
        Self {
            url: url.to_string(),
            tx,
            throttle: ProgressThrottle::new(interval),
        }
    }

    /// Report fractional progress, subject to the throttle
    pub fn report(&mut self, percent: f64) {
        if self.throttle.should_report(Instant::now()) {
            self.send(percent.clamp(0.0, 100.0));
        }
    }

    /// Report completion (never throttled)
    pub fn complete(&mut self) {
        self.send(100.0);
    }

    fn send(&self, percent: f64) {
        // No subscribers is fine
        let _ = self.tx.send(DownloadProgress {
            url: self.url.clone(),
            percent,
        });
    }
}
