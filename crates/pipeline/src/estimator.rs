//! Smoothed speed and ETA from a sliding window of byte deltas.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// ETA smoothing factor; low alpha keeps the estimate flat under jitter.
const ETA_SMOOTHING: f64 = 0.01;

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Tracks remaining-byte observations and derives speed and a smoothed ETA.
pub struct UploadEstimator {
    window: Duration,
    samples: VecDeque<Sample>,
    smoothed_eta: Option<f64>,
    previous_remaining: Option<u64>,
}

impl Default for UploadEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl UploadEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            smoothed_eta: None,
            previous_remaining: None,
        }
    }

    fn record(&mut self, remaining: u64, now: Instant) {
        if let Some(prev) = self.previous_remaining {
            // Remaining bytes can grow on rollback; only downward motion
            // is a progress sample.
            if prev > remaining {
                self.samples.push_back(Sample {
                    bytes: prev - remaining,
                    at: now,
                });
            }
        }
        self.previous_remaining = Some(remaining);

        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current transfer rate in bytes per second over the window, or
    /// `None` before the first progress sample.
    pub fn speed(&self) -> Option<f64> {
        let oldest = self.samples.front()?.at;
        let elapsed = Instant::now()
            .duration_since(oldest)
            .as_secs_f64()
            .max(0.001);
        let total: u64 = self.samples.iter().map(|s| s.bytes).sum();
        Some(total as f64 / elapsed)
    }

    /// Records `remaining` and returns the smoothed time-to-completion,
    /// or `None` while the speed is unknown.
    pub fn estimate_remaining(&mut self, remaining: u64) -> Option<Duration> {
        self.record(remaining, Instant::now());

        let speed = self.speed()?;
        if speed <= 0.0 {
            return None;
        }
        let raw = remaining as f64 / speed;

        let eta = match self.smoothed_eta {
            None => raw,
            Some(prev) => prev + ETA_SMOOTHING * (raw - prev),
        };
        self.smoothed_eta = Some(eta);
        Some(Duration::from_secs_f64(eta.max(0.0)))
    }
}
