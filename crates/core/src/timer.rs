//! Frame timing and throughput reporting.

use std::time::{Duration, Instant};

/// Throughput over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Presented frames per second over the window.
    pub fps: f64,
    /// Frames that reached presentation.
    pub presented: u32,
    /// Ticks that were skipped (minimized, stale surface, timeouts).
    pub skipped: u32,
    /// Length of the window.
    pub window: Duration,
}

/// Measures per-tick delta time and counts presented versus skipped frames.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    report_interval: Duration,
    presented: u32,
    skipped: u32,
}

impl FrameTimer {
    /// Create a timer that produces a report every `report_interval`.
    pub fn new(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            report_interval,
            presented: 0,
            skipped: 0,
        }
    }

    /// Total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Count one engine tick as presented or skipped.
    pub fn record(&mut self, presented: bool) {
        if presented {
            self.presented += 1;
        } else {
            self.skipped += 1;
        }
    }

    /// Returns a report and starts a new window once the interval has passed.
    pub fn take_report(&mut self) -> Option<FrameReport> {
        self.take_report_at(Instant::now())
    }

    fn take_report_at(&mut self, now: Instant) -> Option<FrameReport> {
        let window = now.saturating_duration_since(self.window_start);
        if window < self.report_interval {
            return None;
        }

        let report = FrameReport {
            fps: f64::from(self.presented) / window.as_secs_f64().max(f64::EPSILON),
            presented: self.presented,
            skipped: self.skipped,
            window,
        };

        self.window_start = now;
        self.presented = 0;
        self.skipped = 0;
        Some(report)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let mut timer = FrameTimer::new(Duration::from_secs(60));
        timer.record(true);
        assert!(timer.take_report().is_none());
    }

    #[test]
    fn test_report_counts_and_resets() {
        let mut timer = FrameTimer::new(Duration::from_millis(500));
        for _ in 0..30 {
            timer.record(true);
        }
        timer.record(false);

        let later = timer.window_start + Duration::from_secs(1);
        let report = timer.take_report_at(later).unwrap();
        assert_eq!(report.presented, 30);
        assert_eq!(report.skipped, 1);
        assert!((report.fps - 30.0).abs() < 1e-9);

        assert!(timer.take_report_at(later).is_none());
        assert_eq!(timer.presented, 0);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = FrameTimer::default();
        let first = timer.tick();
        let second = timer.tick();
        assert!(first <= timer.elapsed());
        assert!(second <= timer.elapsed());
    }
}
