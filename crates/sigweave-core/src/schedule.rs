//! Absolute-time tick scheduling.
//!
//! Tick `k` of a loop is due at `start + k * period`, where `start` is the
//! pipeline's single start instant. Deadlines never move: a tick that starts
//! late runs at once and the following ticks return to the grid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::sample::SampleFormat;

/// Lateness below this is scheduler noise, not a late tick.
pub const LATE_TOLERANCE: Duration = Duration::from_millis(1);

/// Longest uninterrupted sleep, so a stop request is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// What a component step knows about the tick it runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// Zero-based tick number.
    pub index: u64,
    /// Scheduled time of this tick relative to the pipeline start, in microseconds.
    pub time_us: i64,
    pub period: Duration,
}

impl TickContext {
    /// Samples at `format`'s rate due by the end of this tick, counted from
    /// the first tick.
    pub fn samples_due(&self, format: &SampleFormat) -> u64 {
        let end = (self.index + 1) as f64 * self.period.as_secs_f64();
        format.samples_for(end) as u64
    }
}

/// Timing statistics of one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    /// Ticks that began more than [`LATE_TOLERANCE`] after their deadline.
    pub late_ticks: u64,
    pub max_lateness: Duration,
}

impl TickStats {
    fn record(&mut self, lateness: Duration) {
        self.ticks += 1;
        if lateness > LATE_TOLERANCE {
            self.late_ticks += 1;
        }
        self.max_lateness = self.max_lateness.max(lateness);
    }
}

/// Drives one component loop on the absolute tick grid.
#[derive(Debug)]
pub struct TickClock {
    start: Instant,
    period: Duration,
    next: u64,
    stats: TickStats,
}

impl TickClock {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self {
            start,
            period: period.max(Duration::from_micros(1)),
            next: 0,
            stats: TickStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Deadline of tick `index`.
    pub fn deadline(&self, index: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(u128::from(index));
        self.start + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Sleep until the next tick is due and return it.
    ///
    /// Returns `None` as soon as `stop` is set.
    pub fn wait_next(&mut self, stop: &AtomicBool) -> Option<TickContext> {
        let index = self.next;
        let deadline = self.deadline(index);
        loop {
            if stop.load(Ordering::Acquire) {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                self.stats.record(now - deadline);
                break;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }

        self.next += 1;
        Some(TickContext {
            index,
            time_us: i64::try_from((deadline - self.start).as_micros()).unwrap_or(i64::MAX),
            period: self.period,
        })
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }
}
