//! Fixed-interval tick scheduling.
//!
//! The clock never sleeps; the caller feeds it the current instant and it
//! reports how many interval boundaries were crossed since the last call.

use std::time::{Duration, Instant};

use tracing::debug;

/// Upper bound on boundaries reported by a single `advance` call.
const MAX_CATCH_UP_TICKS: u32 = 5;

#[derive(Debug, Clone)]
pub struct TickClock {
    interval: Duration,
    last: Option<Instant>,
    accumulator: Duration,
    total_ticks: u64,
}

impl TickClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            last: None,
            accumulator: Duration::ZERO,
            total_ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Restart accumulation at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.last = Some(now);
        self.accumulator = Duration::ZERO;
        self.total_ticks = 0;
    }

    /// Number of interval boundaries crossed since the previous call.
    ///
    /// An unstarted clock starts at `now` and reports zero. Backlog beyond
    /// [`MAX_CATCH_UP_TICKS`] is discarded.
    pub fn advance(&mut self, now: Instant) -> u32 {
        let Some(last) = self.last else {
            self.last = Some(now);
            return 0;
        };

        self.accumulator += now.saturating_duration_since(last);
        self.last = Some(now);

        let mut due = 0u32;
        while self.accumulator >= self.interval {
            self.accumulator -= self.interval;
            due += 1;
        }

        if due > MAX_CATCH_UP_TICKS {
            debug!(due, "tick backlog dropped");
            due = MAX_CATCH_UP_TICKS;
        }

        self.total_ticks += u64::from(due);
        due
    }
}
