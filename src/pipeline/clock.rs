//! Fixed-rate tick clock
//!
//! Deadlines advance by one period per tick. When the loop falls behind,
//! the missed deadlines are skipped rather than replayed, so ticks never
//! arrive faster than the frame rate.

use std::time::{Duration, Instant};

/// Result of scheduling one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time to sleep before running the tick
    pub sleep: Duration,
    /// Deadlines dropped because they had already passed
    pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    next_deadline: Instant,
}

impl FrameClock {
    /// Clock whose first tick is due at `start`
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period: period.max(Duration::from_micros(1)),
            next_deadline: start,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Schedule the next tick relative to `now`
    pub fn schedule(&mut self, now: Instant) -> Schedule {
        if now < self.next_deadline {
            let sleep = self.next_deadline - now;
            self.next_deadline += self.period;
            return Schedule { sleep, skipped: 0 };
        }

        let late = now - self.next_deadline;
        let skipped = (late.as_nanos() / self.period.as_nanos()) as u64;
        let factor = u32::try_from(skipped).unwrap_or(u32::MAX);
        let deadline = self
            .next_deadline
            .checked_add(self.period.saturating_mul(factor))
            .unwrap_or(now);
        self.next_deadline = deadline + self.period;
        Schedule {
            sleep: Duration::ZERO,
            skipped,
        }
    }

    /// Block until the next tick is due
    ///
    /// Returns the number of skipped deadlines.
    pub fn wait(&mut self) -> u64 {
        let schedule = self.schedule(Instant::now());
        if !schedule.sleep.is_zero() {
            std::thread::sleep(schedule.sleep);
        }
        schedule.skipped
    }
}
