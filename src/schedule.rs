//! Fixed-period tick scheduling.
//!
//! The target instant is advanced by exactly one period per tick, so sleeps
//! never accumulate drift from the time spent processing a tick.

use chrono::{Local, NaiveDateTime};
use std::time::{Duration, Instant};

/// Source of wall-clock time for bucket labels.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

/// The device's local wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Clone, Debug)]
pub struct TickScheduler {
    period: Duration,
    next_tick: Instant,
}

impl TickScheduler {
    /// A scheduler whose first tick is due immediately.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    pub fn starting_at(period: Duration, first_tick: Instant) -> Self {
        Self {
            period,
            next_tick: first_tick,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Instant the next tick is due at.
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Moves the target to the following tick and returns how long to sleep
    /// from `now` until it is due.
    ///
    /// An overrun returns zero so the tick fires immediately. Falling a whole
    /// period or more behind drops the missed ticks instead of firing them
    /// back to back.
    pub fn advance(&mut self, now: Instant) -> Duration {
        self.next_tick += self.period;
        if self.next_tick > now {
            return self.next_tick - now;
        }
        let behind = now - self.next_tick;
        if behind >= self.period {
            log::warn!(
                "scheduler: {}ms behind, skipping missed ticks",
                behind.as_millis()
            );
            self.next_tick = now;
        }
        Duration::ZERO
    }

    /// Sleeps until the next tick is due.
    pub fn wait(&mut self) {
        let remaining = self.advance(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}
