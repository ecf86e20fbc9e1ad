//! Single wakeup slot and cached clock for the host loop.
//!
//! The registry owns exactly one [`TimerTask`]; re-arming replaces the old
//! deadline, so two wakeups can never be pending at once.

use std::time::{Duration, Instant};

/// Conservative wakeup used when the multiplexer offers no timeout hint.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Current time as seen by the host loop. Updated once per loop tick so every
/// step in the same tick computes deadlines from the same instant.
#[derive(Debug, Clone, Copy)]
pub struct CachedClock {
    now: Instant,
}

impl CachedClock {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Refresh from the system clock.
    pub fn tick(&mut self) -> Instant {
        self.set(Instant::now())
    }

    /// Advance to `now`. Never moves backwards.
    pub fn set(&mut self, now: Instant) -> Instant {
        if now > self.now {
            self.now = now;
        }
        self.now
    }
}

impl Default for CachedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerTask {
    deadline: Option<Instant>,
}

impl TimerTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel-then-arm.
    pub fn arm(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_queued(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Time left until the deadline from `now`, zero if already due.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Disarm if due; returns whether it fired.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}
