//! Sliding-window admission control.
//!
//! A true sliding window over acceptance timestamps, not a fixed
//! bucket: a burst exactly straddling a minute boundary cannot double
//! the effective rate.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// Length of the trailing window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Process-wide message rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            window: WINDOW,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to admit one message now.
    ///
    /// Prune, check, and append happen under one lock so two concurrent
    /// messages cannot both observe "under capacity" and both slip past
    /// the limit. A rejection does not mutate the window.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut timestamps = self.timestamps.lock();

        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.capacity {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}
