//! Per-process relay counters.
//!
//! One structured log line is emitted per message outcome; these
//! counters exist so an operator can read cumulative totals without
//! re-aggregating logs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    received: AtomicU64,
    pushed_ok: AtomicU64,
    pushed_failed: AtomicU64,
    dedup_dropped: AtomicU64,
    rate_limited: AtomicU64,
}

impl Metrics {
    pub fn incr_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pushed_ok(&self) {
        self.pushed_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pushed_failed(&self) {
        self.pushed_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dedup_dropped(&self) {
        self.dedup_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            pushed_ok: self.pushed_ok.load(Ordering::Relaxed),
            pushed_failed: self.pushed_failed.load(Ordering::Relaxed),
            dedup_dropped: self.dedup_dropped.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub pushed_ok: u64,
    pub pushed_failed: u64,
    pub dedup_dropped: u64,
    pub rate_limited: u64,
}
