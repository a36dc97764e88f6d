//! Duplicate suppression over a short trailing window.
//!
//! This is a coalescing filter, not an exactly-once guarantee: two
//! physically distinct messages whose truncated subject and body match
//! within the window count as one.

use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::Mutex;

/// How long a fingerprint suppresses repeats.
pub const SUPPRESSION_WINDOW: Duration = Duration::from_secs(5);

/// Shared seen-map keyed by content fingerprint.
///
/// The map is touched by every concurrent pipeline invocation; the
/// check-and-update is one critical section so two racing messages with
/// the same fingerprint cannot both pass as fresh.
#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    seen: Mutex<AHashMap<String, Instant>>,
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(SUPPRESSION_WINDOW)
    }
}

impl DedupFilter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(AHashMap::new()),
        }
    }

    /// Report whether this fingerprint was seen within the window.
    ///
    /// A duplicate does NOT refresh the timestamp: a steady stream of
    /// identical messages is coalesced to one per window, not
    /// suppressed forever.
    pub fn is_duplicate(&self, fingerprint: &str) -> bool {
        self.is_duplicate_at(fingerprint, Instant::now())
    }

    fn is_duplicate_at(&self, fingerprint: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock();

        if let Some(last) = seen.get(fingerprint)
            && now.duration_since(*last) < self.window
        {
            return true;
        }

        seen.insert(fingerprint.to_string(), now);
        false
    }

    /// Drop entries older than the window. Run periodically so the map
    /// stays bounded by recent traffic instead of growing with every
    /// distinct fingerprint ever seen. Returns the number of entries
    /// removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, last| now.duration_since(*last) < self.window);
        before - seen.len()
    }

    /// Number of live fingerprints
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
