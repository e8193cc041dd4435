use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Entries kept before expired ids are swept.
const SWEEP_THRESHOLD: usize = 1024;

/// Short-lived seen-set of message ids. A zero window disables it and every
/// id is treated as new.
pub struct DedupGuard {
    window: Duration,
    seen: DashMap<String, Instant>,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Record `message_id`; `false` when it was already seen inside the window.
    /// Ids that are empty are never de-duplicated.
    pub fn check_and_insert(&self, message_id: &str) -> bool {
        if !self.is_enabled() || message_id.is_empty() {
            return true;
        }
        let now = Instant::now();
        if self.seen.len() >= SWEEP_THRESHOLD {
            self.seen
                .retain(|_, first| now.duration_since(*first) < self.window);
        }
        match self.seen.entry(message_id.to_string()) {
            Entry::Occupied(mut seen) => {
                if now.duration_since(*seen.get()) < self.window {
                    false
                } else {
                    seen.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
