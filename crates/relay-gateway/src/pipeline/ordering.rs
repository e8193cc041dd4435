use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle locks kept before unused ones are dropped.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-sender async mutexes: handler runs for one sender take turns, runs for
/// different senders stay concurrent.
#[derive(Default)]
pub struct SenderLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SenderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `sender`'s turn. The turn ends when the guard is dropped.
    /// tokio's mutex is fair, so waiters are served in arrival order.
    pub async fn lock(&self, sender: &str) -> OwnedMutexGuard<()> {
        if self.locks.len() >= PRUNE_THRESHOLD {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        let lock = Arc::clone(
            self.locks
                .entry(sender.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
