use std::sync::Mutex;

use futures_util::future::BoxFuture;

/// Where detached handler runs go. The webhook only schedules; it never
/// awaits the work it hands over.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Production executor: one tokio task per handler run.
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Collects scheduled tasks until [`QueuedSpawner::run_all`] drives them,
/// one after another, on the caller's task. Lets tests observe the HTTP
/// response before any handler work has happened.
#[derive(Default)]
pub struct QueuedSpawner {
    queue: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl QueuedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run queued tasks in scheduling order, including any they schedule
    /// themselves. Returns how many ran.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BoxFuture<'static, ()>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskSpawner for QueuedSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.lock().push(task);
    }
}
