//! In-process periodic job scheduler.
//!
//! Backs the job singleton's opaque handle: registering a job spawns a
//! tokio interval task and yields a ULID identifier; cancelling aborts
//! the task. The contract is at-least-once invocation per interval;
//! overlap safety is the dispatcher's problem, not the scheduler's.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;

/// Registry of running periodic tasks, keyed by opaque job id.
#[derive(Debug, Clone, Default)]
pub struct JobScheduler {
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl JobScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a periodic task firing `tick` every `every`, skipping the
    /// interval's immediate first tick. Returns the job's opaque id.
    pub fn register<F, Fut>(&self, every: Duration, mut tick: F) -> String
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = ulid::Ulid::new().to_string();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.tick().await;
            loop {
                timer.tick().await;
                tick().await;
            }
        });

        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.insert(id.clone(), handle);
        }
        id
    }

    /// Abort a registered job. Returns `false` for an unknown id (e.g. a
    /// handle persisted by a previous process).
    pub fn cancel(&self, id: &str) -> bool {
        let handle = self.jobs.lock().ok().and_then(|mut jobs| jobs.remove(id));
        handle.is_some_and(|handle| {
            handle.abort();
            true
        })
    }

    /// Number of currently registered jobs.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.jobs.lock().map_or(0, |jobs| jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_on_the_interval_and_stops_on_cancel() {
        let scheduler = JobScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let id = scheduler.register(Duration::from_secs(60), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(scheduler.registered(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "first tick is skipped");

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        assert!(scheduler.cancel(&id));
        assert_eq!(scheduler.registered(), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2, "no ticks after cancel");
    }

    #[tokio::test]
    async fn cancelling_an_unknown_id_is_a_no_op() {
        let scheduler = JobScheduler::new();
        assert!(!scheduler.cancel("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
    }
}
