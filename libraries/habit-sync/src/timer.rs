//! Cancellable timers for the single-threaded client.
//!
//! Both timers run on the current `LocalSet`. When a timer fires it spawns the work as its own
//! task, so cancelling or re-arming a timer never aborts work that is already running.

use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Runs a task once no new [`Debouncer::schedule`] call has arrived for `delay`.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: RefCell<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: RefCell::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arms the timer, replacing any run that hasn't fired yet.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn schedule<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let delay = self.delay;
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            tokio::task::spawn_local(task());
        });
        if let Some(previous) = self.pending.borrow_mut().replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(pending) = self.pending.borrow_mut().take() {
            pending.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs a task every `period` until cancelled or dropped. The first run happens one period after
/// starting.
#[derive(Debug)]
pub struct Repeating {
    handle: JoinHandle<()>,
}

impl Repeating {
    /// Must be called from within a `LocalSet`.
    pub fn start<F, Fut>(period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tokio::task::spawn_local(task());
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Repeating {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        LocalSet::new()
            .run_until(async {
                let runs = Rc::new(Cell::new(0));
                let debouncer = Debouncer::new(Duration::from_secs(1));

                for _ in 0..5 {
                    let runs = Rc::clone(&runs);
                    debouncer.schedule(move || async move { runs.set(runs.get() + 1) });
                    tokio::time::sleep(Duration::from_millis(400)).await;
                }
                assert_eq!(runs.get(), 0);
                assert!(debouncer.is_pending());

                tokio::time::sleep(Duration::from_millis(700)).await;
                tokio::task::yield_now().await;
                assert_eq!(runs.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_cancel() {
        LocalSet::new()
            .run_until(async {
                let runs = Rc::new(Cell::new(0));
                let debouncer = Debouncer::new(Duration::from_secs(1));
                let counter = Rc::clone(&runs);
                debouncer.schedule(move || async move { counter.set(counter.get() + 1) });
                debouncer.cancel();

                tokio::time::sleep(Duration::from_secs(5)).await;
                assert_eq!(runs.get(), 0);
                assert!(!debouncer.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_runs_every_period_until_cancelled() {
        LocalSet::new()
            .run_until(async {
                let runs = Rc::new(Cell::new(0));
                let counter = Rc::clone(&runs);
                let repeating = Repeating::start(Duration::from_secs(30), move || {
                    let counter = Rc::clone(&counter);
                    async move { counter.set(counter.get() + 1) }
                });

                tokio::time::sleep(Duration::from_secs(29)).await;
                assert_eq!(runs.get(), 0);

                tokio::time::sleep(Duration::from_secs(62)).await;
                tokio::task::yield_now().await;
                assert_eq!(runs.get(), 3);

                repeating.cancel();
                tokio::time::sleep(Duration::from_secs(120)).await;
                assert_eq!(runs.get(), 3);
            })
            .await;
    }
}
