//! A single cancellable periodic task.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Runs one async job on a fixed period. Restarting replaces the running
/// loop; at most one loop exists at any time.
#[derive(Default)]
pub struct PeriodicTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Stop any running loop and start a new one. The first tick fires one
    /// full `period` from now.
    pub fn restart<F, Fut>(&self, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.abort();
        }
        let name = self.name;
        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task (re)started");
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        }));
    }

    /// Stop the loop, if one is running.
    pub fn stop(&self) {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
            debug!(task = self.name, "Periodic task stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_immediate_tick() {
        let task = PeriodicTask::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        task.restart(Duration::from_secs(10), counting_job(&count));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_loop() {
        let task = PeriodicTask::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        task.restart(Duration::from_secs(10), counting_job(&count));
        task.restart(Duration::from_secs(30), counting_job(&count));
        settle().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop() {
        let task = PeriodicTask::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        task.restart(Duration::from_secs(1), counting_job(&count));
        assert!(task.is_running());
        task.stop();
        assert!(!task.is_running());
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
