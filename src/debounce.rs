//! Trailing-edge debounce.
//!
//! Every [`Debouncer::trigger`] cancels the pending timer and schedules the
//! action `delay` after the latest trigger, so a burst collapses into one run.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Debouncer {
    delay: Duration,
    action: Action,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Wrap `action` so it runs once, `delay` after the last of a burst of triggers.
pub fn debounce<F, Fut>(delay: Duration, action: F) -> Debouncer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Debouncer {
        delay,
        action: Arc::new(move || action().boxed()),
        timer: Mutex::new(None),
    }
}

impl Debouncer {
    /// Restart the timer. Needs a tokio runtime.
    pub fn trigger(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; debounced action dropped");
            return;
        };

        let mut timer = crate::lock(&self.timer);
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let delay = self.delay;
        let action = Arc::clone(&self.action);
        *timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("debounce window elapsed");
            // Detached so that a later trigger cannot abort a running action.
            tokio::spawn((*action)());
        }));
    }

    /// Cancel the pending run, if any.
    pub fn cancel(&self) {
        if let Some(timer) = crate::lock(&self.timer).take() {
            timer.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        crate::lock(&self.timer)
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Debouncer) {
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        let debouncer = debounce(Duration::from_millis(1000), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        (runs, debouncer)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_run() {
        let (runs, debouncer) = counter();
        for _ in 0..5 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(debouncer.is_pending());

        // Last trigger at 160ms, due at 1160ms.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_run_separately() {
        let (runs, debouncer) = counter();
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        debouncer.trigger();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_run() {
        let (runs, debouncer) = counter();
        debouncer.trigger();
        debouncer.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!debouncer.is_pending());
    }
}
