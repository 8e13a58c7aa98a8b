//! Fires a callback if a session stays idle past its timeout; cancellable.
//!
//! Grounded on `backend/service/visual_debug_servcie/debug_core/utils/timeout_manager.go`:
//! a single timer plus capacity-1 reset/cancel pulses, consumed by one
//! background select loop. A dropped pulse (because one is already in
//! flight) is acceptable — the loop only needs to know "something happened
//! since the timer was armed", not how many times.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Watches a single session for inactivity.
pub struct IdleGuard {
    reset_tx: mpsc::Sender<()>,
    cancel_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl IdleGuard {
    /// Starts the watchdog. `on_expire` is invoked exactly once, on the
    /// background task, if the guard is never reset within `timeout` of the
    /// last reset (or of start).
    pub fn start<F, Fut>(timeout: Duration, on_expire: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (reset_tx, mut reset_rx) = mpsc::channel::<()>(1);
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut deadline = Instant::now() + timeout;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::debug!("idle guard expired");
                        let fut: BoxFuture = Box::pin(on_expire());
                        fut.await;
                        return;
                    }
                    _ = reset_rx.recv() => {
                        deadline = Instant::now() + timeout;
                    }
                    _ = cancel_rx.recv() => {
                        tracing::debug!("idle guard cancelled");
                        return;
                    }
                }
            }
        });

        Self {
            reset_tx,
            cancel_tx,
            task,
        }
    }

    /// Pushes the deadline out by `timeout` again. Best-effort: if a reset
    /// is already queued, this one is dropped, which is fine since the
    /// effect (restart the timer from "now") is idempotent.
    pub fn reset(&self) {
        let _ = self.reset_tx.try_send(());
    }

    /// Idempotent: cancelling twice, or cancelling after expiry, is a no-op.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout_when_not_reset() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let guard = IdleGuard::start(Duration::from_millis(50), move || {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(guard);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_expiry() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let guard = IdleGuard::start(Duration::from_millis(50), move || {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::advance(Duration::from_millis(30)).await;
        guard.reset();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "reset should have postponed expiry");
        tokio::time::advance(Duration::from_millis(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let guard = IdleGuard::start(Duration::from_millis(50), move || {
            let fired = fired2.clone();
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        guard.cancel();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
