//! External control surface for a queue run: pause, resume, stop, and
//! per-task cancellation.
//!
//! Pausing stops the engine from claiming new pending tasks but lets
//! in-flight transfers finish. Stopping ends the run at the next
//! unit-of-work boundary. Cancelling a task aborts its in-flight transfer
//! between chunks; the partial file is discarded, never committed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::{Notify, watch};
use tracing::debug;

/// Shared control handle for one or more engine runs.
///
/// Clone the `Arc` and hand it to whoever needs to pause or cancel; the
/// engine polls it between units of work and wires the per-task cancel
/// signals into each transfer.
#[derive(Debug, Default)]
pub struct QueueControl {
    paused: AtomicBool,
    stopped: AtomicBool,
    wake: Notify,
    inflight: DashMap<i64, watch::Sender<bool>>,
}

impl QueueControl {
    /// Creates a control handle in the running state.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stops claiming new tasks; in-flight transfers finish normally.
    pub fn pause(&self) {
        debug!("queue paused");
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes claiming tasks after a pause.
    pub fn resume(&self) {
        debug!("queue resumed");
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Ends the run at the next unit-of-work boundary. In-flight transfers
    /// finish; nothing new is claimed.
    pub fn stop(&self) {
        debug!("queue stop requested");
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Returns whether the queue is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Returns whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Blocks while paused; returns immediately once running or stopped.
    pub async fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_stopped() {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register interest before the re-check so a resume/stop
            // landing in between cannot be missed.
            notified.as_mut().enable();
            if !self.is_paused() || self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Aborts the in-flight transfer for a task, if there is one.
    ///
    /// Returns true when a transfer was signalled.
    pub fn cancel(&self, task_id: i64) -> bool {
        if let Some(entry) = self.inflight.get(&task_id) {
            debug!(task_id, "cancelling in-flight transfer");
            let _ = entry.send(true);
            true
        } else {
            false
        }
    }

    /// Aborts every in-flight transfer and stops the run.
    pub fn cancel_all(&self) {
        self.stop();
        for entry in self.inflight.iter() {
            let _ = entry.value().send(true);
        }
    }

    /// Registers a task as in-flight, returning its cancel signal.
    pub(crate) fn register_inflight(&self, task_id: i64) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.inflight.insert(task_id, tx);
        rx
    }

    /// Removes a finished task from the in-flight set.
    pub(crate) fn clear_inflight(&self, task_id: i64) {
        self.inflight.remove(&task_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wait_while_paused_returns_immediately_when_running() {
        let control = QueueControl::new();
        tokio::time::timeout(Duration::from_millis(50), control.wait_while_paused())
            .await
            .expect("must not block while running");
    }

    #[tokio::test]
    async fn test_resume_wakes_paused_waiter() {
        let control = QueueControl::new();
        control.pause();

        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.wait_while_paused().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("resume must wake the waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_wakes_paused_waiter() {
        let control = QueueControl::new();
        control.pause();

        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.wait_while_paused().await })
        };

        control.stop();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("stop must wake the waiter")
            .unwrap();
        assert!(control.is_stopped());
    }

    #[tokio::test]
    async fn test_cancel_signals_registered_task_only() {
        let control = QueueControl::new();
        let mut rx = control.register_inflight(7);

        assert!(!control.cancel(8), "unknown task has nothing to cancel");
        assert!(control.cancel(7));

        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        control.clear_inflight(7);
        assert!(!control.cancel(7));
    }
}
