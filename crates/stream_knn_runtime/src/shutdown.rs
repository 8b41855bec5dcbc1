//! Shutdown coordination for graceful pipeline shutdown.
//!
//! Shutdown happens in two phases: once initiated, the pipeline stops reading
//! input and resolves the open slide; once complete, every dispatched batch has
//! been answered and the sink flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across stages.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Flag indicating shutdown has been initiated - no new input is read
    shutdown_initiated: Arc<AtomicBool>,
    /// Flag indicating all in-flight batches have been processed
    shutdown_complete: Arc<AtomicBool>,
    initiated_notify: Arc<Notify>,
}

impl ShutdownState {
    /// Creates a new shutdown state with both flags set to false.
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            initiated_notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if shutdown has been initiated - no new input is read.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Returns true if every in-flight batch has been processed.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes every task waiting for it.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new points will be read");
        }
        self.initiated_notify.notify_waiters();
    }

    /// Marks shutdown as complete - all dispatched batches have been answered.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ All batches processed - pipeline drained");
    }

    /// Resolves once [`Self::initiate_shutdown`] has been called.
    pub async fn initiated(&self) {
        loop {
            let notified = self.initiated_notify.notified();
            if self.is_shutdown_initiated() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiters_wake_on_initiation() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.initiated().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        state.initiate_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_already_initiated_resolves_immediately() {
        let state = ShutdownState::new();
        state.initiate_shutdown();
        state.initiate_shutdown();
        tokio::time::timeout(Duration::from_millis(100), state.initiated())
            .await
            .expect("should not wait");

        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }
}
