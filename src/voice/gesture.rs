//! User-gesture unlock signal

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Records that the user has interacted at least once
///
/// Playback consults it before taking the direct-output fallback, and the
/// orchestrator waits on it before resuming recognition after a permission
/// error. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct GestureSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    unlocked: AtomicBool,
    notify: Notify,
}

impl GestureSignal {
    /// Create a locked signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that is already unlocked
    #[must_use]
    pub fn unlocked() -> Self {
        let signal = Self::new();
        signal.inner.unlocked.store(true, Ordering::SeqCst);
        signal
    }

    /// Record a user gesture
    pub fn gesture(&self) {
        if !self.inner.unlocked.swap(true, Ordering::SeqCst) {
            tracing::debug!("audio output unlocked by user gesture");
        }
        self.inner.notify.notify_waiters();
    }

    /// Check if any gesture has happened
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.inner.unlocked.load(Ordering::SeqCst)
    }

    /// Wait for the next gesture
    ///
    /// The waiter is registered when this is called, not when it is first
    /// polled, so a gesture in between is not missed.
    #[must_use]
    pub fn next_gesture(&self) -> Pin<Box<Notified<'_>>> {
        let mut notified = Box::pin(self.inner.notify.notified());
        notified.as_mut().enable();
        notified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gesture_unlocks_and_wakes_waiters() {
        let signal = GestureSignal::new();
        assert!(!signal.is_unlocked());

        let mut waiter = tokio_test::task::spawn(signal.next_gesture());
        tokio_test::assert_pending!(waiter.poll());

        signal.gesture();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
        assert!(signal.is_unlocked());
    }

    #[test]
    fn test_gesture_before_first_poll_is_kept() {
        let signal = GestureSignal::new();
        let waiter = signal.next_gesture();

        signal.gesture();

        let mut waiter = tokio_test::task::spawn(waiter);
        tokio_test::assert_ready!(waiter.poll());
    }

    #[test]
    fn test_pre_unlocked() {
        assert!(GestureSignal::unlocked().is_unlocked());
    }
}
