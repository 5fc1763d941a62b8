//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation.
    callbacks: Mutex<Vec<CancelCallback>>,
    /// Wakes tasks waiting in [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reason = reason.into();
        *self.reason.write() = Some(reason.clone());

        let callbacks: Vec<_> = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            invoke(callback, &reason);
        }

        self.notify.notify_waiters();
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            let reason = self.reason().unwrap_or_default();
            invoke(Box::new(callback), &reason);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn invoke(callback: CancelCallback, reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(reason);
    })) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_runs_once() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        token.on_cancel(move |reason| {
            assert_eq!(reason, "test");
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel("test");
        token.cancel("again");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel("test");

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        token.on_cancel(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();
        token.on_cancel(|_| panic!("Intentional panic"));
        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("stop");

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
