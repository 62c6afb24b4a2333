//! Small synchronization primitives shared by the server and its sessions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every structure guarded this way stays consistent across a panic (pushes
/// and drains are single operations), so poisoning carries no information.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot latch that async code can wait on.
///
/// Starts unset. [`Signal::trigger`] sets it permanently and wakes every
/// waiter, including waiters that subscribe afterwards. Clones share state.
#[derive(Debug, Clone)]
pub(crate) struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create an unset signal.
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the signal. Returns `true` only for the call that set it.
    pub(crate) fn trigger(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    /// Whether the signal has been set.
    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is set. Returns immediately if it already is.
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|set| *set).await;
    }
}
