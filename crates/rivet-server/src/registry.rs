//! Registry of sessions accepted by a server.
//!
//! The registry keeps every accepted session, in accept order, until the next
//! bulk close. Sessions that close themselves stay registered (and count
//! towards [`SessionRegistry::len`]) until then; use
//! [`SessionRegistry::open_count`] for sessions that are still serving.
//!
//! Accept handlers append from whichever thread is driving the executor while
//! bulk close may run on any other thread, so the sequence sits behind a mutex.
//! Bulk close drains under the lock and closes the drained sessions after
//! releasing it, so a session's close never runs with the registry locked.

use std::sync::{Arc, Mutex};

use crate::{session::Session, sync::lock};

/// What the registry needs from a session.
pub(crate) trait ManagedSession: Send + Sync {
    /// Ask the session to close. Must be idempotent and must not block.
    fn close(&self);

    /// Whether the session has closed.
    fn is_closed(&self) -> bool;
}

/// Ordered, synchronized collection of sessions.
#[derive(Debug)]
pub(crate) struct SessionRegistry<S = Session> {
    sessions: Mutex<Vec<Arc<S>>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self { sessions: Mutex::new(Vec::new()) }
    }
}

impl<S: ManagedSession> SessionRegistry<S> {
    /// Create an empty registry.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a session.
    pub(crate) fn register(&self, session: Arc<S>) {
        let mut sessions = lock(&self.sessions);
        debug_assert!(
            !sessions.iter().any(|s| Arc::ptr_eq(s, &session)),
            "invariant: a session is registered at most once"
        );
        sessions.push(session);
    }

    /// Close every registered session and forget all of them.
    ///
    /// Returns how many sessions were drained. Sessions registered while this
    /// runs are either drained or left registered; none is lost.
    pub(crate) fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *lock(&self.sessions));
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    /// Number of registered sessions, closed or not.
    pub(crate) fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Number of registered sessions that have not closed.
    pub(crate) fn open_count(&self) -> usize {
        lock(&self.sessions).iter().filter(|s| !s.is_closed()).count()
    }

    /// Registered sessions, in accept order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<S>> {
        lock(&self.sessions).clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
    };

    use super::*;

    #[derive(Default)]
    struct FakeSession {
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    impl ManagedSession for FakeSession {
        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn register_preserves_accept_order() {
        let registry = SessionRegistry::new();
        let first = Arc::new(FakeSession::default());
        let second = Arc::new(FakeSession::default());

        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(Arc::ptr_eq(&snapshot[0], &first));
        assert!(Arc::ptr_eq(&snapshot[1], &second));
    }

    #[test]
    fn close_all_closes_and_clears() {
        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..3).map(|_| Arc::new(FakeSession::default())).collect();
        for session in &sessions {
            registry.register(Arc::clone(session));
        }

        assert_eq!(registry.close_all(), 3);
        assert_eq!(registry.len(), 0);
        for session in &sessions {
            assert!(session.is_closed());
            assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
        }

        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn self_closed_sessions_stay_registered() {
        let registry = SessionRegistry::new();
        let session = Arc::new(FakeSession::default());
        registry.register(Arc::clone(&session));
        registry.register(Arc::new(FakeSession::default()));

        session.close();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.open_count(), 1);
    }

    #[test]
    fn concurrent_register_and_close_loses_nothing() {
        let registry = Arc::new(SessionRegistry::new());
        let threads = 4;
        let per_thread = 250;

        let writers: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        registry.register(Arc::new(FakeSession::default()));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for _ in 0..50 {
            drained += registry.close_all();
            thread::yield_now();
        }

        for writer in writers {
            writer.join().unwrap();
        }
        drained += registry.close_all();

        assert_eq!(drained, threads * per_thread);
        assert_eq!(registry.len(), 0);
    }
}
