//! Named worker threads with join-all semantics.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use crate::sync::lock;

/// A growable set of named threads.
///
/// Threads are named `<prefix>-<n>` with `n` counting up across every spawn
/// on this pool. The pool holds nothing but the handles.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    prefix: String,
    spawned: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create an empty pool.
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), spawned: AtomicUsize::new(0), handles: Mutex::new(Vec::new()) }
    }

    /// Spawn `count` threads, each running `work` once.
    ///
    /// Stops at the first spawn failure; threads spawned before it stay in
    /// the pool.
    pub(crate) fn spawn<F>(&self, count: usize, work: F) -> io::Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut handles = lock(&self.handles);

        for _ in 0..count {
            let index = self.spawned.fetch_add(1, Ordering::Relaxed);
            let work = Arc::clone(&work);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", self.prefix))
                .spawn(move || work())?;
            handles.push(handle);
        }

        Ok(())
    }

    /// Join every thread in the pool and empty it. Returns how many were
    /// joined.
    ///
    /// The calling thread is never joined: if it belongs to the pool it is
    /// detached instead, since joining it would deadlock.
    pub(crate) fn join_all(&self) -> usize {
        let handles = std::mem::take(&mut *lock(&self.handles));
        let current = thread::current().id();
        let mut joined = 0;

        for handle in handles {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();

            if handle.thread().id() == current {
                tracing::warn!(worker = %name, "not joining the calling worker thread");
                continue;
            }

            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker thread panicked");
            }
            joined += 1;
        }

        joined
    }

    /// Number of threads currently held.
    pub(crate) fn len(&self) -> usize {
        lock(&self.handles).len()
    }
}
