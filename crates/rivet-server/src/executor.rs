//! Shared asynchronous executor.
//!
//! The executor is a tokio current-thread runtime. Work spawned on it is only
//! queued; it runs when some thread drives the executor with
//! [`Executor::drive`]. Any number of threads may drive it at once. The
//! runtime hands its scheduler to one driver at a time and the others wait
//! for either their own future to finish or the scheduler to become free.
//!
//! This gives the server the run model it needs: construction can queue the
//! first accept without anything running yet, the synchronous run mode is
//! "drive on the caller's thread", and the threaded mode is "drive on N worker
//! threads". Handlers never run while a thread holds the scheduler: drivers
//! step out of [`Executor::drive`] to run them (see `dispatch_queue`).
//!
//! The runtime is shut down in the background when the last clone goes away,
//! so a server may be dropped from inside another runtime.

use std::{future::Future, io, sync::Arc};

use tokio::runtime::{Builder, Handle, Runtime};

/// Cheaply cloneable reference to the shared runtime.
#[derive(Debug, Clone)]
pub(crate) struct Executor {
    runtime: Arc<OwnedRuntime>,
    handle: Handle,
}

/// Sole owner of the runtime. Always `Some` until dropped.
#[derive(Debug)]
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // A blocking runtime drop panics inside async code
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl Executor {
    /// Build a new, idle executor.
    pub(crate) fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        Ok(Self { runtime: Arc::new(OwnedRuntime(Some(runtime))), handle })
    }

    /// Handle for spawning work from inside executor tasks.
    pub(crate) fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Run `f` with this executor as the ambient runtime, so that I/O objects
    /// created inside it register with this executor's reactor.
    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.handle.enter();
        f()
    }

    /// Queue `future` on the executor. It does not run until a thread drives
    /// the executor.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(future));
    }

    /// Drive the executor on the calling thread until `until` completes.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async context (for example from an
    /// executor task).
    pub(crate) fn drive<F: Future>(&self, until: F) -> F::Output {
        match &self.runtime.0 {
            Some(runtime) => runtime.block_on(until),
            None => self.handle.block_on(until),
        }
    }
}
