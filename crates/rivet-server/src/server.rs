//! Server lifecycle.
//!
//! A [`Server`] owns one listening socket, one executor, a worker pool and the
//! registry of accepted sessions. Its life is one-shot:
//!
//! ```text
//! Constructed ──run / async_run──► Running ──stop / drop──► Stopped
//!      │                                                       ▲
//!      └───────────────────────stop / drop─────────────────────┘
//! ```
//!
//! Construction binds the socket and queues the accept loop on the executor;
//! nothing is accepted until a thread drives the executor through
//! [`Server::run`] or [`Server::async_run`]. Stopping ends the accept loop,
//! releases the listening socket and joins the worker threads. A stopped server
//! never accepts again; calling `run` or `async_run` on it returns as soon as
//! the accept loop has wound down.
//!
//! Every thread that drives the executor also runs handlers: it drives until a
//! call is queued, steps out to run it, and goes back. Calls on different
//! sessions therefore run in parallel across the worker threads.
//!
//! Stop and drop work from any thread, including from inside another async
//! runtime.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use rivet_proto::Value;
use tokio::{
    net::{TcpListener, TcpSocket},
    runtime::Handle,
};

use crate::{
    accept::accept_loop,
    config::ServerConfig,
    dispatch_queue::DispatchQueue,
    dispatcher::{CallContext, Dispatcher, HandlerError},
    error::ServerError,
    executor::Executor,
    registry::SessionRegistry,
    session::{Session, SessionId},
    sync::Signal,
    worker_pool::WorkerPool,
};

/// Worker thread name prefix.
const WORKER_PREFIX: &str = "rivet-worker";

/// Lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound, accept loop queued, nothing driving the executor yet
    Constructed,
    /// `run` or `async_run` has been called
    Running,
    /// Stop requested; terminal
    Stopped,
}

/// State shared between the server, its accept loop and its sessions.
pub(crate) struct ServerShared {
    pub(crate) dispatcher: Arc<Dispatcher>,
    /// Handler calls waiting for a driving thread
    pub(crate) jobs: DispatchQueue,
    pub(crate) sessions: SessionRegistry,
    pub(crate) suppress_exceptions: AtomicBool,
    pub(crate) shutdown: Signal,
    /// Fired by the accept loop after it has dropped the listener
    pub(crate) listener_closed: Signal,
    pub(crate) accepted: AtomicU64,
    pub(crate) accept_errors: AtomicU64,
    next_session_id: AtomicU64,
}

impl ServerShared {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, suppress_exceptions: bool) -> Self {
        Self {
            dispatcher,
            jobs: DispatchQueue::new(),
            sessions: SessionRegistry::new(),
            suppress_exceptions: AtomicBool::new(suppress_exceptions),
            shutdown: Signal::new(),
            listener_closed: Signal::new(),
            accepted: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn request_stop(&self) -> bool {
        let first = self.shutdown.trigger();
        if first {
            tracing::info!("Server stop requested");
        }
        first
    }

    fn close_sessions(&self) {
        let closed = self.sessions.close_all();
        tracing::info!("Closed {} sessions", closed);
    }

    /// Resolves once shutdown was requested and the listener is gone.
    async fn quiesced(&self) {
        self.shutdown.wait().await;
        self.listener_closed.wait().await;
    }
}

/// Non-owning reference to a server.
///
/// Sessions and handlers use this to reach the server without keeping it
/// alive. Every operation is a no-op once the server has been dropped.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Weak<ServerShared>,
}

impl ServerHandle {
    pub(crate) fn new(shared: Weak<ServerShared>) -> Self {
        Self { shared }
    }

    /// Handle that refers to no server.
    pub(crate) fn detached() -> Self {
        Self::new(Weak::new())
    }

    /// Ask the server to stop.
    ///
    /// Safe to call from a handler: it does not join workers. The server
    /// owner still calls [`Server::join`] or [`Server::stop`] for that.
    /// Returns `false` if the server no longer exists.
    pub fn request_stop(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.request_stop();
        true
    }

    /// Close every session on the server. Returns `false` if the server no
    /// longer exists.
    pub fn close_sessions(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.close_sessions();
        true
    }
}

/// RPC server bound to one endpoint.
pub struct Server {
    shared: Arc<ServerShared>,
    executor: Executor,
    workers: WorkerPool,
    local_addr: SocketAddr,
    running: AtomicBool,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Bind the IPv4 wildcard address on `port`.
    pub fn new(port: u16) -> Result<Self, ServerError> {
        Self::with_config(&ServerConfig::with_port(port))
    }

    /// Bind `address` (a literal IP address) on `port`.
    pub fn with_address(address: &str, port: u16) -> Result<Self, ServerError> {
        Self::with_config(&ServerConfig::with_address(address, port))
    }

    /// Bind the endpoint described by `config` and queue the accept loop.
    ///
    /// # Errors
    ///
    /// - `ServerError::InvalidAddress` if the address is not a literal IP
    /// - `ServerError::Bind` if the socket cannot be bound (for example the
    ///   port is in use)
    /// - `ServerError::Runtime` if the executor cannot be created
    pub fn with_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let endpoint = config.endpoint()?;
        let executor = Executor::new().map_err(ServerError::Runtime)?;
        let listener = bind_listener(&executor, endpoint, config.backlog)?;
        let local_addr = listener.local_addr()?;

        let shared =
            Arc::new(ServerShared::new(Arc::new(Dispatcher::new()), config.suppress_exceptions));
        executor.spawn(accept_loop(listener, Arc::clone(&shared), executor.handle()));

        tracing::info!("Server bound to {}", local_addr);

        Ok(Self {
            shared,
            executor,
            workers: WorkerPool::new(WORKER_PREFIX),
            local_addr,
            running: AtomicBool::new(false),
        })
    }

    /// Address the listening socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Method table shared by every session of this server.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Bind a method on the server's dispatcher.
    ///
    /// Sessions that are already serving see the new method too.
    pub fn bind<F>(&self, name: impl Into<String>, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&CallContext, &[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Ok(self.shared.dispatcher.bind(name, handler)?)
    }

    /// Set the exception-suppression policy for sessions accepted from now on.
    ///
    /// Existing sessions keep the policy they were accepted with.
    pub fn suppress_exceptions(&self, suppress: bool) {
        self.shared.suppress_exceptions.store(suppress, Ordering::Release);
    }

    /// Policy that the next accepted session will get.
    pub fn suppresses_exceptions(&self) -> bool {
        self.shared.suppress_exceptions.load(Ordering::Acquire)
    }

    /// Drive the executor on the calling thread until the server stops.
    ///
    /// Stopping has to come from another thread or from a handler (see
    /// [`CallContext::stop_server`]).
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn run(&self) {
        self.mark_running();
        drive_until_quiesced(&self.executor, &self.shared);
        tracing::debug!("Synchronous run returned");
    }

    /// Spawn `worker_count` threads that drive the executor, and return.
    ///
    /// # Errors
    ///
    /// `ServerError::Spawn` if a thread cannot be created. Threads spawned
    /// before the failure keep running and are joined by [`Server::stop`].
    pub fn async_run(&self, worker_count: usize) -> Result<(), ServerError> {
        self.mark_running();

        let executor = self.executor.clone();
        let shared = Arc::clone(&self.shared);
        self.workers
            .spawn(worker_count, move || drive_until_quiesced(&executor, &shared))
            .map_err(ServerError::Spawn)?;

        tracing::info!("Started {} worker threads", worker_count);
        Ok(())
    }

    /// Stop the server and join its worker threads.
    ///
    /// Idempotent. The calling thread is never joined, so a worker may call
    /// this. Before returning, stop drives the executor until the accept loop
    /// has released the listening socket.
    pub fn stop(&self) {
        self.shared.request_stop();

        let joined = self.workers.join_all();
        tracing::debug!("Joined {} worker threads", joined);

        self.release_listener();
    }

    /// Block until every worker thread has exited.
    ///
    /// Workers exit once the server is stopped, typically by a handler calling
    /// [`CallContext::stop_server`].
    pub fn join(&self) {
        let joined = self.workers.join_all();
        tracing::debug!("Joined {} worker threads", joined);
    }

    /// Close every registered session and clear the registry.
    ///
    /// The server keeps accepting.
    pub fn close_sessions(&self) {
        self.shared.close_sessions();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        if self.shared.shutdown.is_triggered() {
            ServerState::Stopped
        } else if self.running.load(Ordering::Acquire) {
            ServerState::Running
        } else {
            ServerState::Constructed
        }
    }

    /// Non-owning handle to this server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(Arc::downgrade(&self.shared))
    }

    /// Number of registered sessions, including sessions that closed
    /// themselves since the last bulk close.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Number of registered sessions that are still open.
    pub fn open_session_count(&self) -> usize {
        self.shared.sessions.open_count()
    }

    /// Registered sessions in accept order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.shared.sessions.snapshot()
    }

    /// Connections accepted since construction.
    pub fn accepted_connections(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Failed accept attempts since construction.
    pub fn accept_errors(&self) -> u64 {
        self.shared.accept_errors.load(Ordering::Relaxed)
    }

    /// Worker threads currently held by the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Drive the executor until the accept loop has dropped the listener.
    fn release_listener(&self) {
        if Handle::try_current().is_err() {
            self.executor.drive(self.shared.quiesced());
            return;
        }

        // Blocking on a runtime is not allowed inside another one
        thread::scope(|scope| {
            scope.spawn(|| self.executor.drive(self.shared.quiesced()));
        });
    }

    fn mark_running(&self) {
        if self.shared.shutdown.is_triggered() {
            tracing::warn!("Server on {} is stopped and will not restart", self.local_addr);
        } else if !self.running.swap(true, Ordering::AcqRel) {
            tracing::info!("Server running on {}", self.local_addr);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of every thread that drives the executor.
///
/// Drives until a handler call is queued, runs it with the scheduler released
/// so that other drivers keep serving, and repeats until the server quiesces.
/// Calls still queued when the server quiesces never run.
fn drive_until_quiesced(executor: &Executor, shared: &ServerShared) {
    loop {
        let next = executor.drive(async {
            tokio::select! {
                biased;
                () = shared.quiesced() => None,
                job = shared.jobs.next() => job,
            }
        });
        let Some(job) = next else { break };

        // Handlers may spawn onto the executor
        executor.enter(|| job.run());
    }
}

/// Create the listening socket with address reuse enabled.
///
/// Runs inside the executor context so the listener registers with the
/// executor's reactor.
fn bind_listener(
    executor: &Executor,
    endpoint: SocketAddr,
    backlog: u32,
) -> Result<TcpListener, ServerError> {
    executor
        .enter(|| {
            let socket =
                if endpoint.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() }?;
            socket.set_reuseaddr(true)?;
            socket.bind(endpoint)?;
            socket.listen(backlog)
        })
        .map_err(|source| ServerError::Bind { addr: endpoint, source })
}
