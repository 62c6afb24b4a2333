//! Accept loop.
//!
//! One task per server owns the listening socket and accepts connections until
//! the server shuts down. Each accepted connection becomes a [`Session`] bound
//! to the server's dispatcher and to the suppress-exceptions policy in force
//! at that moment; the session is started and then registered.
//!
//! Accept failures (descriptor exhaustion, aborted handshakes) are counted and
//! logged, and the loop keeps going. Only shutdown ends it. On the way out the
//! listening socket is dropped before `listener_closed` fires, so once a
//! driver sees the server quiesced the kernel no longer accepts connections
//! for it.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{Arc, atomic::Ordering},
};

use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Handle,
};

use crate::{
    server::{ServerHandle, ServerShared},
    session::Session,
};

/// Source of accepted connections.
pub(crate) trait Acceptor: Send + 'static {
    /// Wait for the next connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept connections until `shared.shutdown` fires.
pub(crate) async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    shared: Arc<ServerShared>,
    executor: Handle,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = shared.shutdown.wait() => break,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((connection, peer)) => admit(&shared, &executor, connection, peer),
            Err(e) => {
                shared.accept_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Accept error: {}", e);
                // Let sessions run before trying again
                tokio::task::yield_now().await;
            },
        }
    }

    drop(acceptor);
    tracing::debug!("Accept loop stopped");
    shared.listener_closed.trigger();
}

fn admit(shared: &Arc<ServerShared>, executor: &Handle, connection: TcpStream, peer: SocketAddr) {
    let id = shared.next_session_id();
    shared.accepted.fetch_add(1, Ordering::Relaxed);
    tracing::info!("Accepted connection {} from {}", id, peer);

    let session = Arc::new(Session::new(
        ServerHandle::new(Arc::downgrade(shared)),
        executor.clone(),
        connection,
        Arc::clone(&shared.dispatcher),
        shared.jobs.sender(),
        shared.suppress_exceptions.load(Ordering::Acquire),
        id,
    ));
    session.start();
    shared.sessions.register(session);
}
