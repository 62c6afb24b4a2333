//! Per-connection session.
//!
//! A session owns one accepted connection and serves it on the executor:
//! read a frame, dispatch it through the shared [`Dispatcher`], write the
//! reply, repeat. Handlers run on a driving thread outside the executor (see
//! `dispatch_queue`); the session waits for each outcome before reading the
//! next frame, so requests on one connection are answered in order.
//!
//! A close request takes effect between frames. A reply that is being
//! written when the session is closed is written in full first.
//!
//! # Fault policy
//!
//! Each session carries the server's suppress-exceptions flag as it was when
//! the connection was accepted. When a dispatch fails (unknown method, handler
//! error, handler panic):
//!
//! - suppressed: the request is answered with an error response and the
//!   session keeps serving
//! - not suppressed: the fault is escalated and the connection is closed
//!
//! Protocol violations (undecodable frames, a client sending responses) always
//! close the connection.

use std::{
    fmt, io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use bytes::BytesMut;
use rivet_proto::{LENGTH_PREFIX_SIZE, Message, ProtocolError, RequestId, Value};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::Handle,
    sync::oneshot,
};

use crate::{
    dispatch_queue::JobSender,
    dispatcher::{CallContext, DispatchError, Dispatcher},
    registry::ManagedSession,
    server::ServerHandle,
    sync::{Signal, lock},
};

/// Server-unique session number, assigned in accept order starting at 1.
pub type SessionId = u64;

/// Why a session stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// `close()` was called, by the owner or by a handler
    Requested,
    /// Peer closed its end
    PeerClosed,
}

/// Errors that end a session.
#[derive(Error, Debug)]
pub(crate) enum SessionError {
    /// Socket failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent bytes that are not a valid message
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Dispatch failed and the session does not suppress faults
    #[error("unsuppressed handler fault: {0}")]
    Fault(DispatchError),

    /// Peer sent a response; only servers send those
    #[error("unexpected response message (id {0}) from client")]
    UnexpectedResponse(RequestId),

    /// The server stopped before a queued call could run
    #[error("no worker is left to run handlers")]
    WorkersGone,
}

/// One accepted connection and its protocol state.
pub struct Session {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    server: ServerHandle,
    executor: Handle,
    /// Present until `start` hands it to the serving task
    connection: Mutex<Option<TcpStream>>,
    dispatcher: Arc<Dispatcher>,
    jobs: JobSender,
    suppress_exceptions: bool,
    closed: Signal,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("suppress_exceptions", &self.suppress_exceptions)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session for an accepted connection. Nothing is read until
    /// [`Session::start`].
    pub(crate) fn new(
        server: ServerHandle,
        executor: Handle,
        connection: TcpStream,
        dispatcher: Arc<Dispatcher>,
        jobs: JobSender,
        suppress_exceptions: bool,
        id: SessionId,
    ) -> Self {
        Self {
            id,
            peer_addr: connection.peer_addr().ok(),
            server,
            executor,
            connection: Mutex::new(Some(connection)),
            dispatcher,
            jobs,
            suppress_exceptions,
            closed: Signal::new(),
        }
    }

    /// Spawn the serving task on the executor. Later calls do nothing.
    pub(crate) fn start(self: &Arc<Self>) {
        let Some(connection) = lock(&self.connection).take() else {
            tracing::warn!(session = self.id, "session already started or closed");
            return;
        };

        let session = Arc::clone(self);
        drop(self.executor.spawn(async move { session.serve(connection).await }));
    }

    /// Close the session. Idempotent and non-blocking; the serving task shuts
    /// the connection down the next time it runs.
    pub fn close(&self) {
        if self.closed.trigger() {
            tracing::debug!(session = self.id, "session close requested");
        }
        // A session that never started still owns its socket
        drop(lock(&self.connection).take());
    }

    /// Whether the session has closed, by request or on its own.
    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address, if the OS still reported it at accept time.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Exception-suppression policy this session was created with.
    pub fn suppress_exceptions(&self) -> bool {
        self.suppress_exceptions
    }

    async fn serve(self: Arc<Self>, connection: TcpStream) {
        let ctx = CallContext::new(self.id, self.peer_addr, self.closed.clone(), self.server.clone());
        let (mut reader, mut writer) = connection.into_split();

        match self.serve_requests(&ctx, &mut reader, &mut writer).await {
            Ok(reason) => tracing::debug!(session = self.id, ?reason, "session closed"),
            Err(SessionError::Protocol(e)) if !e.is_peer_fault() => {
                tracing::error!(session = self.id, error = %e, "session closed on local protocol error");
            },
            Err(e) => tracing::warn!(session = self.id, error = %e, "session closed on error"),
        }

        if let Err(e) = writer.shutdown().await {
            tracing::trace!(session = self.id, error = %e, "shutdown after close failed");
        }
        self.closed.trigger();
    }

    async fn serve_requests(
        &self,
        ctx: &CallContext,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<CloseReason, SessionError> {
        let mut payload = BytesMut::new();
        let mut out = BytesMut::new();

        loop {
            // Only an idle read races the close signal
            let message = tokio::select! {
                biased;
                () = self.closed.wait() => return Ok(CloseReason::Requested),
                message = read_message(reader, &mut payload) => message?,
            };
            let Some(message) = message else {
                return Ok(CloseReason::PeerClosed);
            };

            if let Some(reply) = self.handle_message(ctx, message).await? {
                out.clear();
                reply.encode(&mut out)?;
                writer.write_all(&out).await?;
            }

            // A handler may have closed its own session
            if self.closed.is_triggered() {
                return Ok(CloseReason::Requested);
            }
        }
    }

    async fn handle_message(
        &self,
        ctx: &CallContext,
        message: Message,
    ) -> Result<Option<Message>, SessionError> {
        match message {
            Message::Request { id, method, params } => {
                tracing::trace!(session = self.id, id, %method, "request");
                match self.dispatch(ctx, method, params).await? {
                    Ok(result) => Ok(Some(Message::success(id, result))),
                    Err(fault) => Ok(Some(Message::failure(id, self.on_fault(fault)?))),
                }
            },
            Message::Notification { method, params } => {
                tracing::trace!(session = self.id, %method, "notification");
                match self.dispatch(ctx, method, params).await? {
                    Ok(_) => Ok(None),
                    Err(fault) => self.on_fault(fault).map(|_| None),
                }
            },
            Message::Response { id, .. } => Err(SessionError::UnexpectedResponse(id)),
        }
    }

    /// Queue the call for a driving thread and wait for its outcome.
    async fn dispatch(
        &self,
        ctx: &CallContext,
        method: String,
        params: Vec<Value>,
    ) -> Result<Result<Value, DispatchError>, SessionError> {
        let (tx, rx) = oneshot::channel();
        let dispatcher = Arc::clone(&self.dispatcher);
        let ctx = ctx.clone();

        let queued = self.jobs.submit(move || {
            // The session may be gone by now
            let _ = tx.send(dispatcher.dispatch(&ctx, &method, &params));
        });
        if !queued {
            return Err(SessionError::WorkersGone);
        }
        rx.await.map_err(|_| SessionError::WorkersGone)
    }

    /// Apply the fault policy: an error value to send back, or escalation.
    fn on_fault(&self, fault: DispatchError) -> Result<Value, SessionError> {
        if self.suppress_exceptions {
            tracing::warn!(session = self.id, error = %fault, "handler fault suppressed");
            Ok(fault.to_value())
        } else {
            Err(SessionError::Fault(fault))
        }
    }
}

/// Read one frame. `None` means the peer closed cleanly between frames.
async fn read_message(
    reader: &mut OwnedReadHalf,
    payload: &mut BytesMut,
) -> Result<Option<Message>, SessionError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = rivet_proto::payload_len(prefix)?;
    payload.clear();
    payload.resize(len, 0);
    reader.read_exact(&mut payload[..]).await?;

    Ok(Some(Message::decode(&payload[..])?))
}

impl ManagedSession for Session {
    fn close(&self) {
        Session::close(self);
    }

    fn is_closed(&self) -> bool {
        Session::is_closed(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rivet_proto::MAX_PAYLOAD_SIZE;
    use tokio::{net::TcpListener, time::timeout};

    use super::*;
    use crate::{
        dispatch_queue::DispatchQueue,
        dispatcher::{HandlerError, int_arg},
    };

    const WAIT: Duration = Duration::from_secs(5);

    /// Reply large enough to outgrow the loopback socket buffers.
    const BULK_REPLY_LEN: usize = 8 * 1024 * 1024;

    fn int(n: i64) -> Value {
        Value::Integer(n.into())
    }

    fn test_dispatcher() -> Arc<Dispatcher> {
        let dispatcher = Dispatcher::new();
        dispatcher.bind("double", |_, params| Ok(int(int_arg(params, 0)? * 2))).unwrap();
        dispatcher.bind("fail", |_, _| Err(HandlerError::Failed("nope".to_string()))).unwrap();
        dispatcher
            .bind("bye", |ctx, _| {
                ctx.close_session();
                Ok(Value::Text("bye".to_string()))
            })
            .unwrap();
        dispatcher
            .bind("bulk_bye", |ctx, _| {
                ctx.close_session();
                Ok(Value::Bytes(vec![7; BULK_REPLY_LEN]))
            })
            .unwrap();
        Arc::new(dispatcher)
    }

    /// Queue with one thread running its jobs.
    fn job_runner() -> JobSender {
        let queue = Arc::new(DispatchQueue::new());
        let sender = queue.sender();
        std::thread::spawn(move || queue.run_blocking());
        sender
    }

    /// Start a session on a loopback connection and return the client end.
    async fn start_session(suppress: bool) -> (Arc<Session>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_end, _) = listener.accept().await.unwrap();

        let session = Arc::new(Session::new(
            ServerHandle::detached(),
            Handle::current(),
            server_end,
            test_dispatcher(),
            job_runner(),
            suppress,
            1,
        ));
        session.start();
        (session, client)
    }

    async fn send(client: &mut TcpStream, message: &Message) {
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        client.write_all(&buf).await.unwrap();
    }

    async fn recv(client: &mut TcpStream) -> Option<Message> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        timeout(WAIT, client.read_exact(&mut prefix)).await.unwrap().ok()?;
        let mut payload = vec![0u8; rivet_proto::payload_len(prefix).unwrap()];
        timeout(WAIT, client.read_exact(&mut payload)).await.unwrap().ok()?;
        Some(Message::decode(&payload).unwrap())
    }

    async fn assert_eof(client: &mut TcpStream) {
        let mut byte = [0u8; 1];
        let read = timeout(WAIT, client.read(&mut byte)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)), "expected the server to close the connection");
    }

    #[tokio::test]
    async fn request_gets_response() {
        let (session, mut client) = start_session(false).await;

        send(&mut client, &Message::request(1, "double", vec![int(21)])).await;
        assert_eq!(recv(&mut client).await, Some(Message::success(1, int(42))));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn suppressed_fault_becomes_error_response() {
        let (session, mut client) = start_session(true).await;

        send(&mut client, &Message::request(1, "fail", vec![])).await;
        let Some(Message::Response { id, outcome: Err(error) }) = recv(&mut client).await else {
            panic!("expected an error response");
        };
        assert_eq!(id, 1);
        assert_eq!(error, Value::Text("method 'fail' failed: nope".to_string()));

        // Session keeps serving
        send(&mut client, &Message::request(2, "double", vec![int(1)])).await;
        assert_eq!(recv(&mut client).await, Some(Message::success(2, int(2))));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn unsuppressed_fault_closes_connection() {
        let (session, mut client) = start_session(false).await;

        send(&mut client, &Message::request(1, "missing", vec![])).await;
        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn suppressed_notification_fault_is_silent() {
        let (session, mut client) = start_session(true).await;

        send(&mut client, &Message::notification("fail", vec![])).await;
        send(&mut client, &Message::request(5, "double", vec![int(3)])).await;

        // The notification produced no reply; the first frame back answers 5
        assert_eq!(recv(&mut client).await, Some(Message::success(5, int(6))));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn client_response_is_protocol_violation() {
        let (session, mut client) = start_session(true).await;

        send(&mut client, &Message::success(1, Value::Null)).await;
        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let (session, mut client) = start_session(true).await;

        let prefix = ((MAX_PAYLOAD_SIZE + 1) as u32).to_be_bytes();
        client.write_all(&prefix).await.unwrap();
        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn close_shuts_connection_down() {
        let (session, mut client) = start_session(false).await;

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eof(&mut client).await;
    }

    #[tokio::test]
    async fn handler_can_close_its_session_after_replying() {
        let (session, mut client) = start_session(false).await;

        send(&mut client, &Message::request(9, "bye", vec![])).await;
        assert_eq!(recv(&mut client).await, Some(Message::success(9, Value::Text("bye".into()))));
        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn close_from_handler_waits_for_a_slow_reader() {
        let (session, mut client) = start_session(false).await;

        send(&mut client, &Message::request(3, "bulk_bye", vec![])).await;

        // Let the reply back up in the socket before reading any of it
        tokio::time::sleep(Duration::from_millis(100)).await;

        let Some(Message::Response { id, outcome: Ok(Value::Bytes(bytes)) }) =
            recv(&mut client).await
        else {
            panic!("expected the complete bulk reply");
        };
        assert_eq!(id, 3);
        assert_eq!(bytes.len(), BULK_REPLY_LEN);
        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn call_queued_after_workers_are_gone_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server_end, _) = listener.accept().await.unwrap();

        // Nothing ever runs jobs from this queue
        let queue = DispatchQueue::new();
        let session = Arc::new(Session::new(
            ServerHandle::detached(),
            Handle::current(),
            server_end,
            test_dispatcher(),
            queue.sender(),
            true,
            1,
        ));
        session.start();

        send(&mut client, &Message::request(1, "double", vec![int(1)])).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(queue);

        assert_eof(&mut client).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn second_start_is_ignored() {
        let (session, mut client) = start_session(false).await;
        session.start();

        send(&mut client, &Message::request(1, "double", vec![int(2)])).await;
        assert_eq!(recv(&mut client).await, Some(Message::success(1, int(4))));
    }
}
