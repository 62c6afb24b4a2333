//! Method dispatch registry.
//!
//! A [`Dispatcher`] maps method names to handlers. One dispatcher is created
//! per server and shared by every session through an `Arc`, so methods bound
//! or unbound while sessions are open are visible to all of them.
//!
//! Handler faults are explicit: a handler returns `Err(HandlerError)` and
//! [`Dispatcher::dispatch`] also converts a handler panic into
//! [`DispatchError::Panicked`]. What a session does with a fault (answer with
//! an error response or drop the connection) is its own policy.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use rivet_proto::Value;
use thiserror::Error;

use crate::{server::ServerHandle, session::SessionId, sync::Signal};

/// Errors a handler reports for one call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Wrong number of positional parameters.
    #[error("expected {expected} arguments, got {got}")]
    Arity {
        /// Parameters the method takes
        expected: usize,
        /// Parameters received
        got: usize,
    },

    /// A parameter has the wrong type or value.
    #[error("argument {index}: {reason}")]
    InvalidArgument {
        /// Zero-based parameter position
        index: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The method ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Errors from binding or dispatching a method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A handler is already bound under this name.
    #[error("method '{0}' is already bound")]
    AlreadyBound(String),

    /// No handler is bound under this name.
    #[error("no method named '{0}'")]
    UnknownMethod(String),

    /// The handler returned an error.
    #[error("method '{method}' failed: {source}")]
    Handler {
        /// Method that failed
        method: String,
        /// Handler's error
        source: HandlerError,
    },

    /// The handler panicked.
    #[error("method '{method}' panicked: {message}")]
    Panicked {
        /// Method that panicked
        method: String,
        /// Panic payload, if it was a string
        message: String,
    },
}

impl DispatchError {
    /// Error value sent to the peer in an error response.
    pub fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

/// Method handler.
pub type Handler = Arc<dyn Fn(&CallContext, &[Value]) -> Result<Value, HandlerError> + Send + Sync>;

/// Per-session view handed to every handler call.
///
/// Lets a handler find out who is calling and ask for its own session, every
/// session, or the whole server to shut down. None of these block: closing
/// and stopping take effect once the handler has returned.
///
/// Handlers run on a thread that drives the server, outside the executor. A
/// handler that blocks holds up only its own session.
#[derive(Debug, Clone)]
pub struct CallContext {
    session_id: SessionId,
    peer_addr: Option<SocketAddr>,
    session_close: Signal,
    server: ServerHandle,
}

impl CallContext {
    pub(crate) fn new(
        session_id: SessionId,
        peer_addr: Option<SocketAddr>,
        session_close: Signal,
        server: ServerHandle,
    ) -> Self {
        Self { session_id, peer_addr, session_close, server }
    }

    /// Context bound to no session and no server.
    ///
    /// For calling [`Dispatcher::dispatch`] in-process. Session and server
    /// requests made through it are no-ops.
    pub fn detached() -> Self {
        Self::new(0, None, Signal::new(), ServerHandle::detached())
    }

    /// Id of the calling session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Remote address of the calling session.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Close the calling session once the current call has been answered.
    pub fn close_session(&self) {
        self.session_close.trigger();
    }

    /// Close every session on the server, including this one.
    ///
    /// Returns `false` if the server is gone.
    pub fn close_sessions(&self) -> bool {
        self.server.close_sessions()
    }

    /// Stop the server.
    ///
    /// Returns `false` if the server is gone. Worker threads are joined later
    /// by the server owner, never from inside a handler.
    pub fn stop_server(&self) -> bool {
        self.server.request_stop()
    }
}

/// Shared table of RPC methods.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("methods", &self.names()).finish()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` under `name`.
    ///
    /// # Errors
    ///
    /// - `DispatchError::AlreadyBound` if `name` is taken. The existing
    ///   handler is kept.
    pub fn bind<F>(&self, name: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(&CallContext, &[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut handlers = self.write();
        if handlers.contains_key(&name) {
            return Err(DispatchError::AlreadyBound(name));
        }

        tracing::debug!(method = %name, "bound method");
        handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Remove the handler bound under `name`. Returns `true` if one existed.
    pub fn unbind(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// Whether a handler is bound under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Bound method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of bound methods.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no methods are bound.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Call the handler bound under `method`.
    ///
    /// The handler runs outside the table lock, so it may bind or unbind
    /// methods itself.
    ///
    /// # Errors
    ///
    /// - `DispatchError::UnknownMethod` if nothing is bound under `method`
    /// - `DispatchError::Handler` if the handler returned an error
    /// - `DispatchError::Panicked` if the handler panicked
    pub fn dispatch(
        &self,
        ctx: &CallContext,
        method: &str,
        params: &[Value],
    ) -> Result<Value, DispatchError> {
        let handler = self
            .read()
            .get(method)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, params))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(DispatchError::Handler { method: method.to_string(), source }),
            Err(payload) => Err(DispatchError::Panicked {
                method: method.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Handler>> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Handler>> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Check that exactly `expected` parameters were passed.
pub fn expect_arity(params: &[Value], expected: usize) -> Result<(), HandlerError> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(HandlerError::Arity { expected, got: params.len() })
    }
}

/// Parameter `index` as a signed integer.
pub fn int_arg(params: &[Value], index: usize) -> Result<i64, HandlerError> {
    match params.get(index) {
        Some(Value::Integer(n)) => i64::try_from(*n).map_err(|_| HandlerError::InvalidArgument {
            index,
            reason: "integer out of range".to_string(),
        }),
        Some(_) => {
            Err(HandlerError::InvalidArgument { index, reason: "expected integer".to_string() })
        },
        None => Err(HandlerError::InvalidArgument { index, reason: "missing".to_string() }),
    }
}

/// Parameter `index` as text.
pub fn text_arg(params: &[Value], index: usize) -> Result<&str, HandlerError> {
    match params.get(index) {
        Some(Value::Text(text)) => Ok(text.as_str()),
        Some(_) => Err(HandlerError::InvalidArgument { index, reason: "expected text".to_string() }),
        None => Err(HandlerError::InvalidArgument { index, reason: "missing".to_string() }),
    }
}
