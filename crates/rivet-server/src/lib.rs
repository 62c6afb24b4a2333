//! Rivet RPC server.
//!
//! Accepts TCP connections, turns each into a session bound to a shared method
//! table, and serves all sessions on one executor driven by the caller's
//! thread or by a pool of worker threads. The driving threads also run the
//! handlers, so calls from different sessions run in parallel.
//!
//! # Architecture
//!
//! - [`Server`]: owns the listener, the executor, the worker pool and the
//!   session registry; exposes run, stop and bulk session close
//! - [`Session`]: one accepted connection; reads requests, dispatches them,
//!   writes responses
//! - [`Dispatcher`]: method table shared by every session of a server
//! - [`ServerHandle`]: non-owning reference that handlers use to reach the
//!   server (through [`CallContext`])
//!
//! The wire format lives in [`rivet_proto`].
//!
//! # Example
//!
//! ```no_run
//! use rivet_server::{Server, Value, int_arg};
//!
//! let server = Server::with_address("127.0.0.1", 9000)?;
//! server.bind("add", |_, params| {
//!     Ok(Value::Integer((int_arg(params, 0)? + int_arg(params, 1)?).into()))
//! })?;
//! server.async_run(4)?;
//! server.join();
//! # Ok::<(), rivet_server::ServerError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod accept;
mod config;
mod dispatch_queue;
mod dispatcher;
mod error;
mod executor;
mod registry;
mod server;
mod session;
mod sync;
mod worker_pool;

pub use config::{DEFAULT_BACKLOG, ServerConfig};
pub use dispatcher::{
    CallContext, DispatchError, Dispatcher, Handler, HandlerError, expect_arity, int_arg, text_arg,
};
pub use error::ServerError;
pub use rivet_proto::Value;
pub use server::{Server, ServerHandle, ServerState};
pub use session::{Session, SessionId};
