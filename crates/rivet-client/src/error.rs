//! Client errors.

use std::io;

use rivet_proto::{MessageKind, ProtocolError, Value};
use thiserror::Error;

/// Errors returned by [`crate::Client`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket failure, including read and write timeouts
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Server sent bytes that are not a valid message
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Server answered the call with an error value
    #[error("server returned error: {0:?}")]
    Rpc(Value),

    /// Server closed the connection
    #[error("server closed the connection")]
    Disconnected,

    /// Server sent something other than a response
    #[error("unexpected {0:?} message from server")]
    UnexpectedMessage(MessageKind),
}

impl ClientError {
    /// Text of a server error, if the server sent one as text.
    pub fn rpc_message(&self) -> Option<&str> {
        match self {
            Self::Rpc(Value::Text(text)) => Some(text),
            _ => None,
        }
    }
}
