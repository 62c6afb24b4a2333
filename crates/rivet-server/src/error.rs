//! Server error types.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::dispatcher::DispatchError;

/// Errors surfaced to the owner of a [`crate::Server`].
///
/// Only construction and worker spawning can fail. Accept and session errors
/// are absorbed and logged by the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Bind address is not a literal IP address.
    ///
    /// Fatal to construction. Fix configuration and retry.
    #[error("invalid bind address '{address}': {reason}")]
    InvalidAddress {
        /// Address as given
        address: String,
        /// Parser message
        reason: String,
    },

    /// Listening socket could not be created or bound (port in use, no
    /// permission).
    ///
    /// Fatal to construction. Never retried.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Endpoint we tried to bind
        addr: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// The executor could not be created.
    #[error("failed to build executor: {0}")]
    Runtime(#[source] io::Error),

    /// The OS refused to spawn a worker thread.
    ///
    /// Workers spawned before the failure keep running.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// Other socket-level failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Method registration failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ServerError {
    /// Returns true if the error happened while creating the listening
    /// endpoint.
    pub fn is_bind_failure(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. } | Self::Bind { .. })
    }
}
