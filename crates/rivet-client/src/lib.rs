//! Blocking Rivet client.
//!
//! One [`Client`] wraps one TCP connection. Calls are sequential: each
//! [`Client::call`] writes a request and reads until the matching response
//! arrives. There is no retry or reconnect; a failed connection surfaces as
//! [`ClientError::Disconnected`] or [`ClientError::Io`] and the caller decides
//! what to do.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;

pub use client::Client;
pub use error::ClientError;
pub use rivet_proto::Value;
