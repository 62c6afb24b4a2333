//! Rivet wire protocol.
//!
//! Messages travel as length-prefixed frames: a 4-byte big-endian payload
//! length followed by a CBOR payload. The payload is a CBOR array laid out the
//! same way msgpack-rpc lays out its messages, so a message's kind is always
//! its first element:
//!
//! ```text
//! Request       [0, id, method, params]
//! Response      [1, id, error, result]
//! Notification  [2, method, params]
//! ```
//!
//! This crate is pure data and codec logic. It performs no I/O; the server and
//! client read the length prefix, then hand the payload to [`Message::decode`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;

pub use ciborium::Value;
pub use errors::{ProtocolError, Result};
pub use frame::{LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE, payload_len};
pub use message::{Message, MessageKind, RequestId};
