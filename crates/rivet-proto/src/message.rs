//! RPC messages.
//!
//! A [`Message`] is one of the three msgpack-rpc message shapes carried as a
//! CBOR array. The first array element is the [`MessageKind`] code.
//!
//! # Invariants
//!
//! - A response carries exactly one of `error` and `result`; the other slot is
//!   CBOR null. A response whose error slot is null is a success.
//! - Request ids are chosen by the caller and echoed unchanged in the
//!   response. The codec never interprets them.

use bytes::BufMut;
use ciborium::{Value, value::Integer};

use crate::{
    errors::{ProtocolError, Result},
    frame,
};

/// Request correlation id.
pub type RequestId = u32;

/// Discriminant stored in the first element of every message array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Call expecting a response
    Request = 0,
    /// Answer to a request
    Response = 1,
    /// Call without a response
    Notification = 2,
}

impl MessageKind {
    /// Wire code for this kind.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Kind for a wire code. `None` for unknown codes.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Notification),
            _ => None,
        }
    }

    /// Number of array elements a message of this kind carries.
    fn arity(self) -> usize {
        match self {
            Self::Request | Self::Response => 4,
            Self::Notification => 3,
        }
    }
}

/// A decoded RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Method call expecting a response with the same id
    Request {
        /// Correlation id
        id: RequestId,
        /// Method name
        method: String,
        /// Positional parameters
        params: Vec<Value>,
    },

    /// Answer to a request
    Response {
        /// Id of the request being answered
        id: RequestId,
        /// `Ok(result)` or `Err(error)`
        outcome: std::result::Result<Value, Value>,
    },

    /// Method call without a response
    Notification {
        /// Method name
        method: String,
        /// Positional parameters
        params: Vec<Value>,
    },
}

impl Message {
    /// Build a request.
    pub fn request(id: RequestId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Request { id, method: method.into(), params }
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Notification { method: method.into(), params }
    }

    /// Build a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response { id, outcome: Ok(result) }
    }

    /// Build an error response.
    pub fn failure(id: RequestId, error: Value) -> Self {
        Self::Response { id, outcome: Err(error) }
    }

    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Notification { .. } => MessageKind::Notification,
        }
    }

    /// Convert into the CBOR array representation.
    pub fn into_value(self) -> Value {
        let kind = Value::Integer(Integer::from(self.kind().code()));
        let items = match self {
            Self::Request { id, method, params } => {
                vec![kind, Value::Integer(id.into()), Value::Text(method), Value::Array(params)]
            },
            Self::Response { id, outcome } => {
                let (error, result) = match outcome {
                    Ok(result) => (Value::Null, result),
                    Err(error) => (error, Value::Null),
                };
                vec![kind, Value::Integer(id.into()), error, result]
            },
            Self::Notification { method, params } => {
                vec![kind, Value::Text(method), Value::Array(params)]
            },
        };
        Value::Array(items)
    }

    /// Parse the CBOR array representation.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidMessage` if the value is not an array, the
    ///   kind is unknown, the element count is wrong for the kind, or an
    ///   element has the wrong type
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(invalid("message is not an array"));
        };

        let kind = match items.first() {
            Some(Value::Integer(code)) => u64::try_from(*code)
                .ok()
                .and_then(MessageKind::from_code)
                .ok_or_else(|| invalid("unknown message kind"))?,
            Some(_) => return Err(invalid("message kind is not an integer")),
            None => return Err(invalid("message is empty")),
        };

        if items.len() != kind.arity() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{kind:?} has {} elements, expected {}",
                items.len(),
                kind.arity()
            )));
        }

        let mut items = items.into_iter().skip(1);
        let mut next = || items.next().unwrap_or(Value::Null);

        match kind {
            MessageKind::Request => {
                let id = request_id(next())?;
                let method = method_name(next())?;
                let params = params(next())?;
                Ok(Self::Request { id, method, params })
            },
            MessageKind::Response => {
                let id = request_id(next())?;
                let error = next();
                let result = next();
                let outcome = if error.is_null() { Ok(result) } else { Err(error) };
                Ok(Self::Response { id, outcome })
            },
            MessageKind::Notification => {
                let method = method_name(next())?;
                let params = params(next())?;
                Ok(Self::Notification { method, params })
            },
        }
    }

    /// Encode as a complete frame (length prefix and CBOR payload).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if CBOR serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds
    ///   [`crate::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut payload = Vec::new();
        ciborium::into_writer(&self.clone().into_value(), &mut payload)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        frame::write_frame(&payload, dst)
    }

    /// Decode a frame payload (the bytes after the length prefix).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds
    ///   [`crate::MAX_PAYLOAD_SIZE`]
    /// - `ProtocolError::Decode` if the payload is not valid CBOR
    /// - `ProtocolError::InvalidMessage` if the CBOR is not a message
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() > frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: frame::MAX_PAYLOAD_SIZE,
            });
        }

        let value: Value =
            ciborium::from_reader(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode the first complete frame in `buf`.
    ///
    /// Returns `Ok(None)` if `buf` holds only part of a frame, otherwise the
    /// message and the number of bytes consumed.
    pub fn decode_frame(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        match frame::split_frame(buf)? {
            Some((payload, used)) => Ok(Some((Self::decode(payload)?, used))),
            None => Ok(None),
        }
    }
}

fn invalid(reason: &str) -> ProtocolError {
    ProtocolError::InvalidMessage(reason.to_string())
}

fn request_id(value: Value) -> Result<RequestId> {
    match value {
        Value::Integer(id) => {
            RequestId::try_from(id).map_err(|_| invalid("request id out of range"))
        },
        _ => Err(invalid("request id is not an integer")),
    }
}

fn method_name(value: Value) -> Result<String> {
    match value {
        Value::Text(method) => Ok(method),
        _ => Err(invalid("method name is not text")),
    }
}

fn params(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(params) => Ok(params),
        _ => Err(invalid("params is not an array")),
    }
}
