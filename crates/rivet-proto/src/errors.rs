//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds [`crate::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Size of the offending payload
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Payload is not valid CBOR.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Payload is valid CBOR but not a well-formed message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Returns true if the peer sent bytes that can never be a valid message.
    ///
    /// Encode failures are local problems; everything else means the stream
    /// can no longer be trusted and the connection should be dropped.
    pub fn is_peer_fault(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        let err = ProtocolError::PayloadTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "payload too large: 20 bytes (max 10)");

        let err = ProtocolError::InvalidMessage("unknown kind 7".to_string());
        assert_eq!(err.to_string(), "invalid message: unknown kind 7");
    }

    #[test]
    fn encode_errors_are_local() {
        assert!(!ProtocolError::Encode("io".to_string()).is_peer_fault());
        assert!(ProtocolError::Decode("eof".to_string()).is_peer_fault());
        assert!(ProtocolError::PayloadTooLarge { size: 2, max: 1 }.is_peer_fault());
    }
}
