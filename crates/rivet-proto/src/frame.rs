//! Length-prefixed framing.
//!
//! Layout on the wire: `[payload length: u32 BE] + [payload: CBOR bytes]`.
//!
//! # Invariants
//!
//! - The prefix always equals the number of payload bytes that follow.
//! - No frame carries more than [`MAX_PAYLOAD_SIZE`] payload bytes. Readers
//!   check the prefix before allocating, so a hostile length cannot force a
//!   large allocation.

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload accepted in either direction (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Validate a received length prefix and return the payload length.
///
/// # Errors
///
/// - `ProtocolError::PayloadTooLarge` if the prefix exceeds
///   [`MAX_PAYLOAD_SIZE`]
pub fn payload_len(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: len, max: MAX_PAYLOAD_SIZE });
    }
    Ok(len)
}

/// Write `payload` to `dst` behind its length prefix.
///
/// # Errors
///
/// - `ProtocolError::PayloadTooLarge` if the payload exceeds
///   [`MAX_PAYLOAD_SIZE`]. Nothing is written in that case.
pub fn write_frame(payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    // Bounded by MAX_PAYLOAD_SIZE above, which fits in u32.
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a full frame, otherwise the
/// payload slice and the total number of bytes the frame occupied.
pub fn split_frame(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    let Some(prefix) = buf.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let mut raw = [0u8; LENGTH_PREFIX_SIZE];
    raw.copy_from_slice(prefix);
    let len = payload_len(raw)?;

    let end = LENGTH_PREFIX_SIZE + len;
    Ok(buf.get(LENGTH_PREFIX_SIZE..end).map(|payload| (payload, end)))
}
