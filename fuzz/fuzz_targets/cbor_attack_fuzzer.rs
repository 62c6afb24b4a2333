//! Fuzz target for hostile CBOR payloads
//!
//! # Strategy
//!
//! - Deeply nested: message arrays whose params nest to arbitrary depth
//! - Huge lengths: CBOR headers claiming massive byte/text/array lengths
//! - Kind confusion: well-formed arrays whose elements don't fit the kind
//! - Oversized prefix: length prefixes past the payload limit
//!
//! # Invariants
//!
//! - Huge claimed lengths are rejected, not allocated
//! - Oversized prefixes are rejected before the payload is looked at
//! - NEVER panic on malformed CBOR

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rivet_proto::{Message, ProtocolError, MAX_PAYLOAD_SIZE};

#[derive(Debug, Clone, Arbitrary)]
enum CborAttack {
    DeeplyNested { depth: u16 },
    HugeLength { claimed_len_exponent: u8, major: LengthMajor },
    KindConfusion { kind: u8, elements: Vec<u8> },
    OversizedPrefix { excess: u32 },
}

#[derive(Debug, Clone, Arbitrary)]
enum LengthMajor {
    Bytes,
    Text,
    Array,
}

fuzz_target!(|attack: CborAttack| {
    match attack {
        CborAttack::DeeplyNested { depth } => {
            // [0, 1, "m", [[[...1...]]]]
            let mut bytes = vec![0x84, 0x00, 0x01, 0x61, b'm'];
            for _ in 0..(depth % 1024) {
                bytes.push(0x81);
            }
            bytes.push(0x01);
            let _ = Message::decode(&bytes);
        }

        CborAttack::HugeLength { claimed_len_exponent, major } => {
            let exponent = u32::from(claimed_len_exponent % 32);
            let claimed_length = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
            let header = match major {
                LengthMajor::Bytes => 0x5A,
                LengthMajor::Text => 0x7A,
                LengthMajor::Array => 0x9A,
            };

            let mut bytes = vec![0x84, 0x00, 0x01, 0x61, b'm', header];
            bytes.extend_from_slice(&claimed_length.to_be_bytes());
            bytes.extend(vec![0x01; (claimed_length as usize).min(10)]);
            let _ = Message::decode(&bytes);
        }

        CborAttack::KindConfusion { kind, elements } => {
            // Short array of small integers led by an arbitrary kind code
            let count = elements.len().min(22) as u8;
            let mut bytes = vec![0x80 | (count + 1), kind % 24];
            bytes.extend(elements.iter().take(count as usize).map(|e| e % 24));
            let _ = Message::decode(&bytes);
        }

        CborAttack::OversizedPrefix { excess } => {
            let len = (MAX_PAYLOAD_SIZE as u64 + 1 + u64::from(excess)).min(u64::from(u32::MAX));
            let mut bytes = (len as u32).to_be_bytes().to_vec();
            bytes.extend_from_slice(&[0x80; 8]);

            let result = Message::decode_frame(&bytes);
            assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
        }
    }
});
