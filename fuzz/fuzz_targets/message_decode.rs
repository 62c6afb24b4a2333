//! Fuzz target for message decoding
//!
//! Feeds arbitrary bytes to both decode entry points: a bare payload (what a
//! session hands over after reading the prefix) and a buffer that may hold a
//! length-prefixed frame.
//!
//! Decoding must NEVER panic. Invalid input returns an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rivet_proto::Message;

fuzz_target!(|data: &[u8]| {
    let _ = Message::decode(data);

    if let Ok(Some((message, used))) = Message::decode_frame(data) {
        assert!(used <= data.len());

        // Anything that decodes must encode again
        let mut buf = Vec::new();
        message.encode(&mut buf).expect("decoded message must re-encode");
    }
});
