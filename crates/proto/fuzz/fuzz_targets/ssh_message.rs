//! Fuzz target for message decoding.
//!
//! Decoding must never panic. Whatever decodes must encode to bytes that
//! decode to the same message.
//!
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_message -- -max_total_time=300
//! ```

#![no_main]
use conduit_proto::ssh::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let encoded = message.encode();
        let again = Message::decode(&encoded).expect("encoded message decodes");
        assert_eq!(message, again);
    }
});
