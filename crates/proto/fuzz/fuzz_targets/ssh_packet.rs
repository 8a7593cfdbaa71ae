//! Fuzz target for SSH binary packet parsing.
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_packet -- -max_total_time=300
//! ```

#![no_main]
use conduit_proto::ssh::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::from_bytes(data) {
        let serialized = packet.to_bytes();
        let reparsed =
            Packet::from_bytes(&serialized).expect("re-parsing a framed packet never fails");

        assert_eq!(packet.payload(), reparsed.payload());
    }
});
