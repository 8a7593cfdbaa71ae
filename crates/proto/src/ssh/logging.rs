//! Structured logging for session events
//!
//! Contextual log helpers built on `tracing`. Every event carries the fields
//! needed to follow a session without enabling packet dumps.
//!
//! # Log Levels
//!
//! - **TRACE**: Individual packets
//! - **DEBUG**: Channel lifecycle, window adjustments
//! - **INFO**: Session state transitions, key exchanges, disconnects
//! - **WARN**: Unsupported messages and other unusual but survivable input
//! - **ERROR**: Sessions ended by a fatal error
//!
//! # Example
//!
//! ```no_run
//! use conduit_proto::ssh::logging;
//! use conduit_proto::ssh::SessionState;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("conduit_proto::ssh=debug")
//!     .init();
//!
//! logging::log_state_transition(SessionState::Connecting, SessionState::Connected);
//! ```

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::negotiate::NegotiatedAlgorithms;
use super::session::{DisconnectInfo, DisconnectOrigin, SessionState};

/// Log a session state transition
pub fn log_state_transition(from: SessionState, to: SessionState) {
    info!(
        state_from = from.as_str(),
        state_to = to.as_str(),
        "session state transition"
    );
}

/// Log the start of a key exchange
///
/// # Arguments
///
/// * `initiated_by_peer` - Whether the peer's KEXINIT came first
/// * `bytes_since_last` - Bytes sent under the previous keys
pub fn log_kex_started(initiated_by_peer: bool, bytes_since_last: u64) {
    info!(
        initiated_by_peer = initiated_by_peer,
        bytes_since_last = bytes_since_last,
        "key exchange started"
    );
}

/// Log a completed key exchange
///
/// # Arguments
///
/// * `session_id` - Session identifier (first exchange hash)
/// * `negotiated` - Algorithms now in use
/// * `duration` - Time from our KEXINIT to the peer's NEWKEYS
pub fn log_kex_complete(session_id: &[u8], negotiated: &NegotiatedAlgorithms, duration: Duration) {
    info!(
        session_id = %hex::encode(session_id),
        kex = %negotiated.kex,
        host_key = %negotiated.host_key,
        cipher_out = %negotiated.cipher_client_to_server,
        cipher_in = %negotiated.cipher_server_to_client,
        mac_out = %negotiated.mac_client_to_server,
        mac_in = %negotiated.mac_server_to_client,
        duration_ms = duration.as_millis() as u64,
        "key exchange completed"
    );
}

/// Log a packet crossing the transport
///
/// # Arguments
///
/// * `direction` - "send" or "recv"
/// * `seq` - Packet sequence number
/// * `msg_type` - Message name
/// * `payload_len` - Payload length in bytes
pub fn log_packet(direction: &str, seq: u32, msg_type: &str, payload_len: usize) {
    trace!(
        direction = direction,
        seq_num = seq,
        msg_type = msg_type,
        payload_len = payload_len,
        "packet"
    );
}

/// Log a channel lifecycle event ("opening", "open", "closing", "closed", ...)
pub fn log_channel_event(channel: u32, event: &str) {
    debug!(channel = channel, event = event, "channel event");
}

/// Log a receive window replenishment
pub fn log_window_adjust(channel: u32, bytes_to_add: u32, window: u32) {
    debug!(
        channel = channel,
        bytes_to_add = bytes_to_add,
        window = window,
        "receive window adjusted"
    );
}

/// Log the end of a session
pub fn log_disconnect(info: &DisconnectInfo) {
    match info.origin {
        DisconnectOrigin::Error => {
            error!(
                origin = ?info.origin,
                reason_code = info.reason_code,
                description = %info.description,
                "session ended by error"
            );
        }
        DisconnectOrigin::Local | DisconnectOrigin::Peer => {
            info!(
                origin = ?info.origin,
                reason_code = info.reason_code,
                description = %info.description,
                "session disconnected"
            );
        }
    }
}

/// Log a message we do not handle (answered with UNIMPLEMENTED)
pub fn log_unsupported_message(seq: u32, msg_type: u8) {
    warn!(
        seq_num = seq,
        msg_type = msg_type,
        "unsupported message answered with UNIMPLEMENTED"
    );
}
