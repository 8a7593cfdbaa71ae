//! Error types for Conduit

use std::fmt;
use std::sync::Arc;

/// Unified error type for all Conduit operations.
///
/// The type is `Clone` so a single failure can be fanned out to every waiter
/// that is blocked on a session when it tears down.
#[derive(Debug, Clone)]
pub enum ConduitError {
    /// I/O error on the underlying byte stream
    Io(Arc<std::io::Error>),

    /// Configuration error (invalid builder input, misuse of a session)
    Config(String),

    /// Malformed or truncated protocol data
    ProtocolFormat(String),

    /// Declared packet length exceeds the hard maximum
    PacketTooLarge {
        /// Declared size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// No common algorithm in a negotiation category
    NegotiationFailed(String),

    /// Inbound packet failed integrity verification
    MacVerificationFailed,

    /// Host key signature invalid or the key was refused by the verifier
    HostKeyRejected(String),

    /// Peer refused a channel open
    ChannelOpenFailed {
        /// RFC 4254 reason code
        reason_code: u32,
        /// Description supplied by the peer
        description: String,
    },

    /// Operation on a channel that is half-closed or closed
    ChannelClosed(u32),

    /// Peer answered a request with a failure reply
    RequestRejected(String),

    /// Session is not in the connected state
    NotConnected,

    /// A bounded wait expired
    TimedOut,

    /// Peer ended the session
    PeerDisconnected {
        /// RFC 4253 disconnect reason code
        reason_code: u32,
        /// Description supplied by the peer
        description: String,
    },

    /// Cryptographic failure (key setup, signature, randomness)
    Security(String),

    /// Requested feature or algorithm is not supported
    Unsupported(String),
}

impl ConduitError {
    /// Returns true if the error ends the whole session rather than a single
    /// channel or call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConduitError::Io(_)
                | ConduitError::ProtocolFormat(_)
                | ConduitError::PacketTooLarge { .. }
                | ConduitError::NegotiationFailed(_)
                | ConduitError::MacVerificationFailed
                | ConduitError::HostKeyRejected(_)
                | ConduitError::PeerDisconnected { .. }
        )
    }
}

impl fmt::Display for ConduitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConduitError::Io(e) => write!(f, "IO error: {}", e),
            ConduitError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ConduitError::ProtocolFormat(msg) => write!(f, "Protocol format error: {}", msg),
            ConduitError::PacketTooLarge { size, max } => {
                write!(f, "Packet too large: {} bytes (max {})", size, max)
            }
            ConduitError::NegotiationFailed(msg) => {
                write!(f, "Algorithm negotiation failed: {}", msg)
            }
            ConduitError::MacVerificationFailed => write!(f, "MAC verification failed"),
            ConduitError::HostKeyRejected(msg) => write!(f, "Host key rejected: {}", msg),
            ConduitError::ChannelOpenFailed {
                reason_code,
                description,
            } => write!(
                f,
                "Channel open failed (reason {}): {}",
                reason_code, description
            ),
            ConduitError::ChannelClosed(id) => write!(f, "Channel {} is closed", id),
            ConduitError::RequestRejected(msg) => write!(f, "Request rejected: {}", msg),
            ConduitError::NotConnected => write!(f, "Session is not connected"),
            ConduitError::TimedOut => write!(f, "Operation timed out"),
            ConduitError::PeerDisconnected {
                reason_code,
                description,
            } => write!(
                f,
                "Peer disconnected (reason {}): {}",
                reason_code, description
            ),
            ConduitError::Security(msg) => write!(f, "Security error: {}", msg),
            ConduitError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for ConduitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConduitError::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> Self {
        ConduitError::Io(Arc::new(err))
    }
}

/// Result type for Conduit operations
pub type ConduitResult<T> = Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConduitError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let err = ConduitError::PacketTooLarge {
            size: 40000,
            max: 35000,
        };
        assert_eq!(err.to_string(), "Packet too large: 40000 bytes (max 35000)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConduitError = io_err.into();
        assert!(matches!(err, ConduitError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_clone_preserves_io_source() {
        let err: ConduitError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_is_fatal() {
        assert!(ConduitError::MacVerificationFailed.is_fatal());
        assert!(ConduitError::ProtocolFormat("bad".into()).is_fatal());
        assert!(!ConduitError::ChannelClosed(3).is_fatal());
        assert!(!ConduitError::TimedOut.is_fatal());
        assert!(!ConduitError::ChannelOpenFailed {
            reason_code: 1,
            description: String::new(),
        }
        .is_fatal());
    }

    #[test]
    fn test_result_type() {
        fn example() -> ConduitResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}
