//! Session lifecycle state and teardown records.

use std::fmt;

use conduit_platform::ConduitError;

use crate::ssh::message::DisconnectReason;

/// Lifecycle of a [`Session`](super::Session).
///
/// A session that was never connected reports `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Stream opening, version exchange or first key exchange in progress
    Connecting,
    /// First key exchange complete; application traffic allowed
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Not connected (never connected, or torn down)
    Disconnected,
}

impl SessionState {
    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectOrigin {
    /// The application called `disconnect` or dropped the session
    Local,
    /// The peer sent SSH_MSG_DISCONNECT
    Peer,
    /// The engine detected a fatal error
    Error,
}

/// Why a session ended. Available from `Session::disconnect_info` and
/// carried by every wait that was outstanding at teardown.
#[derive(Debug, Clone)]
pub struct DisconnectInfo {
    /// Who ended the session
    pub origin: DisconnectOrigin,
    /// RFC 4253 reason code
    pub reason_code: u32,
    /// Human readable description
    pub description: String,
    /// The error behind an [`DisconnectOrigin::Error`] teardown
    pub error: Option<ConduitError>,
}

impl DisconnectInfo {
    /// Creates a record without an underlying error.
    pub fn new(origin: DisconnectOrigin, reason_code: u32, description: impl Into<String>) -> Self {
        Self {
            origin,
            reason_code,
            description: description.into(),
            error: None,
        }
    }

    /// Record for a teardown caused by `error`.
    pub fn from_error(error: ConduitError) -> Self {
        let reason = DisconnectReason::for_error(&error);
        let description = match &error {
            ConduitError::HostKeyRejected(_) => "host key not verified".to_string(),
            other => other.to_string(),
        };
        Self {
            origin: DisconnectOrigin::Error,
            reason_code: reason.code(),
            description,
            error: Some(error),
        }
    }

    /// Reason as an enum, if the code is a known one.
    pub fn reason(&self) -> Option<DisconnectReason> {
        DisconnectReason::from_code(self.reason_code)
    }

    /// The error a blocked caller should see.
    pub fn into_error(self) -> ConduitError {
        match self.origin {
            DisconnectOrigin::Peer => ConduitError::PeerDisconnected {
                reason_code: self.reason_code,
                description: self.description,
            },
            DisconnectOrigin::Error => self.error.unwrap_or(ConduitError::NotConnected),
            DisconnectOrigin::Local => ConduitError::NotConnected,
        }
    }
}

impl PartialEq for DisconnectInfo {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
            && self.reason_code == other.reason_code
            && self.description == other.description
    }
}

impl Eq for DisconnectInfo {}

impl fmt::Display for DisconnectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} disconnect (reason {}): {}",
            self.origin, self.reason_code, self.description
        )
    }
}
