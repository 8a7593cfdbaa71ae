//! SSH protocol messages (RFC 4253 Section 12, RFC 4252, RFC 4254).
//!
//! [`MessageType`] holds the numeric identifiers. [`Message`] is the tagged
//! union the session dispatches on: every payload that comes out of the
//! transport is decoded into exactly one variant, and every variant encodes
//! back to a payload (message number included).
//!
//! # Message Categories
//!
//! - **Transport Layer Generic** (1-19): Disconnect, ignore, debug, service
//! - **Algorithm Negotiation** (20-29): Key exchange initialization
//! - **Key Exchange Method** (30-49): Method-specific messages
//! - **User Authentication** (50-79): Authentication protocol
//! - **Connection Protocol** (80-127): Global requests and channels
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::message::{Message, MessageType};
//!
//! let msg = Message::ServiceRequest { service: "ssh-userauth".to_string() };
//! let bytes = msg.encode();
//! assert_eq!(bytes[0], MessageType::ServiceRequest as u8);
//! assert_eq!(Message::decode(&bytes).unwrap(), msg);
//! ```

use bytes::{BufMut, BytesMut};
use conduit_platform::{ConduitError, ConduitResult};

use super::auth::{AuthBanner, AuthFailure, AuthRequest};
use super::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelRequest, ChannelSuccess,
    ChannelWindowAdjust, GlobalRequest,
};
use super::kex::KexInit;
use super::wire::{
    read_bool, read_bytes, read_remaining, read_string, read_u32, write_bool, write_bytes,
    write_string,
};

/// SSH message numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message - debugging information.
    Debug = 4,
    /// Service request (e.g., "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept.
    ServiceAccept = 6,
    /// Extension negotiation (RFC 8308).
    ExtInfo = 7,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - signals transition to new keys.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// DH/ECDH key exchange init (same number for both).
    KexdhInit = 30,
    /// DH/ECDH key exchange reply (same number for both).
    KexdhReply = 31,

    // User authentication generic (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// User authentication banner.
    UserauthBanner = 53,
    /// First method-specific number; PK_OK for publickey.
    UserauthPkOk = 60,

    // Connection protocol generic (80-127)
    /// Global request.
    GlobalRequest = 80,
    /// Request success.
    RequestSuccess = 81,
    /// Request failure.
    RequestFailure = 82,
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel success.
    ChannelSuccess = 99,
    /// Channel failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// Method-specific authentication numbers other than 60 have no entry.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            7 => Some(MessageType::ExtInfo),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexdhInit),
            31 => Some(MessageType::KexdhReply),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            60 => Some(MessageType::UserauthPkOk),
            80 => Some(MessageType::GlobalRequest),
            81 => Some(MessageType::RequestSuccess),
            82 => Some(MessageType::RequestFailure),
            90 => Some(MessageType::ChannelOpen),
            91 => Some(MessageType::ChannelOpenConfirmation),
            92 => Some(MessageType::ChannelOpenFailure),
            93 => Some(MessageType::ChannelWindowAdjust),
            94 => Some(MessageType::ChannelData),
            95 => Some(MessageType::ChannelExtendedData),
            96 => Some(MessageType::ChannelEof),
            97 => Some(MessageType::ChannelClose),
            98 => Some(MessageType::ChannelRequest),
            99 => Some(MessageType::ChannelSuccess),
            100 => Some(MessageType::ChannelFailure),
            _ => None,
        }
    }

    /// Returns true for the key exchange range (20-49).
    pub fn is_kex(byte: u8) -> bool {
        (20..=49).contains(&byte)
    }
}

/// SSH disconnect reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DisconnectReason {
    /// SSH_DISCONNECT_HOST_NOT_ALLOWED_TO_CONNECT
    HostNotAllowedToConnect = 1,
    /// SSH_DISCONNECT_PROTOCOL_ERROR
    ProtocolError = 2,
    /// SSH_DISCONNECT_KEY_EXCHANGE_FAILED
    KeyExchangeFailed = 3,
    /// SSH_DISCONNECT_RESERVED
    Reserved = 4,
    /// SSH_DISCONNECT_MAC_ERROR
    MacError = 5,
    /// SSH_DISCONNECT_COMPRESSION_ERROR
    CompressionError = 6,
    /// SSH_DISCONNECT_SERVICE_NOT_AVAILABLE
    ServiceNotAvailable = 7,
    /// SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED
    ProtocolVersionNotSupported = 8,
    /// SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE
    HostKeyNotVerifiable = 9,
    /// SSH_DISCONNECT_CONNECTION_LOST
    ConnectionLost = 10,
    /// SSH_DISCONNECT_BY_APPLICATION
    ByApplication = 11,
    /// SSH_DISCONNECT_TOO_MANY_CONNECTIONS
    TooManyConnections = 12,
    /// SSH_DISCONNECT_AUTH_CANCELLED_BY_USER
    AuthCancelledByUser = 13,
    /// SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE
    NoMoreAuthMethodsAvailable = 14,
    /// SSH_DISCONNECT_ILLEGAL_USER_NAME
    IllegalUserName = 15,
}

impl DisconnectReason {
    /// Returns the wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire code back to a reason.
    pub fn from_code(code: u32) -> Option<Self> {
        use DisconnectReason::*;
        let reason = match code {
            1 => HostNotAllowedToConnect,
            2 => ProtocolError,
            3 => KeyExchangeFailed,
            4 => Reserved,
            5 => MacError,
            6 => CompressionError,
            7 => ServiceNotAvailable,
            8 => ProtocolVersionNotSupported,
            9 => HostKeyNotVerifiable,
            10 => ConnectionLost,
            11 => ByApplication,
            12 => TooManyConnections,
            13 => AuthCancelledByUser,
            14 => NoMoreAuthMethodsAvailable,
            15 => IllegalUserName,
            _ => return None,
        };
        Some(reason)
    }

    /// The reason a fatal engine error is reported with.
    pub fn for_error(err: &ConduitError) -> Self {
        match err {
            ConduitError::MacVerificationFailed => DisconnectReason::MacError,
            ConduitError::NegotiationFailed(_) => DisconnectReason::KeyExchangeFailed,
            ConduitError::HostKeyRejected(_) => DisconnectReason::HostKeyNotVerifiable,
            ConduitError::Io(_) | ConduitError::TimedOut => DisconnectReason::ConnectionLost,
            _ => DisconnectReason::ProtocolError,
        }
    }
}

/// SSH_MSG_DISCONNECT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason code
    pub reason_code: u32,
    /// Human readable description
    pub description: String,
    /// Language tag
    pub language_tag: String,
}

impl Disconnect {
    /// Creates a disconnect message.
    pub fn new(reason: DisconnectReason, description: impl Into<String>) -> Self {
        Self {
            reason_code: reason.code(),
            description: description.into(),
            language_tag: String::new(),
        }
    }
}

/// A decoded SSH message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// SSH_MSG_DISCONNECT
    Disconnect(Disconnect),
    /// SSH_MSG_IGNORE
    Ignore {
        /// Arbitrary data
        data: Vec<u8>,
    },
    /// SSH_MSG_UNIMPLEMENTED
    Unimplemented {
        /// Sequence number of the rejected packet
        sequence_number: u32,
    },
    /// SSH_MSG_DEBUG
    Debug {
        /// Whether the client should show the message
        always_display: bool,
        /// Message text
        message: String,
        /// Language tag
        language: String,
    },
    /// SSH_MSG_SERVICE_REQUEST
    ServiceRequest {
        /// Service name
        service: String,
    },
    /// SSH_MSG_SERVICE_ACCEPT
    ServiceAccept {
        /// Service name
        service: String,
    },
    /// SSH_MSG_EXT_INFO: extension name/value pairs
    ExtInfo(Vec<(String, Vec<u8>)>),
    /// SSH_MSG_KEXINIT
    KexInit(KexInit),
    /// SSH_MSG_NEWKEYS
    NewKeys,
    /// SSH_MSG_KEXDH_INIT / SSH_MSG_KEX_ECDH_INIT
    KexDhInit {
        /// Client ephemeral public value (mpint body or raw point)
        e: Vec<u8>,
    },
    /// SSH_MSG_KEXDH_REPLY / SSH_MSG_KEX_ECDH_REPLY
    KexDhReply {
        /// Server host key blob
        host_key: Vec<u8>,
        /// Server ephemeral public value (mpint body or raw point)
        f: Vec<u8>,
        /// Signature blob over the exchange hash
        signature: Vec<u8>,
    },
    /// SSH_MSG_USERAUTH_REQUEST
    UserauthRequest(AuthRequest),
    /// SSH_MSG_USERAUTH_FAILURE
    UserauthFailure(AuthFailure),
    /// SSH_MSG_USERAUTH_SUCCESS
    UserauthSuccess,
    /// SSH_MSG_USERAUTH_BANNER
    UserauthBanner(AuthBanner),
    /// Method-specific authentication message (60-79), left raw.
    UserauthMethodSpecific {
        /// Message number
        message_type: u8,
        /// Bytes after the message number
        payload: Vec<u8>,
    },
    /// SSH_MSG_GLOBAL_REQUEST
    GlobalRequest(GlobalRequest),
    /// SSH_MSG_REQUEST_SUCCESS
    RequestSuccess {
        /// Request-specific response data
        data: Vec<u8>,
    },
    /// SSH_MSG_REQUEST_FAILURE
    RequestFailure,
    /// SSH_MSG_CHANNEL_OPEN
    ChannelOpen(ChannelOpen),
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION
    ChannelOpenConfirmation(ChannelOpenConfirmation),
    /// SSH_MSG_CHANNEL_OPEN_FAILURE
    ChannelOpenFailure(ChannelOpenFailure),
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST
    ChannelWindowAdjust(ChannelWindowAdjust),
    /// SSH_MSG_CHANNEL_DATA
    ChannelData(ChannelData),
    /// SSH_MSG_CHANNEL_EXTENDED_DATA
    ChannelExtendedData(ChannelExtendedData),
    /// SSH_MSG_CHANNEL_EOF
    ChannelEof(ChannelEof),
    /// SSH_MSG_CHANNEL_CLOSE
    ChannelClose(ChannelClose),
    /// SSH_MSG_CHANNEL_REQUEST
    ChannelRequest(ChannelRequest),
    /// SSH_MSG_CHANNEL_SUCCESS
    ChannelSuccess(ChannelSuccess),
    /// SSH_MSG_CHANNEL_FAILURE
    ChannelFailure(ChannelFailure),
    /// A well-formed packet whose message number has no variant.
    Unsupported {
        /// Message number
        message_type: u8,
        /// Bytes after the message number
        payload: Vec<u8>,
    },
}

impl Message {
    /// Returns the message number.
    pub fn message_type(&self) -> u8 {
        match self {
            Message::Disconnect(_) => MessageType::Disconnect as u8,
            Message::Ignore { .. } => MessageType::Ignore as u8,
            Message::Unimplemented { .. } => MessageType::Unimplemented as u8,
            Message::Debug { .. } => MessageType::Debug as u8,
            Message::ServiceRequest { .. } => MessageType::ServiceRequest as u8,
            Message::ServiceAccept { .. } => MessageType::ServiceAccept as u8,
            Message::ExtInfo(_) => MessageType::ExtInfo as u8,
            Message::KexInit(_) => MessageType::KexInit as u8,
            Message::NewKeys => MessageType::NewKeys as u8,
            Message::KexDhInit { .. } => MessageType::KexdhInit as u8,
            Message::KexDhReply { .. } => MessageType::KexdhReply as u8,
            Message::UserauthRequest(_) => MessageType::UserauthRequest as u8,
            Message::UserauthFailure(_) => MessageType::UserauthFailure as u8,
            Message::UserauthSuccess => MessageType::UserauthSuccess as u8,
            Message::UserauthBanner(_) => MessageType::UserauthBanner as u8,
            Message::UserauthMethodSpecific { message_type, .. } => *message_type,
            Message::GlobalRequest(_) => MessageType::GlobalRequest as u8,
            Message::RequestSuccess { .. } => MessageType::RequestSuccess as u8,
            Message::RequestFailure => MessageType::RequestFailure as u8,
            Message::ChannelOpen(_) => MessageType::ChannelOpen as u8,
            Message::ChannelOpenConfirmation(_) => MessageType::ChannelOpenConfirmation as u8,
            Message::ChannelOpenFailure(_) => MessageType::ChannelOpenFailure as u8,
            Message::ChannelWindowAdjust(_) => MessageType::ChannelWindowAdjust as u8,
            Message::ChannelData(_) => MessageType::ChannelData as u8,
            Message::ChannelExtendedData(_) => MessageType::ChannelExtendedData as u8,
            Message::ChannelEof(_) => MessageType::ChannelEof as u8,
            Message::ChannelClose(_) => MessageType::ChannelClose as u8,
            Message::ChannelRequest(_) => MessageType::ChannelRequest as u8,
            Message::ChannelSuccess(_) => MessageType::ChannelSuccess as u8,
            Message::ChannelFailure(_) => MessageType::ChannelFailure as u8,
            Message::Unsupported { message_type, .. } => *message_type,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Disconnect(_) => "DISCONNECT",
            Message::Ignore { .. } => "IGNORE",
            Message::Unimplemented { .. } => "UNIMPLEMENTED",
            Message::Debug { .. } => "DEBUG",
            Message::ServiceRequest { .. } => "SERVICE_REQUEST",
            Message::ServiceAccept { .. } => "SERVICE_ACCEPT",
            Message::ExtInfo(_) => "EXT_INFO",
            Message::KexInit(_) => "KEXINIT",
            Message::NewKeys => "NEWKEYS",
            Message::KexDhInit { .. } => "KEXDH_INIT",
            Message::KexDhReply { .. } => "KEXDH_REPLY",
            Message::UserauthRequest(_) => "USERAUTH_REQUEST",
            Message::UserauthFailure(_) => "USERAUTH_FAILURE",
            Message::UserauthSuccess => "USERAUTH_SUCCESS",
            Message::UserauthBanner(_) => "USERAUTH_BANNER",
            Message::UserauthMethodSpecific { .. } => "USERAUTH_METHOD_SPECIFIC",
            Message::GlobalRequest(_) => "GLOBAL_REQUEST",
            Message::RequestSuccess { .. } => "REQUEST_SUCCESS",
            Message::RequestFailure => "REQUEST_FAILURE",
            Message::ChannelOpen(_) => "CHANNEL_OPEN",
            Message::ChannelOpenConfirmation(_) => "CHANNEL_OPEN_CONFIRMATION",
            Message::ChannelOpenFailure(_) => "CHANNEL_OPEN_FAILURE",
            Message::ChannelWindowAdjust(_) => "CHANNEL_WINDOW_ADJUST",
            Message::ChannelData(_) => "CHANNEL_DATA",
            Message::ChannelExtendedData(_) => "CHANNEL_EXTENDED_DATA",
            Message::ChannelEof(_) => "CHANNEL_EOF",
            Message::ChannelClose(_) => "CHANNEL_CLOSE",
            Message::ChannelRequest(_) => "CHANNEL_REQUEST",
            Message::ChannelSuccess(_) => "CHANNEL_SUCCESS",
            Message::ChannelFailure(_) => "CHANNEL_FAILURE",
            Message::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    /// Serializes to a packet payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Disconnect(d) => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::Disconnect as u8);
                buf.put_u32(d.reason_code);
                write_string(&mut buf, &d.description);
                write_string(&mut buf, &d.language_tag);
                buf.to_vec()
            }
            Message::Ignore { data } => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::Ignore as u8);
                write_bytes(&mut buf, data);
                buf.to_vec()
            }
            Message::Unimplemented { sequence_number } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u8(MessageType::Unimplemented as u8);
                buf.put_u32(*sequence_number);
                buf.to_vec()
            }
            Message::Debug {
                always_display,
                message,
                language,
            } => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::Debug as u8);
                write_bool(&mut buf, *always_display);
                write_string(&mut buf, message);
                write_string(&mut buf, language);
                buf.to_vec()
            }
            Message::ServiceRequest { service } => {
                Self::encode_string(MessageType::ServiceRequest, service)
            }
            Message::ServiceAccept { service } => {
                Self::encode_string(MessageType::ServiceAccept, service)
            }
            Message::ExtInfo(extensions) => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::ExtInfo as u8);
                buf.put_u32(extensions.len() as u32);
                for (name, value) in extensions {
                    write_string(&mut buf, name);
                    write_bytes(&mut buf, value);
                }
                buf.to_vec()
            }
            Message::KexInit(kexinit) => kexinit.to_bytes(),
            Message::NewKeys => vec![MessageType::NewKeys as u8],
            Message::KexDhInit { e } => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::KexdhInit as u8);
                write_bytes(&mut buf, e);
                buf.to_vec()
            }
            Message::KexDhReply {
                host_key,
                f,
                signature,
            } => {
                let mut buf = BytesMut::new();
                buf.put_u8(MessageType::KexdhReply as u8);
                write_bytes(&mut buf, host_key);
                write_bytes(&mut buf, f);
                write_bytes(&mut buf, signature);
                buf.to_vec()
            }
            Message::UserauthRequest(req) => req.to_bytes(),
            Message::UserauthFailure(failure) => failure.to_bytes(),
            Message::UserauthSuccess => vec![MessageType::UserauthSuccess as u8],
            Message::UserauthBanner(banner) => banner.to_bytes(),
            Message::UserauthMethodSpecific {
                message_type,
                payload,
            }
            | Message::Unsupported {
                message_type,
                payload,
            } => {
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.push(*message_type);
                out.extend_from_slice(payload);
                out
            }
            Message::GlobalRequest(req) => req.to_bytes(),
            Message::RequestSuccess { data } => {
                let mut out = Vec::with_capacity(data.len() + 1);
                out.push(MessageType::RequestSuccess as u8);
                out.extend_from_slice(data);
                out
            }
            Message::RequestFailure => vec![MessageType::RequestFailure as u8],
            Message::ChannelOpen(m) => m.to_bytes(),
            Message::ChannelOpenConfirmation(m) => m.to_bytes(),
            Message::ChannelOpenFailure(m) => m.to_bytes(),
            Message::ChannelWindowAdjust(m) => m.to_bytes(),
            Message::ChannelData(m) => m.to_bytes(),
            Message::ChannelExtendedData(m) => m.to_bytes(),
            Message::ChannelEof(m) => m.to_bytes(),
            Message::ChannelClose(m) => m.to_bytes(),
            Message::ChannelRequest(m) => m.to_bytes(),
            Message::ChannelSuccess(m) => m.to_bytes(),
            Message::ChannelFailure(m) => m.to_bytes(),
        }
    }

    fn encode_string(message_type: MessageType, value: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(message_type as u8);
        write_string(&mut buf, value);
        buf.to_vec()
    }

    /// Parses a packet payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::ProtocolFormat`] for an empty, truncated or
    /// malformed payload. A well-formed payload with an unknown message
    /// number decodes to [`Message::Unsupported`].
    pub fn decode(data: &[u8]) -> ConduitResult<Self> {
        let tag = *data
            .first()
            .ok_or_else(|| ConduitError::ProtocolFormat("Empty message".to_string()))?;

        let msg = match MessageType::from_u8(tag) {
            Some(MessageType::Disconnect) => {
                let mut offset = 1;
                Message::Disconnect(Disconnect {
                    reason_code: read_u32(data, &mut offset)?,
                    description: read_string(data, &mut offset)?,
                    language_tag: read_string(data, &mut offset)?,
                })
            }
            Some(MessageType::Ignore) => {
                let mut offset = 1;
                Message::Ignore {
                    data: read_bytes(data, &mut offset)?,
                }
            }
            Some(MessageType::Unimplemented) => {
                let mut offset = 1;
                Message::Unimplemented {
                    sequence_number: read_u32(data, &mut offset)?,
                }
            }
            Some(MessageType::Debug) => {
                let mut offset = 1;
                Message::Debug {
                    always_display: read_bool(data, &mut offset)?,
                    message: read_string(data, &mut offset)?,
                    language: read_string(data, &mut offset)?,
                }
            }
            Some(MessageType::ServiceRequest) => {
                let mut offset = 1;
                Message::ServiceRequest {
                    service: read_string(data, &mut offset)?,
                }
            }
            Some(MessageType::ServiceAccept) => {
                let mut offset = 1;
                Message::ServiceAccept {
                    service: read_string(data, &mut offset)?,
                }
            }
            Some(MessageType::ExtInfo) => {
                let mut offset = 1;
                let count = read_u32(data, &mut offset)?;
                let mut extensions = Vec::new();
                for _ in 0..count {
                    let name = read_string(data, &mut offset)?;
                    let value = read_bytes(data, &mut offset)?;
                    extensions.push((name, value));
                }
                Message::ExtInfo(extensions)
            }
            Some(MessageType::KexInit) => Message::KexInit(KexInit::from_bytes(data)?),
            Some(MessageType::NewKeys) => Message::NewKeys,
            Some(MessageType::KexdhInit) => {
                let mut offset = 1;
                Message::KexDhInit {
                    e: read_bytes(data, &mut offset)?,
                }
            }
            Some(MessageType::KexdhReply) => {
                let mut offset = 1;
                Message::KexDhReply {
                    host_key: read_bytes(data, &mut offset)?,
                    f: read_bytes(data, &mut offset)?,
                    signature: read_bytes(data, &mut offset)?,
                }
            }
            Some(MessageType::UserauthRequest) => {
                Message::UserauthRequest(AuthRequest::from_bytes(data)?)
            }
            Some(MessageType::UserauthFailure) => {
                Message::UserauthFailure(AuthFailure::from_bytes(data)?)
            }
            Some(MessageType::UserauthSuccess) => Message::UserauthSuccess,
            Some(MessageType::UserauthBanner) => {
                Message::UserauthBanner(AuthBanner::from_bytes(data)?)
            }
            Some(MessageType::UserauthPkOk) => Message::UserauthMethodSpecific {
                message_type: tag,
                payload: data[1..].to_vec(),
            },
            Some(MessageType::GlobalRequest) => {
                Message::GlobalRequest(GlobalRequest::from_bytes(data)?)
            }
            Some(MessageType::RequestSuccess) => {
                let mut offset = 1;
                Message::RequestSuccess {
                    data: read_remaining(data, &mut offset),
                }
            }
            Some(MessageType::RequestFailure) => Message::RequestFailure,
            Some(MessageType::ChannelOpen) => Message::ChannelOpen(ChannelOpen::from_bytes(data)?),
            Some(MessageType::ChannelOpenConfirmation) => {
                Message::ChannelOpenConfirmation(ChannelOpenConfirmation::from_bytes(data)?)
            }
            Some(MessageType::ChannelOpenFailure) => {
                Message::ChannelOpenFailure(ChannelOpenFailure::from_bytes(data)?)
            }
            Some(MessageType::ChannelWindowAdjust) => {
                Message::ChannelWindowAdjust(ChannelWindowAdjust::from_bytes(data)?)
            }
            Some(MessageType::ChannelData) => Message::ChannelData(ChannelData::from_bytes(data)?),
            Some(MessageType::ChannelExtendedData) => {
                Message::ChannelExtendedData(ChannelExtendedData::from_bytes(data)?)
            }
            Some(MessageType::ChannelEof) => Message::ChannelEof(ChannelEof::from_bytes(data)?),
            Some(MessageType::ChannelClose) => {
                Message::ChannelClose(ChannelClose::from_bytes(data)?)
            }
            Some(MessageType::ChannelRequest) => {
                Message::ChannelRequest(ChannelRequest::from_bytes(data)?)
            }
            Some(MessageType::ChannelSuccess) => {
                Message::ChannelSuccess(ChannelSuccess::from_bytes(data)?)
            }
            Some(MessageType::ChannelFailure) => {
                Message::ChannelFailure(ChannelFailure::from_bytes(data)?)
            }
            None if (61..=79).contains(&tag) => Message::UserauthMethodSpecific {
                message_type: tag,
                payload: data[1..].to_vec(),
            },
            None => Message::Unsupported {
                message_type: tag,
                payload: data[1..].to_vec(),
            },
        };

        Ok(msg)
    }

    /// True for messages that may cross the wire while a key exchange is in
    /// progress (RFC 4253 Section 7.1).
    pub fn allowed_during_kex(&self) -> bool {
        matches!(
            self,
            Message::Disconnect(_)
                | Message::Ignore { .. }
                | Message::Unimplemented { .. }
                | Message::Debug { .. }
                | Message::KexInit(_)
                | Message::NewKeys
                | Message::KexDhInit { .. }
                | Message::KexDhReply { .. }
        )
    }
}
