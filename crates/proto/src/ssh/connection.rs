//! SSH connection protocol messages (RFC 4254).
//!
//! Channel-scoped and global-request message bodies. Each type encodes to a
//! full payload (message number included) with `to_bytes` and parses one with
//! `from_bytes`. Unknown channel types, request names, extended data codes and
//! open-failure reasons are preserved in `Other` variants rather than
//! rejected, so the session can answer them politely.
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::connection::{ChannelRequest, ChannelRequestType, TerminalModes};
//!
//! let pty = ChannelRequestType::PtyReq {
//!     term: "xterm-256color".to_string(),
//!     width_chars: 80,
//!     height_rows: 24,
//!     width_pixels: 0,
//!     height_pixels: 0,
//!     modes: TerminalModes::new().encode(),
//! };
//! let request = ChannelRequest::new(0, pty, true);
//! let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
//! assert_eq!(parsed, request);
//! ```

use bytes::{BufMut, BytesMut};
use conduit_platform::ConduitResult;

use super::message::MessageType;
use super::wire::{
    expect_message_type, read_bool, read_bytes, read_remaining, read_string, read_u32,
    read_u8, write_bool, write_bytes, write_string,
};

/// Channel type carried by SSH_MSG_CHANNEL_OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelType {
    /// Session channel (interactive shell, exec, subsystem).
    Session,
    /// Direct TCP/IP channel (local port forwarding).
    DirectTcpip {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Forwarded TCP/IP channel (remote port forwarding, opened by the server).
    ForwardedTcpip {
        /// Address that was connected
        connected_address: String,
        /// Port that was connected
        connected_port: u32,
        /// Originator IP address
        originator_address: String,
        /// Originator port
        originator_port: u32,
    },
    /// Any other channel type, with its type-specific data left raw.
    Other {
        /// Channel type name
        name: String,
        /// Type-specific data
        data: Vec<u8>,
    },
}

impl ChannelType {
    /// Returns the channel type name.
    pub fn name(&self) -> &str {
        match self {
            ChannelType::Session => "session",
            ChannelType::DirectTcpip { .. } => "direct-tcpip",
            ChannelType::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelType::Other { name, .. } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// Channel type and its type-specific data
    pub channel_type: ChannelType,
    /// Sender channel number
    pub sender_channel: u32,
    /// Initial window size
    pub initial_window_size: u32,
    /// Maximum packet size
    pub maximum_packet_size: u32,
}

impl ChannelOpen {
    /// Creates a new channel open message.
    pub fn new(
        channel_type: ChannelType,
        sender_channel: u32,
        initial_window_size: u32,
        maximum_packet_size: u32,
    ) -> Self {
        Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Serializes to bytes.
    ///
    /// ```text
    /// byte      SSH_MSG_CHANNEL_OPEN (90)
    /// string    channel type
    /// uint32    sender channel
    /// uint32    initial window size
    /// uint32    maximum packet size
    /// ....      channel type specific data
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpen as u8);
        write_string(&mut buf, self.channel_type.name());
        buf.put_u32(self.sender_channel);
        buf.put_u32(self.initial_window_size);
        buf.put_u32(self.maximum_packet_size);

        match &self.channel_type {
            ChannelType::Session => {}
            ChannelType::DirectTcpip {
                host,
                port,
                originator_address,
                originator_port,
            } => {
                write_string(&mut buf, host);
                buf.put_u32(*port);
                write_string(&mut buf, originator_address);
                buf.put_u32(*originator_port);
            }
            ChannelType::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                write_string(&mut buf, connected_address);
                buf.put_u32(*connected_port);
                write_string(&mut buf, originator_address);
                buf.put_u32(*originator_port);
            }
            ChannelType::Other { data, .. } => buf.put_slice(data),
        }

        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::ChannelOpen as u8, "CHANNEL_OPEN")?;

        let type_name = read_string(data, &mut offset)?;
        let sender_channel = read_u32(data, &mut offset)?;
        let initial_window_size = read_u32(data, &mut offset)?;
        let maximum_packet_size = read_u32(data, &mut offset)?;

        let channel_type = match type_name.as_str() {
            "session" => ChannelType::Session,
            "direct-tcpip" => ChannelType::DirectTcpip {
                host: read_string(data, &mut offset)?,
                port: read_u32(data, &mut offset)?,
                originator_address: read_string(data, &mut offset)?,
                originator_port: read_u32(data, &mut offset)?,
            },
            "forwarded-tcpip" => ChannelType::ForwardedTcpip {
                connected_address: read_string(data, &mut offset)?,
                connected_port: read_u32(data, &mut offset)?,
                originator_address: read_string(data, &mut offset)?,
                originator_port: read_u32(data, &mut offset)?,
            },
            _ => ChannelType::Other {
                name: type_name,
                data: read_remaining(data, &mut offset),
            },
        };

        Ok(Self {
            channel_type,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// Our channel number
    pub recipient_channel: u32,
    /// Peer's channel number
    pub sender_channel: u32,
    /// Peer's initial window size
    pub initial_window_size: u32,
    /// Peer's maximum packet size
    pub maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Creates a new confirmation.
    pub fn new(
        recipient_channel: u32,
        sender_channel: u32,
        initial_window_size: u32,
        maximum_packet_size: u32,
    ) -> Self {
        Self {
            recipient_channel,
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(17);
        buf.put_u8(MessageType::ChannelOpenConfirmation as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.sender_channel);
        buf.put_u32(self.initial_window_size);
        buf.put_u32(self.maximum_packet_size);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset = expect_message_type(
            data,
            MessageType::ChannelOpenConfirmation as u8,
            "CHANNEL_OPEN_CONFIRMATION",
        )?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            sender_channel: read_u32(data, &mut offset)?,
            initial_window_size: read_u32(data, &mut offset)?,
            maximum_packet_size: read_u32(data, &mut offset)?,
        })
    }
}

/// Channel open failure reason codes (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpenFailureReason {
    /// SSH_OPEN_ADMINISTRATIVELY_PROHIBITED (1)
    AdministrativelyProhibited,
    /// SSH_OPEN_CONNECT_FAILED (2)
    ConnectFailed,
    /// SSH_OPEN_UNKNOWN_CHANNEL_TYPE (3)
    UnknownChannelType,
    /// SSH_OPEN_RESOURCE_SHORTAGE (4)
    ResourceShortage,
    /// Any other code
    Other(u32),
}

impl ChannelOpenFailureReason {
    /// Maps a wire code to a reason.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::AdministrativelyProhibited,
            2 => Self::ConnectFailed,
            3 => Self::UnknownChannelType,
            4 => Self::ResourceShortage,
            other => Self::Other(other),
        }
    }

    /// Returns the wire code.
    pub fn code(&self) -> u32 {
        match self {
            Self::AdministrativelyProhibited => 1,
            Self::ConnectFailed => 2,
            Self::UnknownChannelType => 3,
            Self::ResourceShortage => 4,
            Self::Other(code) => *code,
        }
    }

    /// Returns a human readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "Administratively prohibited",
            Self::ConnectFailed => "Connect failed",
            Self::UnknownChannelType => "Unknown channel type",
            Self::ResourceShortage => "Resource shortage",
            Self::Other(_) => "Unknown reason",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE (RFC 4254 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// Our channel number
    pub recipient_channel: u32,
    /// Reason code
    pub reason: ChannelOpenFailureReason,
    /// Description
    pub description: String,
    /// Language tag
    pub language_tag: String,
}

impl ChannelOpenFailure {
    /// Creates a failure with the default description for `reason`.
    pub fn new(recipient_channel: u32, reason: ChannelOpenFailureReason) -> Self {
        Self {
            recipient_channel,
            reason,
            description: reason.as_str().to_string(),
            language_tag: String::new(),
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpenFailure as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.reason.code());
        write_string(&mut buf, &self.description);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset = expect_message_type(
            data,
            MessageType::ChannelOpenFailure as u8,
            "CHANNEL_OPEN_FAILURE",
        )?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            reason: ChannelOpenFailureReason::from_code(read_u32(data, &mut offset)?),
            description: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_WINDOW_ADJUST (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindowAdjust {
    /// Recipient channel number
    pub recipient_channel: u32,
    /// Bytes to add to the window
    pub bytes_to_add: u32,
}

impl ChannelWindowAdjust {
    /// Creates a new window adjust.
    pub fn new(recipient_channel: u32, bytes_to_add: u32) -> Self {
        Self {
            recipient_channel,
            bytes_to_add,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(9);
        buf.put_u8(MessageType::ChannelWindowAdjust as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.bytes_to_add);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset = expect_message_type(
            data,
            MessageType::ChannelWindowAdjust as u8,
            "CHANNEL_WINDOW_ADJUST",
        )?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            bytes_to_add: read_u32(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_CHANNEL_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Recipient channel number
    pub recipient_channel: u32,
    /// Data
    pub data: Vec<u8>,
}

impl ChannelData {
    /// Creates a new data message.
    pub fn new(recipient_channel: u32, data: Vec<u8>) -> Self {
        Self {
            recipient_channel,
            data,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(9 + self.data.len());
        buf.put_u8(MessageType::ChannelData as u8);
        buf.put_u32(self.recipient_channel);
        write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::ChannelData as u8, "CHANNEL_DATA")?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            data: read_bytes(data, &mut offset)?,
        })
    }
}

/// Extended data type codes (RFC 4254 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedDataType {
    /// SSH_EXTENDED_DATA_STDERR (1)
    Stderr,
    /// Any other code
    Other(u32),
}

impl ExtendedDataType {
    /// Maps a wire code to a data type.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Stderr,
            other => Self::Other(other),
        }
    }

    /// Returns the wire code.
    pub fn code(&self) -> u32 {
        match self {
            Self::Stderr => 1,
            Self::Other(code) => *code,
        }
    }
}

/// SSH_MSG_CHANNEL_EXTENDED_DATA (RFC 4254 Section 5.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    /// Recipient channel number
    pub recipient_channel: u32,
    /// Data type code
    pub data_type: ExtendedDataType,
    /// Data
    pub data: Vec<u8>,
}

impl ChannelExtendedData {
    /// Creates a new extended data message.
    pub fn new(recipient_channel: u32, data_type: ExtendedDataType, data: Vec<u8>) -> Self {
        Self {
            recipient_channel,
            data_type,
            data,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(13 + self.data.len());
        buf.put_u8(MessageType::ChannelExtendedData as u8);
        buf.put_u32(self.recipient_channel);
        buf.put_u32(self.data_type.code());
        write_bytes(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset = expect_message_type(
            data,
            MessageType::ChannelExtendedData as u8,
            "CHANNEL_EXTENDED_DATA",
        )?;
        Ok(Self {
            recipient_channel: read_u32(data, &mut offset)?,
            data_type: ExtendedDataType::from_code(read_u32(data, &mut offset)?),
            data: read_bytes(data, &mut offset)?,
        })
    }
}

macro_rules! recipient_only_message {
    ($(#[$doc:meta])* $name:ident, $msg:expr, $label:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            /// Recipient channel number
            pub recipient_channel: u32,
        }

        impl $name {
            /// Creates a new message.
            pub fn new(recipient_channel: u32) -> Self {
                Self { recipient_channel }
            }

            /// Serializes to bytes.
            pub fn to_bytes(&self) -> Vec<u8> {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u8($msg as u8);
                buf.put_u32(self.recipient_channel);
                buf.to_vec()
            }

            /// Parses from bytes.
            pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
                let mut offset = expect_message_type(data, $msg as u8, $label)?;
                Ok(Self {
                    recipient_channel: read_u32(data, &mut offset)?,
                })
            }
        }
    };
}

recipient_only_message!(
    /// SSH_MSG_CHANNEL_EOF (RFC 4254 Section 5.3).
    ChannelEof,
    MessageType::ChannelEof,
    "CHANNEL_EOF"
);

recipient_only_message!(
    /// SSH_MSG_CHANNEL_CLOSE (RFC 4254 Section 5.3).
    ChannelClose,
    MessageType::ChannelClose,
    "CHANNEL_CLOSE"
);

recipient_only_message!(
    /// SSH_MSG_CHANNEL_SUCCESS (RFC 4254 Section 5.4).
    ChannelSuccess,
    MessageType::ChannelSuccess,
    "CHANNEL_SUCCESS"
);

recipient_only_message!(
    /// SSH_MSG_CHANNEL_FAILURE (RFC 4254 Section 5.4).
    ChannelFailure,
    MessageType::ChannelFailure,
    "CHANNEL_FAILURE"
);

/// Terminal mode opcodes (RFC 4254 Section 8).
pub mod tty {
    /// End of modes
    pub const TTY_OP_END: u8 = 0;
    /// Interrupt character
    pub const VINTR: u8 = 1;
    /// Erase character
    pub const VERASE: u8 = 3;
    /// End-of-file character
    pub const VEOF: u8 = 5;
    /// Enable signals
    pub const ISIG: u8 = 50;
    /// Canonical input
    pub const ICANON: u8 = 51;
    /// Echo input
    pub const ECHO: u8 = 53;
    /// Map CR to NL on input
    pub const ICRNL: u8 = 36;
    /// Map NL to CR-NL on output
    pub const ONLCR: u8 = 72;
    /// Input baud rate
    pub const TTY_OP_ISPEED: u8 = 128;
    /// Output baud rate
    pub const TTY_OP_OSPEED: u8 = 129;
}

/// Builder for the encoded terminal modes string of a `pty-req`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalModes {
    modes: Vec<(u8, u32)>,
}

impl TerminalModes {
    /// Empty mode list (only `TTY_OP_END` is encoded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `opcode` to `value`, replacing an earlier setting.
    pub fn set(mut self, opcode: u8, value: u32) -> Self {
        if let Some(entry) = self.modes.iter_mut().find(|(op, _)| *op == opcode) {
            entry.1 = value;
        } else {
            self.modes.push((opcode, value));
        }
        self
    }

    /// Encodes as opcode/uint32 pairs terminated by `TTY_OP_END`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.modes.len() * 5 + 1);
        for (opcode, value) in &self.modes {
            buf.put_u8(*opcode);
            buf.put_u32(*value);
        }
        buf.put_u8(tty::TTY_OP_END);
        buf.to_vec()
    }

    /// Decodes an encoded mode string. Parsing stops at `TTY_OP_END` or at
    /// the first opcode of 160 or above, whose argument format is undefined.
    pub fn decode(data: &[u8]) -> ConduitResult<Self> {
        let mut modes = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let opcode = read_u8(data, &mut offset)?;
            if opcode == tty::TTY_OP_END || opcode >= 160 {
                break;
            }
            modes.push((opcode, read_u32(data, &mut offset)?));
        }
        Ok(Self { modes })
    }

    /// Returns the value set for `opcode`.
    pub fn get(&self, opcode: u8) -> Option<u32> {
        self.modes
            .iter()
            .find(|(op, _)| *op == opcode)
            .map(|(_, v)| *v)
    }
}

/// Channel request type (RFC 4254 Section 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// Pseudo-terminal allocation
    PtyReq {
        /// Terminal type (TERM value)
        term: String,
        /// Width in characters
        width_chars: u32,
        /// Height in rows
        height_rows: u32,
        /// Width in pixels
        width_pixels: u32,
        /// Height in pixels
        height_pixels: u32,
        /// Encoded terminal modes, see [`TerminalModes`]
        modes: Vec<u8>,
    },
    /// Start the user's shell
    Shell,
    /// Execute a command
    Exec {
        /// Command line
        command: String,
    },
    /// Set an environment variable
    Env {
        /// Variable name
        name: String,
        /// Variable value
        value: String,
    },
    /// Terminal dimensions changed
    WindowChange {
        /// Width in characters
        width_chars: u32,
        /// Height in rows
        height_rows: u32,
        /// Width in pixels
        width_pixels: u32,
        /// Height in pixels
        height_pixels: u32,
    },
    /// Start a subsystem (e.g. "sftp")
    Subsystem {
        /// Subsystem name
        name: String,
    },
    /// Deliver a signal to the remote process
    Signal {
        /// Signal name without the "SIG" prefix
        name: String,
    },
    /// Remote process exit status
    ExitStatus {
        /// Exit code
        exit_status: u32,
    },
    /// Remote process terminated by a signal
    ExitSignal {
        /// Signal name without the "SIG" prefix
        signal_name: String,
        /// Core dumped flag
        core_dumped: bool,
        /// Error message
        error_message: String,
        /// Language tag
        language_tag: String,
    },
    /// OpenSSH liveness probe
    Keepalive,
    /// Request we do not model; data is kept raw
    Other {
        /// Request name
        name: String,
        /// Request-specific data
        data: Vec<u8>,
    },
}

impl ChannelRequestType {
    /// Returns the request name.
    pub fn name(&self) -> &str {
        match self {
            ChannelRequestType::PtyReq { .. } => "pty-req",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::Exec { .. } => "exec",
            ChannelRequestType::Env { .. } => "env",
            ChannelRequestType::WindowChange { .. } => "window-change",
            ChannelRequestType::Subsystem { .. } => "subsystem",
            ChannelRequestType::Signal { .. } => "signal",
            ChannelRequestType::ExitStatus { .. } => "exit-status",
            ChannelRequestType::ExitSignal { .. } => "exit-signal",
            ChannelRequestType::Keepalive => "keepalive@openssh.com",
            ChannelRequestType::Other { name, .. } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_REQUEST (RFC 4254 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Recipient channel number
    pub recipient_channel: u32,
    /// Request type and data
    pub request_type: ChannelRequestType,
    /// Whether the sender wants SUCCESS/FAILURE
    pub want_reply: bool,
}

impl ChannelRequest {
    /// Creates a new channel request.
    pub fn new(recipient_channel: u32, request_type: ChannelRequestType, want_reply: bool) -> Self {
        Self {
            recipient_channel,
            request_type,
            want_reply,
        }
    }

    /// Serializes to bytes.
    ///
    /// A `pty-req` body is written as `term, cols, rows, px width,
    /// px height, modes`, each field exactly once.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelRequest as u8);
        buf.put_u32(self.recipient_channel);
        write_string(&mut buf, self.request_type.name());
        write_bool(&mut buf, self.want_reply);

        match &self.request_type {
            ChannelRequestType::PtyReq {
                term,
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
                modes,
            } => {
                write_string(&mut buf, term);
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
                write_bytes(&mut buf, modes);
            }
            ChannelRequestType::Shell | ChannelRequestType::Keepalive => {}
            ChannelRequestType::Exec { command } => write_string(&mut buf, command),
            ChannelRequestType::Env { name, value } => {
                write_string(&mut buf, name);
                write_string(&mut buf, value);
            }
            ChannelRequestType::WindowChange {
                width_chars,
                height_rows,
                width_pixels,
                height_pixels,
            } => {
                buf.put_u32(*width_chars);
                buf.put_u32(*height_rows);
                buf.put_u32(*width_pixels);
                buf.put_u32(*height_pixels);
            }
            ChannelRequestType::Subsystem { name } => write_string(&mut buf, name),
            ChannelRequestType::Signal { name } => write_string(&mut buf, name),
            ChannelRequestType::ExitStatus { exit_status } => buf.put_u32(*exit_status),
            ChannelRequestType::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                language_tag,
            } => {
                write_string(&mut buf, signal_name);
                write_bool(&mut buf, *core_dumped);
                write_string(&mut buf, error_message);
                write_string(&mut buf, language_tag);
            }
            ChannelRequestType::Other { data, .. } => buf.put_slice(data),
        }

        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::ChannelRequest as u8, "CHANNEL_REQUEST")?;

        let recipient_channel = read_u32(data, &mut offset)?;
        let request_name = read_string(data, &mut offset)?;
        let want_reply = read_bool(data, &mut offset)?;

        let request_type = match request_name.as_str() {
            "pty-req" => ChannelRequestType::PtyReq {
                term: read_string(data, &mut offset)?,
                width_chars: read_u32(data, &mut offset)?,
                height_rows: read_u32(data, &mut offset)?,
                width_pixels: read_u32(data, &mut offset)?,
                height_pixels: read_u32(data, &mut offset)?,
                modes: read_bytes(data, &mut offset)?,
            },
            "shell" => ChannelRequestType::Shell,
            "exec" => ChannelRequestType::Exec {
                command: read_string(data, &mut offset)?,
            },
            "env" => ChannelRequestType::Env {
                name: read_string(data, &mut offset)?,
                value: read_string(data, &mut offset)?,
            },
            "window-change" => ChannelRequestType::WindowChange {
                width_chars: read_u32(data, &mut offset)?,
                height_rows: read_u32(data, &mut offset)?,
                width_pixels: read_u32(data, &mut offset)?,
                height_pixels: read_u32(data, &mut offset)?,
            },
            "subsystem" => ChannelRequestType::Subsystem {
                name: read_string(data, &mut offset)?,
            },
            "signal" => ChannelRequestType::Signal {
                name: read_string(data, &mut offset)?,
            },
            "exit-status" => ChannelRequestType::ExitStatus {
                exit_status: read_u32(data, &mut offset)?,
            },
            "exit-signal" => ChannelRequestType::ExitSignal {
                signal_name: read_string(data, &mut offset)?,
                core_dumped: read_bool(data, &mut offset)?,
                error_message: read_string(data, &mut offset)?,
                language_tag: read_string(data, &mut offset)?,
            },
            "keepalive@openssh.com" => ChannelRequestType::Keepalive,
            _ => ChannelRequestType::Other {
                name: request_name,
                data: read_remaining(data, &mut offset),
            },
        };

        Ok(Self {
            recipient_channel,
            request_type,
            want_reply,
        })
    }
}

/// SSH_MSG_GLOBAL_REQUEST (RFC 4254 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    /// Request name
    pub name: String,
    /// Whether the sender wants REQUEST_SUCCESS/FAILURE
    pub want_reply: bool,
    /// Request-specific data
    pub data: Vec<u8>,
}

impl GlobalRequest {
    /// Creates a new global request.
    pub fn new(name: impl Into<String>, want_reply: bool, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            want_reply,
            data,
        }
    }

    /// `tcpip-forward` request asking the server to listen on `address:port`.
    pub fn tcpip_forward(address: &str, port: u32) -> Self {
        Self::new("tcpip-forward", true, Self::address_port(address, port))
    }

    /// `cancel-tcpip-forward` request.
    pub fn cancel_tcpip_forward(address: &str, port: u32) -> Self {
        Self::new("cancel-tcpip-forward", true, Self::address_port(address, port))
    }

    fn address_port(address: &str, port: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_string(&mut buf, address);
        buf.put_u32(port);
        buf.to_vec()
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::GlobalRequest as u8);
        write_string(&mut buf, &self.name);
        write_bool(&mut buf, self.want_reply);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::GlobalRequest as u8, "GLOBAL_REQUEST")?;
        Ok(Self {
            name: read_string(data, &mut offset)?,
            want_reply: read_bool(data, &mut offset)?,
            data: read_remaining(data, &mut offset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_platform::ConduitError;

    #[test]
    fn test_channel_open_session() {
        let open = ChannelOpen::new(ChannelType::Session, 0, 1048576, 32768);
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed, open);
        assert_eq!(parsed.channel_type.name(), "session");
    }

    #[test]
    fn test_channel_open_direct_tcpip() {
        let open = ChannelOpen::new(
            ChannelType::DirectTcpip {
                host: "example.com".to_string(),
                port: 80,
                originator_address: "192.168.1.1".to_string(),
                originator_port: 12345,
            },
            1,
            1048576,
            32768,
        );

        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        match parsed.channel_type {
            ChannelType::DirectTcpip { host, port, .. } => {
                assert_eq!(host, "example.com");
                assert_eq!(port, 80);
            }
            other => panic!("Expected DirectTcpip, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_open_unknown_type_kept() {
        let open = ChannelOpen::new(
            ChannelType::Other {
                name: "x11".to_string(),
                data: vec![0, 0, 0, 1, b'a', 0, 0, 0, 7],
            },
            4,
            1024,
            512,
        );
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed, open);
    }

    #[test]
    fn test_open_failure_reason_codes() {
        for code in 1..=4 {
            assert_eq!(ChannelOpenFailureReason::from_code(code).code(), code);
        }
        assert_eq!(
            ChannelOpenFailureReason::from_code(42),
            ChannelOpenFailureReason::Other(42)
        );

        let failure = ChannelOpenFailure::new(3, ChannelOpenFailureReason::ConnectFailed);
        let parsed = ChannelOpenFailure::from_bytes(&failure.to_bytes()).unwrap();
        assert_eq!(parsed.reason, ChannelOpenFailureReason::ConnectFailed);
        assert_eq!(parsed.description, "Connect failed");
    }

    #[test]
    fn test_extended_data_unknown_code() {
        let msg = ChannelExtendedData::new(2, ExtendedDataType::Other(9), b"x".to_vec());
        let parsed = ChannelExtendedData::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.data_type, ExtendedDataType::Other(9));
    }

    #[test]
    fn test_pty_req_field_layout() {
        let modes = TerminalModes::new().set(tty::ECHO, 0).encode();
        let request = ChannelRequest::new(
            7,
            ChannelRequestType::PtyReq {
                term: "vt100".to_string(),
                width_chars: 80,
                height_rows: 24,
                width_pixels: 640,
                height_pixels: 480,
                modes: modes.clone(),
            },
            true,
        );
        let bytes = request.to_bytes();

        // type, channel, "pty-req", want_reply
        let mut offset = 1 + 4 + 4 + 7 + 1;
        assert_eq!(read_string(&bytes, &mut offset).unwrap(), "vt100");
        assert_eq!(read_u32(&bytes, &mut offset).unwrap(), 80);
        assert_eq!(read_u32(&bytes, &mut offset).unwrap(), 24);
        assert_eq!(read_u32(&bytes, &mut offset).unwrap(), 640);
        assert_eq!(read_u32(&bytes, &mut offset).unwrap(), 480);
        assert_eq!(read_bytes(&bytes, &mut offset).unwrap(), modes);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn test_request_types_roundtrip() {
        let types = vec![
            ChannelRequestType::Shell,
            ChannelRequestType::Exec {
                command: "ls -la".to_string(),
            },
            ChannelRequestType::Env {
                name: "LANG".to_string(),
                value: "C".to_string(),
            },
            ChannelRequestType::WindowChange {
                width_chars: 132,
                height_rows: 43,
                width_pixels: 0,
                height_pixels: 0,
            },
            ChannelRequestType::Subsystem {
                name: "sftp".to_string(),
            },
            ChannelRequestType::Signal {
                name: "INT".to_string(),
            },
            ChannelRequestType::ExitStatus { exit_status: 2 },
            ChannelRequestType::ExitSignal {
                signal_name: "KILL".to_string(),
                core_dumped: true,
                error_message: "killed".to_string(),
                language_tag: String::new(),
            },
            ChannelRequestType::Keepalive,
            ChannelRequestType::Other {
                name: "auth-agent-req@openssh.com".to_string(),
                data: vec![],
            },
        ];

        for request_type in types {
            let request = ChannelRequest::new(1, request_type, false);
            let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
            assert_eq!(parsed, request);
        }
    }

    #[test]
    fn test_truncated_request_is_protocol_error() {
        let request = ChannelRequest::new(
            0,
            ChannelRequestType::Exec {
                command: "uptime".to_string(),
            },
            true,
        );
        let bytes = request.to_bytes();
        for len in 0..bytes.len() {
            assert!(matches!(
                ChannelRequest::from_bytes(&bytes[..len]),
                Err(ConduitError::ProtocolFormat(_))
            ));
        }
    }

    #[test]
    fn test_terminal_modes() {
        let modes = TerminalModes::new()
            .set(tty::ECHO, 1)
            .set(tty::TTY_OP_ISPEED, 38400)
            .set(tty::ECHO, 0);
        let encoded = modes.encode();
        assert_eq!(encoded.len(), 2 * 5 + 1);
        assert_eq!(*encoded.last().unwrap(), tty::TTY_OP_END);

        let decoded = TerminalModes::decode(&encoded).unwrap();
        assert_eq!(decoded.get(tty::ECHO), Some(0));
        assert_eq!(decoded.get(tty::TTY_OP_ISPEED), Some(38400));
        assert_eq!(decoded.get(tty::ICANON), None);
    }

    #[test]
    fn test_global_request_tcpip_forward() {
        let request = GlobalRequest::tcpip_forward("0.0.0.0", 8080);
        let parsed = GlobalRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.name, "tcpip-forward");
        assert!(parsed.want_reply);

        let mut offset = 0;
        assert_eq!(read_string(&parsed.data, &mut offset).unwrap(), "0.0.0.0");
        assert_eq!(read_u32(&parsed.data, &mut offset).unwrap(), 8080);
    }

    #[test]
    fn test_wrong_message_type() {
        let eof = ChannelEof::new(1).to_bytes();
        assert!(ChannelClose::from_bytes(&eof).is_err());
        assert_eq!(ChannelEof::from_bytes(&eof).unwrap().recipient_channel, 1);
    }
}
