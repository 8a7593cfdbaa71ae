//! SSH binary packet framing (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (MAC = Message Authentication Code)
//! ```
//!
//! # Constraints
//!
//! - `packet_length` does not include `mac` or the length field itself
//! - `padding_length` is between 4 and 255
//! - The padded frame is a multiple of the cipher block size (at least 8).
//!   With encrypt-then-MAC the length field is excluded from the alignment.
//! - Maximum packet size: 35000 bytes
//!
//! This module only deals with the plaintext frame; [`super::transport`]
//! applies ciphers and MACs around it.
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::packet::Packet;
//!
//! let packet = Packet::new(b"SSH-MSG-KEXINIT payload".to_vec(), 8, false).unwrap();
//! let bytes = packet.to_bytes();
//! let parsed = Packet::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.payload(), b"SSH-MSG-KEXINIT payload");
//! ```

use bytes::{BufMut, BytesMut};
use conduit_platform::{ConduitError, ConduitResult};
use rand::RngCore;

/// Maximum packet size in bytes (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum padding length in bytes (RFC 4253 Section 6).
pub const MIN_PADDING_LEN: usize = 4;

/// Maximum padding length in bytes (fits in u8).
pub const MAX_PADDING_LEN: usize = 255;

/// Smallest alignment used even when the cipher block is smaller.
pub const MIN_BLOCK_SIZE: usize = 8;

/// An unencrypted SSH packet: payload plus random padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    padding: Vec<u8>,
}

/// Padding needed so the frame aligns to `block_size`.
///
/// `length_excluded` is true for encrypt-then-MAC, where the 4-byte length
/// is sent in the clear and is not part of the aligned region.
pub fn padding_len(payload_len: usize, block_size: usize, length_excluded: bool) -> usize {
    let block_size = block_size.max(MIN_BLOCK_SIZE);
    let header = if length_excluded { 1 } else { 5 };
    let unpadded = header + payload_len;
    let mut padding = block_size - (unpadded % block_size);
    if padding < MIN_PADDING_LEN {
        padding += block_size;
    }
    padding
}

impl Packet {
    /// Creates a packet with random padding aligned to `block_size`.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::PacketTooLarge`] if the padded frame would
    /// exceed [`MAX_PACKET_SIZE`].
    pub fn new(payload: Vec<u8>, block_size: usize, length_excluded: bool) -> ConduitResult<Self> {
        let padding_len = padding_len(payload.len(), block_size, length_excluded);
        let packet_length = 1 + payload.len() + padding_len;
        if packet_length > MAX_PACKET_SIZE {
            return Err(ConduitError::PacketTooLarge {
                size: packet_length,
                max: MAX_PACKET_SIZE,
            });
        }

        let mut padding = vec![0u8; padding_len];
        rand::thread_rng().fill_bytes(&mut padding);

        Ok(Self { payload, padding })
    }

    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the padding.
    pub fn padding(&self) -> &[u8] {
        &self.padding
    }

    /// Consumes the packet, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Value of the `packet_length` field.
    pub fn packet_length(&self) -> usize {
        1 + self.payload.len() + self.padding.len()
    }

    /// Serializes to the plaintext frame (no MAC).
    pub fn to_bytes(&self) -> Vec<u8> {
        let packet_length = self.packet_length();
        let mut buf = BytesMut::with_capacity(4 + packet_length);
        buf.put_u32(packet_length as u32);
        buf.put_u8(self.padding.len() as u8);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.padding);
        buf.to_vec()
    }

    /// Parses a plaintext frame, length field included.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        if data.len() < 4 {
            return Err(ConduitError::ProtocolFormat(format!(
                "Packet too short: {} bytes (minimum 5)",
                data.len()
            )));
        }
        let packet_length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        check_packet_length(packet_length)?;

        let body = &data[4..];
        if body.len() < packet_length {
            return Err(ConduitError::ProtocolFormat(format!(
                "Incomplete packet: expected {} bytes, got {} bytes",
                packet_length,
                body.len()
            )));
        }
        Self::from_body(&body[..packet_length])
    }

    /// Parses the region after the length field: `padding_length || payload
    /// || padding`.
    pub fn from_body(body: &[u8]) -> ConduitResult<Self> {
        let (&padding_length, rest) = body
            .split_first()
            .ok_or_else(|| ConduitError::ProtocolFormat("Empty packet body".to_string()))?;
        let padding_length = padding_length as usize;

        if padding_length < MIN_PADDING_LEN {
            return Err(ConduitError::ProtocolFormat(format!(
                "Padding too short: {} bytes (minimum {})",
                padding_length, MIN_PADDING_LEN
            )));
        }

        if rest.len() < padding_length {
            return Err(ConduitError::ProtocolFormat(format!(
                "Invalid packet: body of {} bytes cannot hold {} bytes of padding",
                rest.len(),
                padding_length
            )));
        }

        let payload_length = rest.len() - padding_length;
        if payload_length == 0 {
            return Err(ConduitError::ProtocolFormat("Empty payload".to_string()));
        }

        Ok(Self {
            payload: rest[..payload_length].to_vec(),
            padding: rest[payload_length..].to_vec(),
        })
    }
}

/// Rejects a declared `packet_length` outside `5..=MAX_PACKET_SIZE`.
pub fn check_packet_length(packet_length: usize) -> ConduitResult<()> {
    if packet_length > MAX_PACKET_SIZE {
        return Err(ConduitError::PacketTooLarge {
            size: packet_length,
            max: MAX_PACKET_SIZE,
        });
    }
    if packet_length < 1 + MIN_PADDING_LEN {
        return Err(ConduitError::ProtocolFormat(format!(
            "Packet too small: {} bytes",
            packet_length
        )));
    }
    Ok(())
}
