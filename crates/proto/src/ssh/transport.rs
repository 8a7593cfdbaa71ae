//! SSH packet transport (RFC 4253 Sections 6 and 9).
//!
//! [`PacketWriter`] seals payloads into encrypted, authenticated frames and
//! writes them; [`PacketReader`] reads frames back, checks the MAC and strips
//! padding. Each direction has its own keys and its own sequence number. The
//! session swaps outbound keys while holding the writer lock and inbound keys
//! from the receive loop, so a swap affects exactly the next packet in that
//! direction.
//!
//! Sequence numbers start at zero, wrap modulo 2^32 and are never reset,
//! including across re-keys (RFC 4253 Section 6.4).
//!
//! # Rekeying
//!
//! [`RekeyTracker`] counts bytes in both directions and elapsed time since
//! the last exchange and reports when [`RekeyPolicy`] asks for a new one.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use conduit_platform::{ConduitError, ConduitResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::crypto::{NoneCipher, PacketCipher, PacketMac};
use super::packet::{check_packet_length, Packet, MIN_BLOCK_SIZE};

/// Keyed transforms for one direction.
pub struct DirectionKeys {
    /// Cipher (or [`NoneCipher`] before the first NEWKEYS)
    pub cipher: Box<dyn PacketCipher>,
    /// MAC, absent before the first NEWKEYS
    pub mac: Option<Box<dyn PacketMac>>,
}

impl DirectionKeys {
    /// The initial, unprotected state.
    pub fn none() -> Self {
        Self {
            cipher: Box::new(NoneCipher),
            mac: None,
        }
    }

    fn block_size(&self) -> usize {
        self.cipher.block_size().max(MIN_BLOCK_SIZE)
    }

    fn mac_size(&self) -> usize {
        self.mac.as_ref().map_or(0, |m| m.size())
    }

    fn is_etm(&self) -> bool {
        self.mac.as_ref().is_some_and(|m| m.is_etm())
    }
}

impl std::fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionKeys")
            .field("cipher", &self.cipher.name())
            .field("mac", &self.mac.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

/// Byte and time thresholds that trigger a re-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyPolicy {
    /// Bytes (both directions) after which to re-key
    pub bytes_limit: u64,
    /// Time after which to re-key
    pub time_limit: Duration,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            bytes_limit: 1 << 30,
            time_limit: Duration::from_secs(3600),
        }
    }
}

/// Tracks traffic since the last key exchange.
#[derive(Debug, Clone)]
pub struct RekeyTracker {
    policy: RekeyPolicy,
    bytes: u64,
    since: Instant,
}

impl RekeyTracker {
    /// Starts tracking now.
    pub fn new(policy: RekeyPolicy) -> Self {
        Self {
            policy,
            bytes: 0,
            since: Instant::now(),
        }
    }

    /// Adds transferred bytes.
    pub fn record(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_add(bytes as u64);
    }

    /// Bytes since the last reset.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Whether either threshold has been crossed.
    pub fn needs_rekey(&self) -> bool {
        self.bytes >= self.policy.bytes_limit || self.since.elapsed() >= self.policy.time_limit
    }

    /// Restarts counting after a completed exchange.
    pub fn reset(&mut self) {
        self.bytes = 0;
        self.since = Instant::now();
    }
}

/// Outbound half of the transport.
pub struct PacketWriter<W> {
    writer: W,
    keys: DirectionKeys,
    sequence: u32,
}

impl<W> PacketWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a writer with no keys installed.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            keys: DirectionKeys::none(),
            sequence: 0,
        }
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Installs new outbound keys. The next sealed packet uses them.
    pub fn set_keys(&mut self, keys: DirectionKeys) {
        trace!(keys = ?keys, "outbound keys activated");
        self.keys = keys;
    }

    /// Frames, MACs and encrypts `payload`, then advances the sequence.
    pub fn seal(&mut self, payload: &[u8]) -> ConduitResult<Vec<u8>> {
        let etm = self.keys.is_etm();
        let packet = Packet::new(payload.to_vec(), self.keys.block_size(), etm)?;
        let mut frame = packet.to_bytes();

        let sequence = self.sequence;
        let tag = if etm {
            self.keys.cipher.encrypt(&mut frame[4..])?;
            self.keys.mac.as_ref().map(|mac| mac.compute(sequence, &frame))
        } else {
            let tag = self.keys.mac.as_ref().map(|mac| mac.compute(sequence, &frame));
            self.keys.cipher.encrypt(&mut frame)?;
            tag
        };

        if let Some(tag) = tag {
            frame.extend_from_slice(&tag);
        }

        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    /// Seals and writes one payload. Returns the number of bytes written.
    pub async fn write_payload(&mut self, payload: &[u8]) -> ConduitResult<usize> {
        let sequence = self.sequence;
        let frame = self.seal(payload)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        trace!(seq = sequence, len = frame.len(), msg = payload.first().copied(), "packet sent");
        Ok(frame.len())
    }

    /// The underlying writer. Bytes written here bypass framing and do not
    /// advance the sequence number.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Shuts the write half down.
    pub async fn shutdown(&mut self) -> ConduitResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A payload read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Decrypted payload
    pub payload: Vec<u8>,
    /// Sequence number the packet arrived with
    pub sequence: u32,
    /// Bytes consumed from the stream
    pub wire_len: usize,
}

/// Inbound half of the transport.
pub struct PacketReader<R> {
    reader: R,
    keys: DirectionKeys,
    sequence: u32,
}

impl<R> PacketReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wraps a reader with no keys installed.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            keys: DirectionKeys::none(),
            sequence: 0,
        }
    }

    /// Sequence number the next packet is expected to carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Installs new inbound keys. The next packet read uses them.
    pub fn set_keys(&mut self, keys: DirectionKeys) {
        trace!(keys = ?keys, "inbound keys activated");
        self.keys = keys;
    }

    /// Reads, authenticates and decrypts one packet.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::PacketTooLarge`] if the declared length exceeds
    ///   the maximum
    /// - [`ConduitError::MacVerificationFailed`] if the MAC does not match
    /// - [`ConduitError::ProtocolFormat`] for bad alignment or padding
    /// - [`ConduitError::Io`] if the stream fails or ends
    pub async fn read_packet(&mut self) -> ConduitResult<InboundPacket> {
        let (body, wire_len) = if self.keys.is_etm() {
            self.read_etm().await?
        } else {
            self.read_classic().await?
        };

        let packet = Packet::from_body(&body)?;
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        trace!(seq = sequence, len = wire_len, msg = packet.payload().first().copied(), "packet received");

        Ok(InboundPacket {
            payload: packet.into_payload(),
            sequence,
            wire_len,
        })
    }

    async fn read_etm(&mut self) -> ConduitResult<(Vec<u8>, usize)> {
        let block_size = self.keys.block_size();
        let mac_size = self.keys.mac_size();

        let mut len_bytes = [0u8; 4];
        self.reader.read_exact(&mut len_bytes).await?;
        let packet_length = u32::from_be_bytes(len_bytes) as usize;
        check_packet_length(packet_length)?;
        if packet_length % block_size != 0 {
            return Err(ConduitError::ProtocolFormat(format!(
                "Packet length {} not a multiple of block size {}",
                packet_length, block_size
            )));
        }

        let mut rest = vec![0u8; packet_length + mac_size];
        self.reader.read_exact(&mut rest).await?;
        let (ciphertext, tag) = rest.split_at(packet_length);

        let mut authenticated = BytesMut::with_capacity(4 + packet_length);
        authenticated.put_slice(&len_bytes);
        authenticated.put_slice(ciphertext);

        // Verified before anything is decrypted.
        if let Some(mac) = &self.keys.mac {
            if !mac.verify(self.sequence, &authenticated, tag) {
                return Err(ConduitError::MacVerificationFailed);
            }
        }

        let mut body = ciphertext.to_vec();
        self.keys.cipher.decrypt(&mut body)?;
        Ok((body, 4 + packet_length + mac_size))
    }

    async fn read_classic(&mut self) -> ConduitResult<(Vec<u8>, usize)> {
        let block_size = self.keys.block_size();
        let mac_size = self.keys.mac_size();

        let mut frame = vec![0u8; block_size];
        self.reader.read_exact(&mut frame).await?;
        self.keys.cipher.decrypt(&mut frame)?;

        let packet_length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        check_packet_length(packet_length)?;
        if (4 + packet_length) % block_size != 0 {
            return Err(ConduitError::ProtocolFormat(format!(
                "Packet length {} not aligned to block size {}",
                packet_length, block_size
            )));
        }

        let remaining = 4 + packet_length - block_size;
        let mut rest = vec![0u8; remaining + mac_size];
        self.reader.read_exact(&mut rest).await?;
        let (ciphertext, tag) = rest.split_at_mut(remaining);
        self.keys.cipher.decrypt(ciphertext)?;
        frame.extend_from_slice(ciphertext);

        // Checked before the payload is parsed.
        if let Some(mac) = &self.keys.mac {
            if !mac.verify(self.sequence, &frame, tag) {
                return Err(ConduitError::MacVerificationFailed);
            }
        }

        Ok((frame.split_off(4), 4 + packet_length + mac_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::crypto::{CipherAlgorithm, MacAlgorithm};

    fn keys(cipher: CipherAlgorithm, mac: MacAlgorithm, seed: u8) -> DirectionKeys {
        DirectionKeys {
            cipher: cipher
                .create(&vec![seed; cipher.key_size()], &vec![seed ^ 0x5a; cipher.iv_size()])
                .unwrap(),
            mac: Some(mac.create(&vec![seed ^ 0xa5; mac.key_size()]).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_plaintext_round_trip() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.write_payload(b"\x05hello").await.unwrap();
        writer.write_payload(b"\x06world").await.unwrap();
        assert_eq!(writer.sequence(), 2);

        let mut reader = PacketReader::new(std::io::Cursor::new(writer.writer));
        let first = reader.read_packet().await.unwrap();
        assert_eq!(first.payload, b"\x05hello");
        assert_eq!(first.sequence, 0);
        let second = reader.read_packet().await.unwrap();
        assert_eq!(second.payload, b"\x06world");
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn test_encrypted_round_trip_all_macs() {
        for cipher in CipherAlgorithm::DEFAULT_PREFERENCE {
            for mac in MacAlgorithm::DEFAULT_PREFERENCE {
                let mut writer = PacketWriter::new(Vec::new());
                writer.set_keys(keys(cipher, mac, 1));
                for i in 0..3u8 {
                    writer.write_payload(&[94, i, i, i]).await.unwrap();
                }

                let mut reader = PacketReader::new(std::io::Cursor::new(writer.writer));
                reader.set_keys(keys(cipher, mac, 1));
                for i in 0..3u8 {
                    let packet = reader.read_packet().await.unwrap();
                    assert_eq!(packet.payload, vec![94, i, i, i], "{:?}/{:?}", cipher, mac);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_tampered_packet_rejected() {
        for mac in [MacAlgorithm::HmacSha256, MacAlgorithm::HmacSha256Etm] {
            let mut writer = PacketWriter::new(Vec::new());
            writer.set_keys(keys(CipherAlgorithm::Aes128Ctr, mac, 2));
            writer.write_payload(b"\x5esecret").await.unwrap();

            let mut wire = writer.writer;
            wire[9] ^= 0x01;

            let mut reader = PacketReader::new(std::io::Cursor::new(wire));
            reader.set_keys(keys(CipherAlgorithm::Aes128Ctr, mac, 2));
            assert!(matches!(
                reader.read_packet().await,
                Err(ConduitError::MacVerificationFailed)
            ));
        }
    }

    #[tokio::test]
    async fn test_wrong_sequence_rejected() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.set_keys(keys(CipherAlgorithm::Aes256Ctr, MacAlgorithm::HmacSha512, 3));
        writer.write_payload(b"\x02first").await.unwrap();
        let skipped = writer.writer.len();
        writer.write_payload(b"\x02second").await.unwrap();

        // Drop the first frame: the reader's sequence no longer matches and
        // its keystream is out of step.
        let wire = writer.writer[skipped..].to_vec();
        let mut reader = PacketReader::new(std::io::Cursor::new(wire));
        reader.set_keys(keys(CipherAlgorithm::Aes256Ctr, MacAlgorithm::HmacSha512, 3));
        assert!(reader.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut wire = 40_000u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0u8; 12]);
        let mut reader = PacketReader::new(std::io::Cursor::new(wire));
        assert!(matches!(
            reader.read_packet().await,
            Err(ConduitError::PacketTooLarge { size: 40_000, .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_io_error() {
        let mut reader = PacketReader::new(std::io::Cursor::new(vec![0u8, 0, 0]));
        assert!(matches!(reader.read_packet().await, Err(ConduitError::Io(_))));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut writer = PacketWriter::new(tokio::io::sink());
        writer.sequence = u32::MAX;
        writer.seal(b"\x02").unwrap();
        assert_eq!(writer.sequence(), 0);
    }

    #[test]
    fn test_rekey_tracker_bytes() {
        let mut tracker = RekeyTracker::new(RekeyPolicy {
            bytes_limit: 100,
            time_limit: Duration::from_secs(3600),
        });
        tracker.record(60);
        assert!(!tracker.needs_rekey());
        tracker.record(40);
        assert!(tracker.needs_rekey());
        tracker.reset();
        assert_eq!(tracker.bytes(), 0);
        assert!(!tracker.needs_rekey());
    }

    #[test]
    fn test_rekey_tracker_time() {
        let tracker = RekeyTracker::new(RekeyPolicy {
            bytes_limit: u64::MAX,
            time_limit: Duration::ZERO,
        });
        assert!(tracker.needs_rekey());
    }
}
