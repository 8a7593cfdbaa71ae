//! SSH key exchange (KEX) implementation (RFC 4253 Section 7).
//!
//! This module implements:
//! - SSH_MSG_KEXINIT encoding and parsing
//! - The [`KexMachine`] state machine
//! - [`KeyExchange`], one client-side exchange from KEXINIT to derived keys
//!
//! # Key Exchange Flow
//!
//! ```text
//! Idle -> Initiated -> AwaitingReply -> Verifying -> Complete -> Idle
//! ```
//!
//! 1. Client sends SSH_MSG_KEXINIT (Initiated)
//! 2. Server KEXINIT arrives; algorithms are negotiated and the ephemeral
//!    public value is sent (AwaitingReply)
//! 3. KEXDH_REPLY arrives; the exchange hash is computed and the host key
//!    signature checked (Verifying)
//! 4. Keys are derived and NEWKEYS is sent (Complete)
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::crypto::Algorithms;
//! use conduit_proto::ssh::kex::KexInit;
//!
//! let kexinit = KexInit::from_algorithms(&Algorithms::default());
//! assert!(kexinit.kex_algorithms().contains(&"curve25519-sha256".to_string()));
//! assert_eq!(kexinit.to_bytes()[0], 20);
//! ```

use bytes::{BufMut, BytesMut};
use conduit_platform::{ConduitError, ConduitResult};
use rand::RngCore;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::crypto::Algorithms;
use super::hostkey::{HostKeyAlgorithm, HostKeyInfo, HostPublicKey};
use super::kex_dh::{
    compute_exchange_hash, derive_key, ExchangeHashInput, KexAlgorithm, KexExchange, KexHash,
};
use super::message::{Message, MessageType};
use super::negotiate::NegotiatedAlgorithms;
use super::transport::DirectionKeys;
use super::wire::{expect_message_type, read_bool, read_name_list, read_u32, write_name_list};

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
///
/// Each algorithm list is ordered by preference (most preferred first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie (16 bytes)
    cookie: [u8; 16],
    /// Key exchange algorithms
    kex_algorithms: Vec<String>,
    /// Server host key algorithms
    server_host_key_algorithms: Vec<String>,
    /// Encryption algorithms client to server
    encryption_algorithms_client_to_server: Vec<String>,
    /// Encryption algorithms server to client
    encryption_algorithms_server_to_client: Vec<String>,
    /// MAC algorithms client to server
    mac_algorithms_client_to_server: Vec<String>,
    /// MAC algorithms server to client
    mac_algorithms_server_to_client: Vec<String>,
    /// Compression algorithms client to server
    compression_algorithms_client_to_server: Vec<String>,
    /// Compression algorithms server to client
    compression_algorithms_server_to_client: Vec<String>,
    /// Languages client to server (usually empty)
    languages_client_to_server: Vec<String>,
    /// Languages server to client (usually empty)
    languages_server_to_client: Vec<String>,
    /// First KEX packet follows
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Builds a KEXINIT offering everything in the capability table, with a
    /// fresh random cookie.
    pub fn from_algorithms(algorithms: &Algorithms) -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let ciphers = algorithms.cipher_names();
        let macs = algorithms.mac_names();

        Self {
            cookie,
            kex_algorithms: algorithms.kex().to_vec(),
            server_host_key_algorithms: algorithms.host_key().to_vec(),
            encryption_algorithms_client_to_server: ciphers.clone(),
            encryption_algorithms_server_to_client: ciphers,
            mac_algorithms_client_to_server: macs.clone(),
            mac_algorithms_server_to_client: macs,
            compression_algorithms_client_to_server: algorithms.compression().to_vec(),
            compression_algorithms_server_to_client: algorithms.compression().to_vec(),
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Returns the key exchange algorithms.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the server host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns the client-to-server encryption algorithms.
    pub fn encryption_algorithms_client_to_server(&self) -> &[String] {
        &self.encryption_algorithms_client_to_server
    }

    /// Returns the server-to-client encryption algorithms.
    pub fn encryption_algorithms_server_to_client(&self) -> &[String] {
        &self.encryption_algorithms_server_to_client
    }

    /// Returns the client-to-server MAC algorithms.
    pub fn mac_algorithms_client_to_server(&self) -> &[String] {
        &self.mac_algorithms_client_to_server
    }

    /// Returns the server-to-client MAC algorithms.
    pub fn mac_algorithms_server_to_client(&self) -> &[String] {
        &self.mac_algorithms_server_to_client
    }

    /// Returns the client-to-server compression algorithms.
    pub fn compression_algorithms_client_to_server(&self) -> &[String] {
        &self.compression_algorithms_client_to_server
    }

    /// Returns the server-to-client compression algorithms.
    pub fn compression_algorithms_server_to_client(&self) -> &[String] {
        &self.compression_algorithms_server_to_client
    }

    /// Returns the first_kex_packet_follows flag.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Serializes the KEXINIT message to bytes.
    ///
    /// # Format
    ///
    /// ```text
    /// byte         SSH_MSG_KEXINIT (20)
    /// byte[16]     cookie (random bytes)
    /// name-list    kex_algorithms
    /// name-list    server_host_key_algorithms
    /// name-list    encryption_algorithms_client_to_server
    /// name-list    encryption_algorithms_server_to_client
    /// name-list    mac_algorithms_client_to_server
    /// name-list    mac_algorithms_server_to_client
    /// name-list    compression_algorithms_client_to_server
    /// name-list    compression_algorithms_server_to_client
    /// name-list    languages_client_to_server
    /// name-list    languages_server_to_client
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved for future extension)
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        buf.put_u8(MessageType::KexInit as u8);
        buf.put_slice(&self.cookie);

        write_name_list(&mut buf, &self.kex_algorithms);
        write_name_list(&mut buf, &self.server_host_key_algorithms);
        write_name_list(&mut buf, &self.encryption_algorithms_client_to_server);
        write_name_list(&mut buf, &self.encryption_algorithms_server_to_client);
        write_name_list(&mut buf, &self.mac_algorithms_client_to_server);
        write_name_list(&mut buf, &self.mac_algorithms_server_to_client);
        write_name_list(&mut buf, &self.compression_algorithms_client_to_server);
        write_name_list(&mut buf, &self.compression_algorithms_server_to_client);
        write_name_list(&mut buf, &self.languages_client_to_server);
        write_name_list(&mut buf, &self.languages_server_to_client);

        buf.put_u8(u8::from(self.first_kex_packet_follows));

        // reserved
        buf.put_u32(0);

        buf.to_vec()
    }

    /// Parses a KEXINIT message from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::ProtocolFormat`] if the message is truncated,
    /// has the wrong type or a name list is malformed.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset = expect_message_type(data, MessageType::KexInit as u8, "KEXINIT")?;

        if data.len() < offset + 16 {
            return Err(ConduitError::ProtocolFormat(format!(
                "KEXINIT message too short: {} bytes (minimum 17)",
                data.len()
            )));
        }

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&data[offset..offset + 16]);
        offset += 16;

        let kex_algorithms = read_name_list(data, &mut offset)?;
        let server_host_key_algorithms = read_name_list(data, &mut offset)?;
        let encryption_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let encryption_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let mac_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let mac_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let compression_algorithms_client_to_server = read_name_list(data, &mut offset)?;
        let compression_algorithms_server_to_client = read_name_list(data, &mut offset)?;
        let languages_client_to_server = read_name_list(data, &mut offset)?;
        let languages_server_to_client = read_name_list(data, &mut offset)?;
        let first_kex_packet_follows = read_bool(data, &mut offset)?;
        let _reserved = read_u32(data, &mut offset)?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_algorithms_client_to_server,
            encryption_algorithms_server_to_client,
            mac_algorithms_client_to_server,
            mac_algorithms_server_to_client,
            compression_algorithms_client_to_server,
            compression_algorithms_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

/// Key exchange states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexState {
    /// No exchange in progress
    Idle,
    /// Our KEXINIT has been sent
    Initiated,
    /// Our ephemeral public value has been sent
    AwaitingReply,
    /// Reply received; checking the host key
    Verifying,
    /// Keys derived and NEWKEYS sent
    Complete,
}

/// Key exchange state machine with transition validation.
#[derive(Debug, Clone)]
pub struct KexMachine {
    state: KexState,
}

impl Default for KexMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl KexMachine {
    /// Creates a machine in [`KexState::Idle`].
    pub fn new() -> Self {
        Self {
            state: KexState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> KexState {
        self.state
    }

    /// Whether an exchange is underway.
    pub fn in_progress(&self) -> bool {
        !matches!(self.state, KexState::Idle)
    }

    fn can_transition_to(&self, next: KexState) -> bool {
        use KexState::*;
        matches!(
            (self.state, next),
            (Idle, Initiated)
                | (Initiated, AwaitingReply)
                | (AwaitingReply, Verifying)
                | (Verifying, Complete)
                | (Complete, Idle)
        )
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::ProtocolFormat`] for an out-of-order
    /// transition, which means the peer sent a KEX message we did not expect.
    pub fn transition(&mut self, next: KexState) -> ConduitResult<()> {
        if !self.can_transition_to(next) {
            return Err(ConduitError::ProtocolFormat(format!(
                "Invalid key exchange transition: {:?} -> {:?}",
                self.state, next
            )));
        }
        trace!(from = ?self.state, to = ?next, "kex transition");
        self.state = next;
        Ok(())
    }
}

/// Versions and session id an exchange needs besides the messages.
#[derive(Debug, Clone, Copy)]
pub struct KexContext<'a> {
    /// Our version string (no CR LF)
    pub client_version: &'a str,
    /// Peer version string (no CR LF)
    pub server_version: &'a str,
    /// Session id from the first exchange, if any
    pub session_id: Option<&'a [u8]>,
}

/// Result of a verified KEXDH_REPLY, before the application has accepted
/// the host key.
#[derive(Debug)]
pub struct VerifiedReply {
    /// Details handed to observers and the host key verifier
    pub host_key: HostKeyInfo,
    /// Exchange hash `H`
    pub exchange_hash: Vec<u8>,
}

/// Keys produced by a completed exchange.
pub struct KexOutcome {
    /// Session id (the first exchange hash, kept across re-keys)
    pub session_id: Vec<u8>,
    /// Algorithms that are now in force
    pub negotiated: NegotiatedAlgorithms,
    /// Client-to-server keys (IV A, key C, MAC E)
    pub outbound: DirectionKeys,
    /// Server-to-client keys (IV B, key D, MAC F)
    pub inbound: DirectionKeys,
}

impl std::fmt::Debug for KexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KexOutcome")
            .field("session_id", &hex::encode(&self.session_id))
            .field("negotiated", &self.negotiated)
            .finish_non_exhaustive()
    }
}

/// One client-side key exchange.
///
/// The session feeds it messages in order; each step validates the
/// [`KexMachine`] transition and returns whatever must be sent next.
pub struct KeyExchange {
    machine: KexMachine,
    client_kexinit: Option<(KexInit, Vec<u8>)>,
    server_kexinit: Option<Vec<u8>>,
    negotiated: Option<NegotiatedAlgorithms>,
    exchange: Option<KexExchange>,
    shared_secret: Option<Zeroizing<Vec<u8>>>,
    exchange_hash: Option<Vec<u8>>,
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchange {
    /// Creates an idle exchange.
    pub fn new() -> Self {
        Self {
            machine: KexMachine::new(),
            client_kexinit: None,
            server_kexinit: None,
            negotiated: None,
            exchange: None,
            shared_secret: None,
            exchange_hash: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> KexState {
        self.machine.state()
    }

    /// Whether an exchange is underway.
    pub fn in_progress(&self) -> bool {
        self.machine.in_progress()
    }

    /// Algorithms negotiated by the current exchange, once known.
    pub fn negotiated(&self) -> Option<&NegotiatedAlgorithms> {
        self.negotiated.as_ref()
    }

    /// Idle -> Initiated. Returns our KEXINIT to send.
    pub fn start(&mut self, algorithms: &Algorithms) -> ConduitResult<Message> {
        self.machine.transition(KexState::Initiated)?;
        let kexinit = KexInit::from_algorithms(algorithms);
        let payload = kexinit.to_bytes();
        self.client_kexinit = Some((kexinit.clone(), payload));
        Ok(Message::KexInit(kexinit))
    }

    /// Initiated -> AwaitingReply. Negotiates and returns KEXDH_INIT.
    ///
    /// `payload` is the server KEXINIT exactly as received; it feeds the
    /// exchange hash.
    pub fn on_server_kexinit(
        &mut self,
        server: &KexInit,
        payload: &[u8],
    ) -> ConduitResult<Message> {
        let (client, _) = self
            .client_kexinit
            .as_ref()
            .ok_or_else(|| ConduitError::ProtocolFormat("KEXINIT before ours".to_string()))?;

        let negotiated = NegotiatedAlgorithms::negotiate(client, server)?;
        let algorithm = KexAlgorithm::from_name(&negotiated.kex).ok_or_else(|| {
            ConduitError::NegotiationFailed(format!("unsupported kex {}", negotiated.kex))
        })?;

        self.machine.transition(KexState::AwaitingReply)?;
        debug!(kex = %negotiated.kex, host_key = %negotiated.host_key, "negotiated algorithms");

        let exchange = KexExchange::new(algorithm)?;
        let e = exchange.public_wire().to_vec();

        self.server_kexinit = Some(payload.to_vec());
        self.negotiated = Some(negotiated);
        self.exchange = Some(exchange);

        Ok(Message::KexDhInit { e })
    }

    /// AwaitingReply -> Verifying. Computes `K` and `H` and checks the host
    /// key signature over `H`.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::HostKeyRejected`] if the signature does not
    /// verify.
    pub fn on_reply(
        &mut self,
        host_key: &[u8],
        f: &[u8],
        signature: &[u8],
        ctx: &KexContext<'_>,
    ) -> ConduitResult<VerifiedReply> {
        self.machine.transition(KexState::Verifying)?;

        let exchange = self
            .exchange
            .take()
            .ok_or_else(|| ConduitError::ProtocolFormat("KEXDH_REPLY without init".to_string()))?;
        let algorithm = exchange.algorithm();
        let client_public = exchange.public_wire().to_vec();
        let shared_secret = exchange.compute_shared_secret(f)?;

        let (client_kexinit, server_kexinit, negotiated) = match (
            self.client_kexinit.as_ref(),
            self.server_kexinit.as_ref(),
            self.negotiated.as_ref(),
        ) {
            (Some((_, c)), Some(s), Some(n)) => (c, s, n),
            _ => {
                return Err(ConduitError::ProtocolFormat(
                    "key exchange state incomplete".to_string(),
                ))
            }
        };

        let exchange_hash = compute_exchange_hash(
            algorithm.hash(),
            &ExchangeHashInput {
                client_version: ctx.client_version,
                server_version: ctx.server_version,
                client_kexinit,
                server_kexinit,
                host_key,
                client_public: &client_public,
                server_public: f,
                shared_secret: &shared_secret,
            },
        );

        let host_key_algorithm = HostKeyAlgorithm::from_name(&negotiated.host_key)
            .filter(|a| a.is_verifiable())
            .ok_or_else(|| {
                ConduitError::HostKeyRejected(format!(
                    "cannot verify {} signatures",
                    negotiated.host_key
                ))
            })?;

        let public_key = HostPublicKey::parse(host_key)?;
        public_key.verify(host_key_algorithm, &exchange_hash, signature)?;

        let info = HostKeyInfo::new(host_key_algorithm, &public_key, host_key);
        debug!(
            algorithm = %info.algorithm,
            fingerprint = %info.fingerprint,
            "host key signature verified"
        );

        self.shared_secret = Some(shared_secret);
        self.exchange_hash = Some(exchange_hash.clone());

        Ok(VerifiedReply {
            host_key: info,
            exchange_hash,
        })
    }

    /// Verifying -> Complete. Derives both directions' keys.
    ///
    /// Call once the host key verifier has accepted the key; the caller then
    /// sends NEWKEYS and activates `outbound`.
    pub fn finish(
        &mut self,
        algorithms: &Algorithms,
        ctx: &KexContext<'_>,
    ) -> ConduitResult<KexOutcome> {
        self.machine.transition(KexState::Complete)?;

        let (negotiated, shared_secret, exchange_hash) = match (
            self.negotiated.take(),
            self.shared_secret.take(),
            self.exchange_hash.take(),
        ) {
            (Some(n), Some(k), Some(h)) => (n, k, h),
            _ => {
                return Err(ConduitError::ProtocolFormat(
                    "key exchange state incomplete".to_string(),
                ))
            }
        };

        let hash = KexAlgorithm::from_name(&negotiated.kex)
            .map(|k| k.hash())
            .ok_or_else(|| ConduitError::NegotiationFailed(negotiated.kex.clone()))?;

        let session_id = ctx
            .session_id
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| exchange_hash.clone());

        let material = KeyMaterial {
            hash,
            shared_secret: &shared_secret,
            exchange_hash: &exchange_hash,
            session_id: &session_id,
        };

        let outbound = material.direction_keys(
            algorithms,
            &negotiated.cipher_client_to_server,
            &negotiated.mac_client_to_server,
            KeyLetters::CLIENT_TO_SERVER,
        )?;
        let inbound = material.direction_keys(
            algorithms,
            &negotiated.cipher_server_to_client,
            &negotiated.mac_server_to_client,
            KeyLetters::SERVER_TO_CLIENT,
        )?;

        self.client_kexinit = None;
        self.server_kexinit = None;

        Ok(KexOutcome {
            session_id,
            negotiated,
            outbound,
            inbound,
        })
    }

    /// Complete -> Idle, ready for the next re-key.
    pub fn reset(&mut self) -> ConduitResult<()> {
        self.machine.transition(KexState::Idle)
    }
}

/// Derivation letters for one direction (RFC 4253 Section 7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLetters {
    /// Initial IV
    pub iv: u8,
    /// Encryption key
    pub key: u8,
    /// Integrity key
    pub mac: u8,
}

impl KeyLetters {
    /// A, C, E
    pub const CLIENT_TO_SERVER: KeyLetters = KeyLetters {
        iv: b'A',
        key: b'C',
        mac: b'E',
    };
    /// B, D, F
    pub const SERVER_TO_CLIENT: KeyLetters = KeyLetters {
        iv: b'B',
        key: b'D',
        mac: b'F',
    };
}

/// Shared secret plus hashes from which direction keys are derived.
#[derive(Clone, Copy)]
pub struct KeyMaterial<'a> {
    /// Exchange hash function
    pub hash: KexHash,
    /// Shared secret `K`
    pub shared_secret: &'a [u8],
    /// Exchange hash `H`
    pub exchange_hash: &'a [u8],
    /// Session id
    pub session_id: &'a [u8],
}

impl KeyMaterial<'_> {
    /// Derives IV, key and MAC key for one direction and builds the keyed
    /// transforms from the capability table.
    pub fn direction_keys(
        &self,
        algorithms: &Algorithms,
        cipher_name: &str,
        mac_name: &str,
        letters: KeyLetters,
    ) -> ConduitResult<DirectionKeys> {
        let cipher_entry = algorithms.cipher(cipher_name)?;
        let mac_entry = algorithms.mac(mac_name)?;

        let derive = |letter: u8, len: usize| {
            derive_key(
                self.hash,
                self.shared_secret,
                self.exchange_hash,
                self.session_id,
                letter,
                len,
            )
        };

        let iv = derive(letters.iv, cipher_entry.iv_size);
        let key = derive(letters.key, cipher_entry.key_size);
        let mac_key = derive(letters.mac, mac_entry.key_size);

        Ok(DirectionKeys {
            cipher: cipher_entry.create(&key, &iv)?,
            mac: Some(mac_entry.create(&mac_key)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kexinit_from_algorithms() {
        let kexinit = KexInit::from_algorithms(&Algorithms::default());
        assert_eq!(kexinit.cookie().len(), 16);
        assert!(kexinit
            .server_host_key_algorithms()
            .contains(&"ssh-ed25519".to_string()));
        assert_eq!(kexinit.compression_algorithms_client_to_server(), ["none"]);
        assert!(!kexinit.first_kex_packet_follows());
    }

    #[test]
    fn test_kexinit_round_trip() {
        let original = KexInit::from_algorithms(&Algorithms::default());
        let parsed = KexInit::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_kexinit_parse_invalid_type() {
        let mut data = vec![99];
        data.extend_from_slice(&[0u8; 20]);
        assert!(matches!(
            KexInit::from_bytes(&data),
            Err(ConduitError::ProtocolFormat(_))
        ));
    }

    #[test]
    fn test_kexinit_parse_too_short() {
        assert!(KexInit::from_bytes(&[20, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_kexinit_missing_reserved() {
        let bytes = KexInit::from_algorithms(&Algorithms::default()).to_bytes();
        assert!(KexInit::from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_machine_valid_cycle() {
        let mut machine = KexMachine::new();
        assert!(!machine.in_progress());
        for next in [
            KexState::Initiated,
            KexState::AwaitingReply,
            KexState::Verifying,
            KexState::Complete,
            KexState::Idle,
        ] {
            machine.transition(next).unwrap();
            assert_eq!(machine.state(), next);
        }
    }

    #[test]
    fn test_machine_rejects_skips() {
        let mut machine = KexMachine::new();
        assert!(matches!(
            machine.transition(KexState::Verifying),
            Err(ConduitError::ProtocolFormat(_))
        ));
        machine.transition(KexState::Initiated).unwrap();
        assert!(machine.transition(KexState::Initiated).is_err());
        assert!(machine.transition(KexState::Complete).is_err());
        assert_eq!(machine.state(), KexState::Initiated);
    }

    #[test]
    fn test_exchange_requires_start() {
        let mut kex = KeyExchange::new();
        let server = KexInit::from_algorithms(&Algorithms::default());
        assert!(kex.on_server_kexinit(&server, &server.to_bytes()).is_err());
    }

    #[test]
    fn test_exchange_negotiation_failure() {
        let mut kex = KeyExchange::new();
        kex.start(&Algorithms::default()).unwrap();
        let server = KexInit::from_algorithms(
            &Algorithms::default().with_kex(["diffie-hellman-group1-sha1"]),
        );
        assert!(matches!(
            kex.on_server_kexinit(&server, &server.to_bytes()),
            Err(ConduitError::NegotiationFailed(_))
        ));
    }

    #[test]
    fn test_exchange_sends_ephemeral() {
        let mut kex = KeyExchange::new();
        assert!(matches!(
            kex.start(&Algorithms::default()).unwrap(),
            Message::KexInit(_)
        ));
        let server = KexInit::from_algorithms(&Algorithms::default());
        match kex.on_server_kexinit(&server, &server.to_bytes()).unwrap() {
            Message::KexDhInit { e } => assert_eq!(e.len(), 32),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(kex.state(), KexState::AwaitingReply);
        assert_eq!(kex.negotiated().unwrap().kex, "curve25519-sha256");
    }

    #[test]
    fn test_direction_keys_distinct_letters() {
        let algorithms = Algorithms::default();
        let material = KeyMaterial {
            hash: KexHash::Sha256,
            shared_secret: &[0x42; 32],
            exchange_hash: &[0x01; 32],
            session_id: &[0x01; 32],
        };
        let mut out = material
            .direction_keys(&algorithms, "aes128-ctr", "hmac-sha2-256", KeyLetters::CLIENT_TO_SERVER)
            .unwrap();
        let mut inb = material
            .direction_keys(&algorithms, "aes128-ctr", "hmac-sha2-256", KeyLetters::SERVER_TO_CLIENT)
            .unwrap();

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        out.cipher.encrypt(&mut a).unwrap();
        inb.cipher.encrypt(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
