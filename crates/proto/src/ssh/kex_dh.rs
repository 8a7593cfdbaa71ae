//! Key exchange methods and key derivation (RFC 4253 Section 7-8, RFC 8268,
//! RFC 8731).
//!
//! This module implements the ephemeral halves of:
//! - curve25519-sha256 / curve25519-sha256@libssh.org
//! - diffie-hellman-group14-sha256
//! - diffie-hellman-group14-sha1
//!
//! plus the exchange hash and the session key derivation that sit on top of
//! them. Both sides of an exchange use the same types, so the same code backs
//! the client engine and the scripted peer in the integration tests.
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::kex_dh::{KexAlgorithm, KexExchange};
//!
//! let client = KexExchange::new(KexAlgorithm::Curve25519Sha256).unwrap();
//! let server = KexExchange::new(KexAlgorithm::Curve25519Sha256).unwrap();
//! let client_public = client.public_wire().to_vec();
//! let server_public = server.public_wire().to_vec();
//!
//! let k1 = client.compute_shared_secret(&server_public).unwrap();
//! let k2 = server.compute_shared_secret(&client_public).unwrap();
//! assert_eq!(*k1, *k2);
//! ```

use bytes::BytesMut;
use conduit_platform::{ConduitError, ConduitResult};
use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use super::wire::{encode_mpint, write_bytes, write_mpint};

/// Hash function bound to a key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexHash {
    /// SHA-1 (group14-sha1 only)
    Sha1,
    /// SHA-256
    Sha256,
}

impl KexHash {
    /// Hashes `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            KexHash::Sha1 => Sha1::digest(data).to_vec(),
            KexHash::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Supported key exchange methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KexAlgorithm {
    /// curve25519-sha256 (RFC 8731)
    Curve25519Sha256,
    /// curve25519-sha256@libssh.org (pre-standard name)
    Curve25519Sha256Libssh,
    /// diffie-hellman-group14-sha256 (RFC 8268)
    DhGroup14Sha256,
    /// diffie-hellman-group14-sha1 (RFC 4253)
    DhGroup14Sha1,
}

impl KexAlgorithm {
    /// Methods offered by default, most preferred first.
    pub const DEFAULT_PREFERENCE: [KexAlgorithm; 4] = [
        KexAlgorithm::Curve25519Sha256,
        KexAlgorithm::Curve25519Sha256Libssh,
        KexAlgorithm::DhGroup14Sha256,
        KexAlgorithm::DhGroup14Sha1,
    ];

    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            KexAlgorithm::Curve25519Sha256 => "curve25519-sha256",
            KexAlgorithm::Curve25519Sha256Libssh => "curve25519-sha256@libssh.org",
            KexAlgorithm::DhGroup14Sha256 => "diffie-hellman-group14-sha256",
            KexAlgorithm::DhGroup14Sha1 => "diffie-hellman-group14-sha1",
        }
    }

    /// Parses an SSH algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::DEFAULT_PREFERENCE
            .iter()
            .copied()
            .find(|k| k.name() == name)
    }

    /// Hash used for the exchange hash and key derivation.
    pub fn hash(&self) -> KexHash {
        match self {
            KexAlgorithm::DhGroup14Sha1 => KexHash::Sha1,
            _ => KexHash::Sha256,
        }
    }
}

/// Diffie-Hellman Group 14 parameters (RFC 3526), a 2048-bit MODP group.
mod dh_group14 {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    const PRIME: [u8; 256] = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
        0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
        0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
        0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
        0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
        0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
        0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
        0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
        0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
        0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d,
        0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05, 0x98, 0xda, 0x48, 0x36,
        0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
        0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56,
        0x20, 0x85, 0x52, 0xbb, 0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d,
        0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04, 0xf1, 0x74, 0x6c, 0x08,
        0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
        0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2,
        0xec, 0x07, 0xa2, 0x8f, 0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9,
        0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18, 0x39, 0x95, 0x49, 0x7c,
        0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
        0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xac, 0xaa, 0x68, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff,
    ];

    pub static P: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&PRIME));

    pub static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));
}

static TWO: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// Diffie-Hellman Group 14 ephemeral key pair.
pub struct DhGroup14Exchange {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
}

impl DhGroup14Exchange {
    /// Generates a new key pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        // 1 < x < p-1
        let p_minus_one = &*dh_group14::P - 1u32;
        let x = rng.gen_biguint_range(&TWO, &p_minus_one);
        let y = dh_group14::G.modpow(&x, &dh_group14::P);

        Self {
            private_key: x.to_bytes_be(),
            public_key: y.to_bytes_be(),
        }
    }

    /// Public value `g^x mod p` as unsigned big-endian bytes.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Computes `K = peer^x mod p` after range-checking the peer value.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> ConduitResult<Vec<u8>> {
        if peer_public.first().is_some_and(|b| b & 0x80 != 0) {
            return Err(ConduitError::ProtocolFormat(
                "Invalid DH public value: negative".to_string(),
            ));
        }

        let y_peer = BigUint::from_bytes_be(peer_public);
        let p_minus_one = &*dh_group14::P - 1u32;

        if y_peer < *TWO || y_peer >= p_minus_one {
            return Err(ConduitError::ProtocolFormat(
                "Invalid DH public value: out of range".to_string(),
            ));
        }

        let x = BigUint::from_bytes_be(&self.private_key);
        Ok(y_peer.modpow(&x, &dh_group14::P).to_bytes_be())
    }
}

impl Default for DhGroup14Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DhGroup14Exchange {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Curve25519 ephemeral key pair (RFC 8731).
pub struct Curve25519Exchange {
    private_key: EphemeralPrivateKey,
    public_key: [u8; 32],
}

impl Curve25519Exchange {
    /// Generates a new key pair.
    pub fn new() -> ConduitResult<Self> {
        let rng = SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(&X25519, &rng).map_err(|_| {
            ConduitError::Security("Failed to generate Curve25519 key".to_string())
        })?;

        let public_key = private_key.compute_public_key().map_err(|_| {
            ConduitError::Security("Failed to compute Curve25519 public key".to_string())
        })?;

        let mut public_key_bytes = [0u8; 32];
        public_key_bytes.copy_from_slice(public_key.as_ref());

        Ok(Self {
            private_key,
            public_key: public_key_bytes,
        })
    }

    /// Public key (32 bytes).
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Consumes the private key and computes the shared secret.
    pub fn compute_shared_secret(self, peer_public: &[u8]) -> ConduitResult<Vec<u8>> {
        if peer_public.len() != 32 {
            return Err(ConduitError::ProtocolFormat(format!(
                "Invalid Curve25519 public key length: {}",
                peer_public.len()
            )));
        }

        let peer_public_key = UnparsedPublicKey::new(&X25519, peer_public);
        agree_ephemeral(self.private_key, &peer_public_key, |key_material| {
            key_material.to_vec()
        })
        .map_err(|_| ConduitError::Security("Curve25519 key agreement failed".to_string()))
    }
}

/// The ephemeral half of whichever method was negotiated.
pub enum KexExchange {
    /// ECDH over Curve25519
    Curve25519 {
        /// Method name that was negotiated
        algorithm: KexAlgorithm,
        /// Key pair
        exchange: Curve25519Exchange,
    },
    /// Finite-field DH over group 14
    DhGroup14 {
        /// Method name that was negotiated
        algorithm: KexAlgorithm,
        /// Key pair
        exchange: DhGroup14Exchange,
        /// `e` or `f` in mpint body form
        wire: Vec<u8>,
    },
}

impl KexExchange {
    /// Generates the ephemeral key pair for `algorithm`.
    pub fn new(algorithm: KexAlgorithm) -> ConduitResult<Self> {
        match algorithm {
            KexAlgorithm::Curve25519Sha256 | KexAlgorithm::Curve25519Sha256Libssh => {
                Ok(KexExchange::Curve25519 {
                    algorithm,
                    exchange: Curve25519Exchange::new()?,
                })
            }
            KexAlgorithm::DhGroup14Sha256 | KexAlgorithm::DhGroup14Sha1 => {
                let exchange = DhGroup14Exchange::new();
                let wire = encode_mpint(exchange.public_key());
                Ok(KexExchange::DhGroup14 {
                    algorithm,
                    exchange,
                    wire,
                })
            }
        }
    }

    /// Method this exchange runs.
    pub fn algorithm(&self) -> KexAlgorithm {
        match self {
            KexExchange::Curve25519 { algorithm, .. } | KexExchange::DhGroup14 { algorithm, .. } => {
                *algorithm
            }
        }
    }

    /// Our public value exactly as it goes inside the KEXDH string field
    /// (`Q_C`/`Q_S` for ECDH, the `e`/`f` mpint body for DH).
    pub fn public_wire(&self) -> &[u8] {
        match self {
            KexExchange::Curve25519 { exchange, .. } => exchange.public_key(),
            KexExchange::DhGroup14 { wire, .. } => wire,
        }
    }

    /// Computes the shared secret `K` (unsigned big-endian bytes).
    pub fn compute_shared_secret(self, peer_wire: &[u8]) -> ConduitResult<Zeroizing<Vec<u8>>> {
        let secret = match self {
            KexExchange::Curve25519 { exchange, .. } => {
                exchange.compute_shared_secret(peer_wire)?
            }
            KexExchange::DhGroup14 { exchange, .. } => {
                exchange.compute_shared_secret(peer_wire)?
            }
        };
        Ok(Zeroizing::new(secret))
    }
}

/// Inputs to the exchange hash `H` (RFC 4253 Section 8, RFC 5656 Section 4).
#[derive(Debug, Clone, Copy)]
pub struct ExchangeHashInput<'a> {
    /// Client version string, without CR LF
    pub client_version: &'a str,
    /// Server version string, without CR LF
    pub server_version: &'a str,
    /// Client KEXINIT payload
    pub client_kexinit: &'a [u8],
    /// Server KEXINIT payload
    pub server_kexinit: &'a [u8],
    /// Server host key blob
    pub host_key: &'a [u8],
    /// Client ephemeral public value (wire form)
    pub client_public: &'a [u8],
    /// Server ephemeral public value (wire form)
    pub server_public: &'a [u8],
    /// Shared secret K
    pub shared_secret: &'a [u8],
}

/// Computes `H = HASH(V_C || V_S || I_C || I_S || K_S || e || f || K)`.
pub fn compute_exchange_hash(hash: KexHash, input: &ExchangeHashInput<'_>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_bytes(&mut buf, input.client_version.as_bytes());
    write_bytes(&mut buf, input.server_version.as_bytes());
    write_bytes(&mut buf, input.client_kexinit);
    write_bytes(&mut buf, input.server_kexinit);
    write_bytes(&mut buf, input.host_key);
    write_bytes(&mut buf, input.client_public);
    write_bytes(&mut buf, input.server_public);
    write_mpint(&mut buf, input.shared_secret);
    hash.digest(&buf)
}

/// Derives session key material (RFC 4253 Section 7.2).
///
/// ```text
/// K1 = HASH(K || H || letter || session_id)
/// K2 = HASH(K || H || K1)
/// K3 = HASH(K || H || K1 || K2)
/// key = K1 || K2 || K3 || ...
/// ```
///
/// `letter` is `b'A'`..`b'F'`: IV c2s, IV s2c, key c2s, key s2c, MAC c2s,
/// MAC s2c.
pub fn derive_key(
    hash: KexHash,
    shared_secret: &[u8],
    exchange_hash: &[u8],
    session_id: &[u8],
    letter: u8,
    key_length: usize,
) -> Zeroizing<Vec<u8>> {
    let mut k_mpint = BytesMut::new();
    write_mpint(&mut k_mpint, shared_secret);

    let mut input = Zeroizing::new(Vec::new());
    input.extend_from_slice(&k_mpint);
    input.extend_from_slice(exchange_hash);
    input.push(letter);
    input.extend_from_slice(session_id);

    let mut key = Zeroizing::new(hash.digest(&input));

    while key.len() < key_length {
        input.clear();
        input.extend_from_slice(&k_mpint);
        input.extend_from_slice(exchange_hash);
        input.extend_from_slice(&key);
        let block = hash.digest(&input);
        key.extend_from_slice(&block);
    }

    k_mpint.as_mut().zeroize();
    key.truncate(key_length);
    key
}
