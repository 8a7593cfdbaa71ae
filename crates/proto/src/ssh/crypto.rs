//! Keyed packet transforms and the per-session algorithm capability table.
//!
//! The transport never names a concrete cipher or MAC. It asks an
//! [`Algorithms`] table (owned by the session through its config) to build a
//! [`PacketCipher`] / [`PacketMac`] from a negotiated name plus derived key
//! material, and then drives the boxed trait objects. Built-in entries wrap
//! the RustCrypto `aes`, `ctr`, `cbc` and `hmac` crates; callers can register
//! their own entries or restrict the preference lists.
//!
//! # Supported Algorithms
//!
//! | Cipher | Key | IV | Block |
//! |--------|-----|----|-------|
//! | aes128-ctr / aes192-ctr / aes256-ctr | 16 / 24 / 32 | 16 | 16 |
//! | aes128-cbc / aes256-cbc | 16 / 32 | 16 | 16 |
//!
//! | MAC | Key | Tag |
//! |-----|-----|-----|
//! | hmac-sha2-256(-etm@openssh.com) | 32 | 32 |
//! | hmac-sha2-512(-etm@openssh.com) | 64 | 64 |
//! | hmac-sha1 | 20 | 20 |

use std::fmt;
use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use conduit_platform::{ConduitError, ConduitResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use super::hostkey::HostKeyAlgorithm;
use super::kex_dh::KexAlgorithm;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Symmetric cipher for one direction of the packet stream.
///
/// Implementations are stateful: the keystream (CTR) or chaining value
/// (CBC) carries over from one call to the next, so the transport may
/// decrypt the first block of a packet and the remainder separately.
pub trait PacketCipher: Send + Sync {
    /// Algorithm name
    fn name(&self) -> &str;

    /// Cipher block size; packets are padded to a multiple of it
    fn block_size(&self) -> usize;

    /// Encrypts `data` in place. `data.len()` is a multiple of the block size.
    fn encrypt(&mut self, data: &mut [u8]) -> ConduitResult<()>;

    /// Decrypts `data` in place. `data.len()` is a multiple of the block size.
    fn decrypt(&mut self, data: &mut [u8]) -> ConduitResult<()>;
}

/// Message authentication code for one direction of the packet stream.
pub trait PacketMac: Send + Sync {
    /// Algorithm name
    fn name(&self) -> &str;

    /// Tag length in bytes
    fn size(&self) -> usize;

    /// Encrypt-then-MAC: the tag covers the ciphertext and the length is
    /// sent in the clear.
    fn is_etm(&self) -> bool;

    /// Computes the tag over `sequence || data`.
    fn compute(&self, sequence: u32, data: &[u8]) -> Vec<u8>;

    /// Verifies `tag` in constant time.
    fn verify(&self, sequence: u32, data: &[u8], tag: &[u8]) -> bool {
        let expected = self.compute(sequence, data);
        expected.len() == tag.len() && bool::from(expected.ct_eq(tag))
    }
}

/// Built-in cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    /// No encryption (only before the first NEWKEYS)
    None,
    /// AES-128 in counter mode
    Aes128Ctr,
    /// AES-192 in counter mode
    Aes192Ctr,
    /// AES-256 in counter mode
    Aes256Ctr,
    /// AES-128 in CBC mode
    Aes128Cbc,
    /// AES-256 in CBC mode
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Algorithms offered by default, most preferred first.
    pub const DEFAULT_PREFERENCE: [CipherAlgorithm; 5] = [
        CipherAlgorithm::Aes256Ctr,
        CipherAlgorithm::Aes192Ctr,
        CipherAlgorithm::Aes128Ctr,
        CipherAlgorithm::Aes256Cbc,
        CipherAlgorithm::Aes128Cbc,
    ];

    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::None => "none",
            CipherAlgorithm::Aes128Ctr => "aes128-ctr",
            CipherAlgorithm::Aes192Ctr => "aes192-ctr",
            CipherAlgorithm::Aes256Ctr => "aes256-ctr",
            CipherAlgorithm::Aes128Cbc => "aes128-cbc",
            CipherAlgorithm::Aes256Cbc => "aes256-cbc",
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 0,
            CipherAlgorithm::Aes128Ctr | CipherAlgorithm::Aes128Cbc => 16,
            CipherAlgorithm::Aes192Ctr => 24,
            CipherAlgorithm::Aes256Ctr | CipherAlgorithm::Aes256Cbc => 32,
        }
    }

    /// IV size in bytes.
    pub fn iv_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 0,
            _ => 16,
        }
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            CipherAlgorithm::None => 8,
            _ => 16,
        }
    }

    /// Parses an SSH algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CipherAlgorithm::None),
            "aes128-ctr" => Some(CipherAlgorithm::Aes128Ctr),
            "aes192-ctr" => Some(CipherAlgorithm::Aes192Ctr),
            "aes256-ctr" => Some(CipherAlgorithm::Aes256Ctr),
            "aes128-cbc" => Some(CipherAlgorithm::Aes128Cbc),
            "aes256-cbc" => Some(CipherAlgorithm::Aes256Cbc),
            _ => None,
        }
    }

    /// Builds a keyed transform.
    pub fn create(&self, key: &[u8], iv: &[u8]) -> ConduitResult<Box<dyn PacketCipher>> {
        let key = take_material(key, self.key_size(), "cipher key")?;
        let iv = take_material(iv, self.iv_size(), "cipher IV")?;
        let invalid = |_| ConduitError::Security(format!("Invalid key length for {}", self.name()));

        let cipher: Box<dyn PacketCipher> = match self {
            CipherAlgorithm::None => Box::new(NoneCipher),
            CipherAlgorithm::Aes128Ctr => Box::new(AesCtr {
                algorithm: *self,
                state: CtrState::Aes128(Aes128Ctr::new_from_slices(key, iv).map_err(invalid)?),
            }),
            CipherAlgorithm::Aes192Ctr => Box::new(AesCtr {
                algorithm: *self,
                state: CtrState::Aes192(Aes192Ctr::new_from_slices(key, iv).map_err(invalid)?),
            }),
            CipherAlgorithm::Aes256Ctr => Box::new(AesCtr {
                algorithm: *self,
                state: CtrState::Aes256(Aes256Ctr::new_from_slices(key, iv).map_err(invalid)?),
            }),
            CipherAlgorithm::Aes128Cbc => Box::new(AesCbc {
                algorithm: *self,
                state: CbcState::Aes128(
                    cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?,
                    cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?,
                ),
            }),
            CipherAlgorithm::Aes256Cbc => Box::new(AesCbc {
                algorithm: *self,
                state: CbcState::Aes256(
                    cbc::Encryptor::new_from_slices(key, iv).map_err(invalid)?,
                    cbc::Decryptor::new_from_slices(key, iv).map_err(invalid)?,
                ),
            }),
        };
        Ok(cipher)
    }
}

/// Built-in MAC algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
    /// HMAC-SHA2-256, encrypt-then-MAC
    HmacSha256Etm,
    /// HMAC-SHA2-512, encrypt-then-MAC
    HmacSha512Etm,
    /// HMAC-SHA2-256
    HmacSha256,
    /// HMAC-SHA2-512
    HmacSha512,
    /// HMAC-SHA1
    HmacSha1,
}

impl MacAlgorithm {
    /// Algorithms offered by default, most preferred first.
    pub const DEFAULT_PREFERENCE: [MacAlgorithm; 5] = [
        MacAlgorithm::HmacSha256Etm,
        MacAlgorithm::HmacSha512Etm,
        MacAlgorithm::HmacSha256,
        MacAlgorithm::HmacSha512,
        MacAlgorithm::HmacSha1,
    ];

    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha256Etm => "hmac-sha2-256-etm@openssh.com",
            MacAlgorithm::HmacSha512Etm => "hmac-sha2-512-etm@openssh.com",
            MacAlgorithm::HmacSha256 => "hmac-sha2-256",
            MacAlgorithm::HmacSha512 => "hmac-sha2-512",
            MacAlgorithm::HmacSha1 => "hmac-sha1",
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha256 | MacAlgorithm::HmacSha256Etm => 32,
            MacAlgorithm::HmacSha512 | MacAlgorithm::HmacSha512Etm => 64,
            MacAlgorithm::HmacSha1 => 20,
        }
    }

    /// Tag size in bytes.
    pub fn mac_size(&self) -> usize {
        self.key_size()
    }

    /// Whether the MAC is computed over the ciphertext.
    pub fn is_etm(&self) -> bool {
        matches!(
            self,
            MacAlgorithm::HmacSha256Etm | MacAlgorithm::HmacSha512Etm
        )
    }

    /// Parses an SSH algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::DEFAULT_PREFERENCE
            .iter()
            .copied()
            .find(|alg| alg.name() == name)
    }

    /// Builds a keyed transform.
    pub fn create(&self, key: &[u8]) -> ConduitResult<Box<dyn PacketMac>> {
        let key = take_material(key, self.key_size(), "MAC key")?;
        let invalid = |_| ConduitError::Security(format!("Invalid key length for {}", self.name()));

        let state = match self {
            MacAlgorithm::HmacSha256 | MacAlgorithm::HmacSha256Etm => {
                HmacState::Sha256(Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?)
            }
            MacAlgorithm::HmacSha512 | MacAlgorithm::HmacSha512Etm => {
                HmacState::Sha512(Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?)
            }
            MacAlgorithm::HmacSha1 => {
                HmacState::Sha1(Hmac::<Sha1>::new_from_slice(key).map_err(invalid)?)
            }
        };

        Ok(Box::new(HmacMac {
            algorithm: *self,
            state,
        }))
    }
}

fn take_material<'a>(material: &'a [u8], size: usize, what: &str) -> ConduitResult<&'a [u8]> {
    if material.len() < size {
        return Err(ConduitError::Security(format!(
            "Insufficient {} material: expected {}, got {}",
            what,
            size,
            material.len()
        )));
    }
    Ok(&material[..size])
}

fn check_block_multiple(data: &[u8], block_size: usize) -> ConduitResult<()> {
    if data.len() % block_size != 0 {
        return Err(ConduitError::ProtocolFormat(format!(
            "Cipher input of {} bytes is not a multiple of block size {}",
            data.len(),
            block_size
        )));
    }
    Ok(())
}

/// Identity transform used before the first key exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCipher;

impl PacketCipher for NoneCipher {
    fn name(&self) -> &str {
        "none"
    }

    fn block_size(&self) -> usize {
        8
    }

    fn encrypt(&mut self, _data: &mut [u8]) -> ConduitResult<()> {
        Ok(())
    }

    fn decrypt(&mut self, _data: &mut [u8]) -> ConduitResult<()> {
        Ok(())
    }
}

enum CtrState {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

struct AesCtr {
    algorithm: CipherAlgorithm,
    state: CtrState,
}

impl AesCtr {
    fn apply(&mut self, data: &mut [u8]) {
        match &mut self.state {
            CtrState::Aes128(c) => c.apply_keystream(data),
            CtrState::Aes192(c) => c.apply_keystream(data),
            CtrState::Aes256(c) => c.apply_keystream(data),
        }
    }
}

impl PacketCipher for AesCtr {
    fn name(&self) -> &str {
        self.algorithm.name()
    }

    fn block_size(&self) -> usize {
        16
    }

    fn encrypt(&mut self, data: &mut [u8]) -> ConduitResult<()> {
        check_block_multiple(data, 16)?;
        self.apply(data);
        Ok(())
    }

    fn decrypt(&mut self, data: &mut [u8]) -> ConduitResult<()> {
        check_block_multiple(data, 16)?;
        self.apply(data);
        Ok(())
    }
}

enum CbcState {
    Aes128(cbc::Encryptor<Aes128>, cbc::Decryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>, cbc::Decryptor<Aes256>),
}

struct AesCbc {
    algorithm: CipherAlgorithm,
    state: CbcState,
}

impl PacketCipher for AesCbc {
    fn name(&self) -> &str {
        self.algorithm.name()
    }

    fn block_size(&self) -> usize {
        16
    }

    fn encrypt(&mut self, data: &mut [u8]) -> ConduitResult<()> {
        check_block_multiple(data, 16)?;
        for block in data.chunks_exact_mut(16) {
            let block = GenericArray::from_mut_slice(block);
            match &mut self.state {
                CbcState::Aes128(enc, _) => enc.encrypt_block_mut(block),
                CbcState::Aes256(enc, _) => enc.encrypt_block_mut(block),
            }
        }
        Ok(())
    }

    fn decrypt(&mut self, data: &mut [u8]) -> ConduitResult<()> {
        check_block_multiple(data, 16)?;
        for block in data.chunks_exact_mut(16) {
            let block = GenericArray::from_mut_slice(block);
            match &mut self.state {
                CbcState::Aes128(_, dec) => dec.decrypt_block_mut(block),
                CbcState::Aes256(_, dec) => dec.decrypt_block_mut(block),
            }
        }
        Ok(())
    }
}

enum HmacState {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

struct HmacMac {
    algorithm: MacAlgorithm,
    state: HmacState,
}

impl PacketMac for HmacMac {
    fn name(&self) -> &str {
        self.algorithm.name()
    }

    fn size(&self) -> usize {
        self.algorithm.mac_size()
    }

    fn is_etm(&self) -> bool {
        self.algorithm.is_etm()
    }

    fn compute(&self, sequence: u32, data: &[u8]) -> Vec<u8> {
        macro_rules! tag {
            ($keyed:expr) => {{
                let mut mac = $keyed.clone();
                mac.update(&sequence.to_be_bytes());
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }};
        }

        match &self.state {
            HmacState::Sha1(m) => tag!(m),
            HmacState::Sha256(m) => tag!(m),
            HmacState::Sha512(m) => tag!(m),
        }
    }
}

/// Constructor for a registered cipher.
pub type CipherFactory =
    Arc<dyn Fn(&[u8], &[u8]) -> ConduitResult<Box<dyn PacketCipher>> + Send + Sync>;

/// Constructor for a registered MAC.
pub type MacFactory = Arc<dyn Fn(&[u8]) -> ConduitResult<Box<dyn PacketMac>> + Send + Sync>;

/// A cipher entry in the capability table.
#[derive(Clone)]
pub struct CipherEntry {
    /// SSH algorithm name
    pub name: String,
    /// Key bytes to derive
    pub key_size: usize,
    /// IV bytes to derive
    pub iv_size: usize,
    factory: CipherFactory,
}

impl CipherEntry {
    /// Creates an entry with a custom factory.
    pub fn new(
        name: impl Into<String>,
        key_size: usize,
        iv_size: usize,
        factory: CipherFactory,
    ) -> Self {
        Self {
            name: name.into(),
            key_size,
            iv_size,
            factory,
        }
    }

    fn builtin(algorithm: CipherAlgorithm) -> Self {
        Self::new(
            algorithm.name(),
            algorithm.key_size(),
            algorithm.iv_size(),
            Arc::new(move |key, iv| algorithm.create(key, iv)),
        )
    }

    /// Builds a keyed transform.
    pub fn create(&self, key: &[u8], iv: &[u8]) -> ConduitResult<Box<dyn PacketCipher>> {
        (self.factory)(key, iv)
    }
}

impl fmt::Debug for CipherEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEntry")
            .field("name", &self.name)
            .field("key_size", &self.key_size)
            .field("iv_size", &self.iv_size)
            .finish()
    }
}

/// A MAC entry in the capability table.
#[derive(Clone)]
pub struct MacEntry {
    /// SSH algorithm name
    pub name: String,
    /// Key bytes to derive
    pub key_size: usize,
    factory: MacFactory,
}

impl MacEntry {
    /// Creates an entry with a custom factory.
    pub fn new(name: impl Into<String>, key_size: usize, factory: MacFactory) -> Self {
        Self {
            name: name.into(),
            key_size,
            factory,
        }
    }

    fn builtin(algorithm: MacAlgorithm) -> Self {
        Self::new(
            algorithm.name(),
            algorithm.key_size(),
            Arc::new(move |key| algorithm.create(key)),
        )
    }

    /// Builds a keyed transform.
    pub fn create(&self, key: &[u8]) -> ConduitResult<Box<dyn PacketMac>> {
        (self.factory)(key)
    }
}

impl fmt::Debug for MacEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacEntry")
            .field("name", &self.name)
            .field("key_size", &self.key_size)
            .finish()
    }
}

/// Per-session capability table: every algorithm the session may offer,
/// in preference order, plus the constructors for keyed transforms.
#[derive(Debug, Clone)]
pub struct Algorithms {
    kex: Vec<String>,
    host_key: Vec<String>,
    ciphers: Vec<CipherEntry>,
    macs: Vec<MacEntry>,
    compression: Vec<String>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self {
            kex: KexAlgorithm::DEFAULT_PREFERENCE
                .iter()
                .map(|k| k.name().to_string())
                .collect(),
            host_key: HostKeyAlgorithm::DEFAULT_PREFERENCE
                .iter()
                .map(|h| h.name().to_string())
                .collect(),
            ciphers: CipherAlgorithm::DEFAULT_PREFERENCE
                .iter()
                .copied()
                .map(CipherEntry::builtin)
                .collect(),
            macs: MacAlgorithm::DEFAULT_PREFERENCE
                .iter()
                .copied()
                .map(MacEntry::builtin)
                .collect(),
            compression: vec!["none".to_string()],
        }
    }
}

impl Algorithms {
    /// Key exchange names in preference order.
    pub fn kex(&self) -> &[String] {
        &self.kex
    }

    /// Host key algorithm names in preference order.
    pub fn host_key(&self) -> &[String] {
        &self.host_key
    }

    /// Cipher names in preference order.
    pub fn cipher_names(&self) -> Vec<String> {
        self.ciphers.iter().map(|c| c.name.clone()).collect()
    }

    /// MAC names in preference order.
    pub fn mac_names(&self) -> Vec<String> {
        self.macs.iter().map(|m| m.name.clone()).collect()
    }

    /// Compression names in preference order.
    pub fn compression(&self) -> &[String] {
        &self.compression
    }

    /// Looks up a cipher entry.
    pub fn cipher(&self, name: &str) -> ConduitResult<&CipherEntry> {
        self.ciphers
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConduitError::Unsupported(format!("cipher {}", name)))
    }

    /// Looks up a MAC entry.
    pub fn mac(&self, name: &str) -> ConduitResult<&MacEntry> {
        self.macs
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConduitError::Unsupported(format!("MAC {}", name)))
    }

    /// Replaces the key exchange preference list.
    pub fn with_kex<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kex = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the host key preference list.
    pub fn with_host_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_key = names.into_iter().map(Into::into).collect();
        self
    }

    /// Keeps only the named ciphers, in the given order. Unknown names are
    /// ignored.
    pub fn with_ciphers(mut self, names: &[&str]) -> Self {
        self.ciphers = names
            .iter()
            .filter_map(|n| {
                self.ciphers
                    .iter()
                    .find(|c| c.name == *n)
                    .cloned()
                    .or_else(|| CipherAlgorithm::from_name(n).map(CipherEntry::builtin))
            })
            .collect();
        self
    }

    /// Keeps only the named MACs, in the given order. Unknown names are
    /// ignored.
    pub fn with_macs(mut self, names: &[&str]) -> Self {
        self.macs = names
            .iter()
            .filter_map(|n| {
                self.macs
                    .iter()
                    .find(|m| m.name == *n)
                    .cloned()
                    .or_else(|| MacAlgorithm::from_name(n).map(MacEntry::builtin))
            })
            .collect();
        self
    }

    /// Registers a custom cipher at the front of the preference list.
    pub fn register_cipher(mut self, entry: CipherEntry) -> Self {
        self.ciphers.retain(|c| c.name != entry.name);
        self.ciphers.insert(0, entry);
        self
    }

    /// Registers a custom MAC at the front of the preference list.
    pub fn register_mac(mut self, entry: MacEntry) -> Self {
        self.macs.retain(|m| m.name != entry.name);
        self.macs.insert(0, entry);
        self
    }

    /// Checks that every list is non-empty and every kex / host key name is
    /// one the engine can run.
    pub fn validate(&self) -> ConduitResult<()> {
        if self.kex.is_empty()
            || self.host_key.is_empty()
            || self.ciphers.is_empty()
            || self.macs.is_empty()
            || self.compression.is_empty()
        {
            return Err(ConduitError::Config(
                "algorithm lists must not be empty".to_string(),
            ));
        }

        if let Some(name) = self.kex.iter().find(|k| KexAlgorithm::from_name(k).is_none()) {
            return Err(ConduitError::Config(format!(
                "unsupported key exchange algorithm: {}",
                name
            )));
        }

        if let Some(name) = self
            .host_key
            .iter()
            .find(|h| !HostKeyAlgorithm::from_name(h).is_some_and(|a| a.is_verifiable()))
        {
            return Err(ConduitError::Config(format!(
                "unsupported host key algorithm: {}",
                name
            )));
        }

        if self.compression.iter().any(|c| c != "none") {
            return Err(ConduitError::Config(
                "only \"none\" compression is supported".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_algorithm_properties() {
        assert_eq!(CipherAlgorithm::Aes128Ctr.key_size(), 16);
        assert_eq!(CipherAlgorithm::Aes192Ctr.key_size(), 24);
        assert_eq!(CipherAlgorithm::Aes256Cbc.key_size(), 32);
        assert_eq!(CipherAlgorithm::Aes256Ctr.iv_size(), 16);
        assert_eq!(CipherAlgorithm::None.block_size(), 8);
    }

    #[test]
    fn test_cipher_from_name() {
        for alg in CipherAlgorithm::DEFAULT_PREFERENCE {
            assert_eq!(CipherAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(CipherAlgorithm::from_name("3des-cbc"), None);
    }

    #[test]
    fn test_mac_from_name() {
        for alg in MacAlgorithm::DEFAULT_PREFERENCE {
            assert_eq!(MacAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert!(MacAlgorithm::HmacSha256Etm.is_etm());
        assert!(!MacAlgorithm::HmacSha1.is_etm());
        assert_eq!(MacAlgorithm::from_name("umac-64@openssh.com"), None);
    }

    #[test]
    fn test_ctr_stream_continuity() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plaintext: Vec<u8> = (0..64u8).collect();

        let mut whole = plaintext.clone();
        CipherAlgorithm::Aes128Ctr
            .create(&key, &iv)
            .unwrap()
            .encrypt(&mut whole)
            .unwrap();

        // Decrypting the first block and the rest separately must match.
        let mut dec = CipherAlgorithm::Aes128Ctr.create(&key, &iv).unwrap();
        let (head, tail) = whole.split_at_mut(16);
        dec.decrypt(head).unwrap();
        dec.decrypt(tail).unwrap();
        assert_eq!(whole, plaintext);
    }

    #[test]
    fn test_cbc_roundtrip() {
        for alg in [CipherAlgorithm::Aes128Cbc, CipherAlgorithm::Aes256Cbc] {
            let key = [3u8; 32];
            let iv = [4u8; 16];
            let plaintext = vec![0x42u8; 48];

            let mut data = plaintext.clone();
            alg.create(&key, &iv).unwrap().encrypt(&mut data).unwrap();
            assert_ne!(data, plaintext);

            let mut dec = alg.create(&key, &iv).unwrap();
            let (head, tail) = data.split_at_mut(16);
            dec.decrypt(head).unwrap();
            dec.decrypt(tail).unwrap();
            assert_eq!(data, plaintext);
        }
    }

    #[test]
    fn test_cipher_rejects_partial_block() {
        let mut cipher = CipherAlgorithm::Aes128Ctr
            .create(&[0u8; 16], &[0u8; 16])
            .unwrap();
        let mut data = [0u8; 15];
        assert!(cipher.encrypt(&mut data).is_err());
    }

    #[test]
    fn test_insufficient_key_material() {
        assert!(CipherAlgorithm::Aes256Ctr.create(&[0u8; 16], &[0u8; 16]).is_err());
        assert!(MacAlgorithm::HmacSha512.create(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_mac_compute_and_verify() {
        let mac = MacAlgorithm::HmacSha256.create(&[1u8; 32]).unwrap();
        let tag = mac.compute(5, b"packet");
        assert_eq!(tag.len(), 32);
        assert!(mac.verify(5, b"packet", &tag));
        assert!(!mac.verify(6, b"packet", &tag));
        assert!(!mac.verify(5, b"packet", &tag[..31]));
    }

    #[test]
    fn test_mac_matches_hmac_crate() {
        let key = [0x0bu8; 20];
        let mac = MacAlgorithm::HmacSha1.create(&key).unwrap();

        let mut reference = Hmac::<Sha1>::new_from_slice(&key).unwrap();
        reference.update(&[0, 0, 0, 3]);
        reference.update(b"abc");
        assert_eq!(mac.compute(3, b"abc"), reference.finalize().into_bytes().to_vec());
    }

    #[test]
    fn test_default_algorithms_validate() {
        let algorithms = Algorithms::default();
        algorithms.validate().unwrap();
        assert_eq!(algorithms.cipher_names()[0], "aes256-ctr");
        assert!(algorithms.cipher("aes128-ctr").is_ok());
        assert!(algorithms.mac("hmac-md5").is_err());
    }

    #[test]
    fn test_restrict_and_register() {
        let algorithms = Algorithms::default()
            .with_ciphers(&["aes128-ctr", "bogus", "aes256-ctr"])
            .register_mac(MacEntry::new(
                "hmac-sha2-256",
                32,
                Arc::new(|key| MacAlgorithm::HmacSha256.create(key)),
            ));
        assert_eq!(algorithms.cipher_names(), vec!["aes128-ctr", "aes256-ctr"]);
        assert_eq!(algorithms.mac_names()[0], "hmac-sha2-256");
        assert_eq!(
            algorithms
                .mac_names()
                .iter()
                .filter(|n| *n == "hmac-sha2-256")
                .count(),
            1
        );
    }

    #[test]
    fn test_validate_rejects_unknown_kex() {
        let algorithms = Algorithms::default().with_kex(["ecdh-sha2-nistp521"]);
        assert!(matches!(
            algorithms.validate(),
            Err(ConduitError::Config(_))
        ));
        let algorithms = Algorithms::default().with_host_key(["ssh-dss"]);
        assert!(algorithms.validate().is_err());
    }
}
