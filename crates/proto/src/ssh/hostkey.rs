//! Host key parsing, signature verification and the verifier contract
//! (RFC 4253 Section 6.6, RFC 8332, RFC 5656, RFC 8709).
//!
//! During key exchange the server proves possession of its host key by
//! signing the exchange hash. This module parses the key blob, checks that
//! signature, and hands a [`HostKeyInfo`] to the application's
//! [`HostKeyVerifier`], which decides whether the key is trusted.
//!
//! # Supported Algorithms
//!
//! - `ssh-ed25519` (ed25519-dalek)
//! - `rsa-sha2-512`, `rsa-sha2-256`, `ssh-rsa` (ring)
//! - `ecdsa-sha2-nistp256`, `ecdsa-sha2-nistp384`, `ecdsa-sha2-nistp521`
//!   (p256, p384, p521)
//!
//! `ssh-dss` is recognized but never offered.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use bytes::BytesMut;
use conduit_platform::{ConduitError, ConduitResult};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use ring::signature::{
    RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
    RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA512,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::wire::{read_bytes, read_string, write_bytes, write_string};

/// Host key signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum HostKeyAlgorithm {
    /// ssh-ed25519
    SshEd25519,
    /// rsa-sha2-512
    RsaSha2_512,
    /// rsa-sha2-256
    RsaSha2_256,
    /// ssh-rsa (SHA-1)
    SshRsa,
    /// ecdsa-sha2-nistp256
    EcdsaSha2Nistp256,
    /// ecdsa-sha2-nistp384
    EcdsaSha2Nistp384,
    /// ecdsa-sha2-nistp521
    EcdsaSha2Nistp521,
    /// ssh-dss (not verifiable)
    SshDss,
}

impl HostKeyAlgorithm {
    /// Algorithms offered by default, most preferred first.
    pub const DEFAULT_PREFERENCE: [HostKeyAlgorithm; 7] = [
        HostKeyAlgorithm::SshEd25519,
        HostKeyAlgorithm::EcdsaSha2Nistp256,
        HostKeyAlgorithm::EcdsaSha2Nistp384,
        HostKeyAlgorithm::EcdsaSha2Nistp521,
        HostKeyAlgorithm::RsaSha2_512,
        HostKeyAlgorithm::RsaSha2_256,
        HostKeyAlgorithm::SshRsa,
    ];

    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            HostKeyAlgorithm::SshEd25519 => "ssh-ed25519",
            HostKeyAlgorithm::RsaSha2_512 => "rsa-sha2-512",
            HostKeyAlgorithm::RsaSha2_256 => "rsa-sha2-256",
            HostKeyAlgorithm::SshRsa => "ssh-rsa",
            HostKeyAlgorithm::EcdsaSha2Nistp256 => "ecdsa-sha2-nistp256",
            HostKeyAlgorithm::EcdsaSha2Nistp384 => "ecdsa-sha2-nistp384",
            HostKeyAlgorithm::EcdsaSha2Nistp521 => "ecdsa-sha2-nistp521",
            HostKeyAlgorithm::SshDss => "ssh-dss",
        }
    }

    /// Parses an algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ssh-ed25519" => Some(HostKeyAlgorithm::SshEd25519),
            "rsa-sha2-512" => Some(HostKeyAlgorithm::RsaSha2_512),
            "rsa-sha2-256" => Some(HostKeyAlgorithm::RsaSha2_256),
            "ssh-rsa" => Some(HostKeyAlgorithm::SshRsa),
            "ecdsa-sha2-nistp256" => Some(HostKeyAlgorithm::EcdsaSha2Nistp256),
            "ecdsa-sha2-nistp384" => Some(HostKeyAlgorithm::EcdsaSha2Nistp384),
            "ecdsa-sha2-nistp521" => Some(HostKeyAlgorithm::EcdsaSha2Nistp521),
            "ssh-dss" => Some(HostKeyAlgorithm::SshDss),
            _ => None,
        }
    }

    /// Key type name found inside the key blob. RSA signature variants all
    /// use "ssh-rsa" keys.
    pub fn key_type(&self) -> &'static str {
        match self {
            HostKeyAlgorithm::RsaSha2_512 | HostKeyAlgorithm::RsaSha2_256 => "ssh-rsa",
            other => other.name(),
        }
    }

    /// Whether this engine can check signatures made with the algorithm.
    pub fn is_verifiable(&self) -> bool {
        !matches!(self, HostKeyAlgorithm::SshDss)
    }
}

/// A parsed server public key.
#[derive(Clone)]
pub enum HostPublicKey {
    /// Ed25519 key
    Ed25519(VerifyingKey),
    /// RSA key
    Rsa {
        /// Modulus, big-endian without leading zeros
        n: Vec<u8>,
        /// Public exponent, big-endian without leading zeros
        e: Vec<u8>,
    },
    /// NIST P-256 key
    EcdsaP256(p256::ecdsa::VerifyingKey),
    /// NIST P-384 key
    EcdsaP384(p384::ecdsa::VerifyingKey),
    /// NIST P-521 key
    EcdsaP521(p521::ecdsa::VerifyingKey),
}

impl std::fmt::Debug for HostPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPublicKey::Ed25519(k) => f.debug_tuple("Ed25519").field(k).finish(),
            HostPublicKey::Rsa { n, e } => f
                .debug_struct("Rsa")
                .field("n", n)
                .field("e", e)
                .finish(),
            HostPublicKey::EcdsaP256(k) => f.debug_tuple("EcdsaP256").field(k).finish(),
            HostPublicKey::EcdsaP384(k) => f.debug_tuple("EcdsaP384").field(k).finish(),
            // p521's VerifyingKey does not implement Debug
            HostPublicKey::EcdsaP521(k) => f
                .debug_tuple("EcdsaP521")
                .field(&hex::encode(k.to_encoded_point(false).as_bytes()))
                .finish(),
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl HostPublicKey {
    /// Parses an SSH public key blob.
    pub fn parse(blob: &[u8]) -> ConduitResult<Self> {
        let mut offset = 0;
        let key_type = read_string(blob, &mut offset)?;

        match key_type.as_str() {
            "ssh-ed25519" => {
                let raw = read_bytes(blob, &mut offset)?;
                let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
                    ConduitError::ProtocolFormat(format!(
                        "Invalid Ed25519 public key length: {}",
                        raw.len()
                    ))
                })?;
                let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
                    ConduitError::HostKeyRejected(format!("Invalid Ed25519 public key: {}", e))
                })?;
                Ok(HostPublicKey::Ed25519(key))
            }
            "ssh-rsa" => {
                let e = read_bytes(blob, &mut offset)?;
                let n = read_bytes(blob, &mut offset)?;
                Ok(HostPublicKey::Rsa {
                    n: strip_leading_zeros(&n),
                    e: strip_leading_zeros(&e),
                })
            }
            "ecdsa-sha2-nistp256" => {
                let curve = read_string(blob, &mut offset)?;
                if curve != "nistp256" {
                    return Err(ConduitError::ProtocolFormat(format!(
                        "ECDSA curve mismatch: {}",
                        curve
                    )));
                }
                let point = read_bytes(blob, &mut offset)?;
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|e| {
                    ConduitError::HostKeyRejected(format!("Invalid P-256 public key: {}", e))
                })?;
                Ok(HostPublicKey::EcdsaP256(key))
            }
            "ecdsa-sha2-nistp384" => {
                let curve = read_string(blob, &mut offset)?;
                if curve != "nistp384" {
                    return Err(ConduitError::ProtocolFormat(format!(
                        "ECDSA curve mismatch: {}",
                        curve
                    )));
                }
                let point = read_bytes(blob, &mut offset)?;
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|e| {
                    ConduitError::HostKeyRejected(format!("Invalid P-384 public key: {}", e))
                })?;
                Ok(HostPublicKey::EcdsaP384(key))
            }
            "ecdsa-sha2-nistp521" => {
                let curve = read_string(blob, &mut offset)?;
                if curve != "nistp521" {
                    return Err(ConduitError::ProtocolFormat(format!(
                        "ECDSA curve mismatch: {}",
                        curve
                    )));
                }
                let point = read_bytes(blob, &mut offset)?;
                let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&point).map_err(|e| {
                    ConduitError::HostKeyRejected(format!("Invalid P-521 public key: {}", e))
                })?;
                Ok(HostPublicKey::EcdsaP521(key))
            }
            other => Err(ConduitError::Unsupported(format!(
                "host key type {}",
                other
            ))),
        }
    }

    /// Key type name as it appears in the blob.
    pub fn key_type(&self) -> &'static str {
        match self {
            HostPublicKey::Ed25519(_) => "ssh-ed25519",
            HostPublicKey::Rsa { .. } => "ssh-rsa",
            HostPublicKey::EcdsaP256(_) => "ecdsa-sha2-nistp256",
            HostPublicKey::EcdsaP384(_) => "ecdsa-sha2-nistp384",
            HostPublicKey::EcdsaP521(_) => "ecdsa-sha2-nistp521",
        }
    }

    /// Key size in bits.
    pub fn bits(&self) -> usize {
        match self {
            HostPublicKey::Ed25519(_) => 256,
            HostPublicKey::Rsa { n, .. } => match n.first() {
                Some(&top) => (n.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
                None => 0,
            },
            HostPublicKey::EcdsaP256(_) => 256,
            HostPublicKey::EcdsaP384(_) => 384,
            HostPublicKey::EcdsaP521(_) => 521,
        }
    }

    /// Verifies a signature blob over `data` for the negotiated algorithm.
    ///
    /// Fails with [`ConduitError::HostKeyRejected`] if the blob names a
    /// different algorithm or the signature does not check out.
    pub fn verify(
        &self,
        algorithm: HostKeyAlgorithm,
        data: &[u8],
        signature_blob: &[u8],
    ) -> ConduitResult<()> {
        if algorithm.key_type() != self.key_type() {
            return Err(ConduitError::HostKeyRejected(format!(
                "{} key cannot be used for {}",
                self.key_type(),
                algorithm.name()
            )));
        }

        let mut offset = 0;
        let format = read_string(signature_blob, &mut offset)?;
        let signature = read_bytes(signature_blob, &mut offset)?;

        if format != algorithm.name() {
            return Err(ConduitError::HostKeyRejected(format!(
                "Signature format {} does not match negotiated {}",
                format,
                algorithm.name()
            )));
        }

        let valid = match self {
            HostPublicKey::Ed25519(key) => ed25519_dalek::Signature::from_slice(&signature)
                .map(|sig| key.verify(data, &sig).is_ok())
                .unwrap_or(false),
            HostPublicKey::Rsa { n, e } => {
                let params = match algorithm {
                    HostKeyAlgorithm::RsaSha2_512 => &RSA_PKCS1_2048_8192_SHA512,
                    HostKeyAlgorithm::RsaSha2_256 => &RSA_PKCS1_2048_8192_SHA256,
                    _ => &RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
                };
                RsaPublicKeyComponents { n, e }
                    .verify(params, data, &signature)
                    .is_ok()
            }
            HostPublicKey::EcdsaP256(key) => {
                let raw = ecdsa_signature_bytes(&signature, 32)?;
                p256::ecdsa::Signature::from_slice(&raw)
                    .map(|sig| signature::Verifier::verify(key, data, &sig).is_ok())
                    .unwrap_or(false)
            }
            HostPublicKey::EcdsaP384(key) => {
                let raw = ecdsa_signature_bytes(&signature, 48)?;
                p384::ecdsa::Signature::from_slice(&raw)
                    .map(|sig| signature::Verifier::verify(key, data, &sig).is_ok())
                    .unwrap_or(false)
            }
            HostPublicKey::EcdsaP521(key) => {
                let raw = ecdsa_signature_bytes(&signature, 66)?;
                p521::ecdsa::Signature::from_slice(&raw)
                    .map(|sig| signature::Verifier::verify(key, data, &sig).is_ok())
                    .unwrap_or(false)
            }
        };

        if valid {
            Ok(())
        } else {
            Err(ConduitError::HostKeyRejected(format!(
                "{} signature verification failed",
                algorithm.name()
            )))
        }
    }
}

/// Converts the SSH ECDSA signature body (`mpint r, mpint s`) into the fixed
/// `r || s` layout the RustCrypto types expect.
fn ecdsa_signature_bytes(body: &[u8], scalar_len: usize) -> ConduitResult<Vec<u8>> {
    let mut offset = 0;
    let r = strip_leading_zeros(&read_bytes(body, &mut offset)?);
    let s = strip_leading_zeros(&read_bytes(body, &mut offset)?);

    if r.len() > scalar_len || s.len() > scalar_len {
        return Err(ConduitError::HostKeyRejected(
            "ECDSA signature scalar too long".to_string(),
        ));
    }

    let mut out = vec![0u8; scalar_len * 2];
    out[scalar_len - r.len()..scalar_len].copy_from_slice(&r);
    out[scalar_len * 2 - s.len()..].copy_from_slice(&s);
    Ok(out)
}

/// OpenSSH style fingerprint: `SHA256:` followed by unpadded base64.
pub fn fingerprint_sha256(key_blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(key_blob)))
}

/// Everything the application learns about the server's host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyInfo {
    /// Negotiated host key algorithm name
    pub algorithm: String,
    /// Raw public key blob
    pub key_blob: Vec<u8>,
    /// Key size in bits
    pub key_bits: usize,
    /// SHA256 fingerprint
    pub fingerprint: String,
}

impl HostKeyInfo {
    /// Builds the info record for a parsed key.
    pub fn new(algorithm: HostKeyAlgorithm, key: &HostPublicKey, key_blob: &[u8]) -> Self {
        Self {
            algorithm: algorithm.name().to_string(),
            key_blob: key_blob.to_vec(),
            key_bits: key.bits(),
            fingerprint: fingerprint_sha256(key_blob),
        }
    }
}

/// Decides whether a server host key is trusted.
///
/// Called synchronously from the receive loop once the signature has been
/// checked; returning `false` tears the session down with
/// `HOST_KEY_NOT_VERIFIABLE`.
pub trait HostKeyVerifier: Send + Sync {
    /// Returns true to trust `key`.
    fn verify(&self, key: &HostKeyInfo) -> bool;
}

impl<F> HostKeyVerifier for F
where
    F: Fn(&HostKeyInfo) -> bool + Send + Sync,
{
    fn verify(&self, key: &HostKeyInfo) -> bool {
        self(key)
    }
}

/// Trusts every host key. Only suitable for tests and lab setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyHostKey;

impl HostKeyVerifier for AcceptAnyHostKey {
    fn verify(&self, _key: &HostKeyInfo) -> bool {
        true
    }
}

/// Trusts only keys whose SHA256 fingerprint is in a fixed set.
#[derive(Debug, Clone, Default)]
pub struct FingerprintVerifier {
    fingerprints: Vec<String>,
}

impl FingerprintVerifier {
    /// Creates a verifier for the given `SHA256:...` fingerprints.
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fingerprints: fingerprints.into_iter().map(Into::into).collect(),
        }
    }
}

impl HostKeyVerifier for FingerprintVerifier {
    fn verify(&self, key: &HostKeyInfo) -> bool {
        self.fingerprints.iter().any(|f| *f == key.fingerprint)
    }
}

/// Ed25519 key pair that can produce SSH signature blobs.
///
/// Used as the client identity for publickey authentication, and by test
/// peers to sign the exchange hash.
pub struct Ed25519HostKey {
    signing_key: SigningKey,
}

impl Ed25519HostKey {
    /// Generates a random key pair.
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(secret.as_mut());
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Loads a key pair from its 32-byte seed.
    pub fn from_bytes(secret: &[u8]) -> ConduitResult<Self> {
        let seed: [u8; 32] = secret.try_into().map_err(|_| {
            ConduitError::Config(format!(
                "Invalid Ed25519 key length: expected 32, got {}",
                secret.len()
            ))
        })?;
        let seed = Zeroizing::new(seed);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// SSH public key blob: `string "ssh-ed25519", string key`.
    pub fn public_key_blob(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "ssh-ed25519");
        write_bytes(&mut buf, self.signing_key.verifying_key().as_bytes());
        buf.to_vec()
    }

    /// SSH signature blob: `string "ssh-ed25519", string signature`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(data);
        let mut buf = BytesMut::new();
        write_string(&mut buf, "ssh-ed25519");
        write_bytes(&mut buf, &signature.to_bytes());
        buf.to_vec()
    }
}

impl std::fmt::Debug for Ed25519HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519HostKey")
            .field("public_key", &hex::encode(self.signing_key.verifying_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::wire::write_mpint;

    #[test]
    fn test_algorithm_names() {
        for alg in HostKeyAlgorithm::DEFAULT_PREFERENCE {
            assert_eq!(HostKeyAlgorithm::from_name(alg.name()), Some(alg));
            assert!(alg.is_verifiable());
        }
        assert!(!HostKeyAlgorithm::SshDss.is_verifiable());
        assert!(HostKeyAlgorithm::EcdsaSha2Nistp521.is_verifiable());
        assert_eq!(HostKeyAlgorithm::RsaSha2_256.key_type(), "ssh-rsa");
    }

    #[test]
    fn test_ed25519_sign_and_verify() {
        let key = Ed25519HostKey::generate();
        let blob = key.public_key_blob();
        let parsed = HostPublicKey::parse(&blob).unwrap();
        assert_eq!(parsed.key_type(), "ssh-ed25519");
        assert_eq!(parsed.bits(), 256);

        let sig = key.sign(b"exchange hash");
        parsed
            .verify(HostKeyAlgorithm::SshEd25519, b"exchange hash", &sig)
            .unwrap();

        assert!(matches!(
            parsed.verify(HostKeyAlgorithm::SshEd25519, b"other data", &sig),
            Err(ConduitError::HostKeyRejected(_))
        ));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let key = Ed25519HostKey::generate();
        let parsed = HostPublicKey::parse(&key.public_key_blob()).unwrap();
        let sig = key.sign(b"h");
        assert!(parsed.verify(HostKeyAlgorithm::RsaSha2_256, b"h", &sig).is_err());
    }

    #[test]
    fn test_ecdsa_p256_verify() {
        use signature::Signer as _;

        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let verifying_key = p256::ecdsa::VerifyingKey::from(&signing_key);
        let point = verifying_key.to_encoded_point(false);

        let mut blob = BytesMut::new();
        write_string(&mut blob, "ecdsa-sha2-nistp256");
        write_string(&mut blob, "nistp256");
        write_bytes(&mut blob, point.as_bytes());

        let sig: p256::ecdsa::Signature = signing_key.sign(b"payload");
        let raw = sig.to_bytes();
        let mut body = BytesMut::new();
        write_mpint(&mut body, &raw[..32]);
        write_mpint(&mut body, &raw[32..]);
        let mut sig_blob = BytesMut::new();
        write_string(&mut sig_blob, "ecdsa-sha2-nistp256");
        write_bytes(&mut sig_blob, &body);

        let parsed = HostPublicKey::parse(&blob).unwrap();
        assert_eq!(parsed.bits(), 256);
        parsed
            .verify(HostKeyAlgorithm::EcdsaSha2Nistp256, b"payload", &sig_blob)
            .unwrap();
        assert!(parsed
            .verify(HostKeyAlgorithm::EcdsaSha2Nistp256, b"tampered", &sig_blob)
            .is_err());
    }

    #[test]
    fn test_ecdsa_p521_verify() {
        use signature::Signer as _;

        let signing_key = p521::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let verifying_key = p521::ecdsa::VerifyingKey::from(&signing_key);
        let point = verifying_key.to_encoded_point(false);

        let mut blob = BytesMut::new();
        write_string(&mut blob, "ecdsa-sha2-nistp521");
        write_string(&mut blob, "nistp521");
        write_bytes(&mut blob, point.as_bytes());

        let sig: p521::ecdsa::Signature = signing_key.sign(b"exchange hash");
        let raw = sig.to_bytes();
        let mut body = BytesMut::new();
        write_mpint(&mut body, &raw[..66]);
        write_mpint(&mut body, &raw[66..]);
        let mut sig_blob = BytesMut::new();
        write_string(&mut sig_blob, "ecdsa-sha2-nistp521");
        write_bytes(&mut sig_blob, &body);

        let parsed = HostPublicKey::parse(&blob).unwrap();
        assert_eq!(parsed.key_type(), "ecdsa-sha2-nistp521");
        assert_eq!(parsed.bits(), 521);
        parsed
            .verify(HostKeyAlgorithm::EcdsaSha2Nistp521, b"exchange hash", &sig_blob)
            .unwrap();
        assert!(parsed
            .verify(HostKeyAlgorithm::EcdsaSha2Nistp521, b"tampered", &sig_blob)
            .is_err());
        // a P-384 signature name cannot be used with a P-521 key
        assert!(parsed
            .verify(HostKeyAlgorithm::EcdsaSha2Nistp384, b"exchange hash", &sig_blob)
            .is_err());
    }

    #[test]
    fn test_rsa_blob_parse_and_bad_signature() {
        let mut n = vec![0u8];
        n.extend_from_slice(&[0xc5; 256]);
        let mut blob = BytesMut::new();
        write_string(&mut blob, "ssh-rsa");
        write_bytes(&mut blob, &[0x01, 0x00, 0x01]);
        write_bytes(&mut blob, &n);

        let parsed = HostPublicKey::parse(&blob).unwrap();
        assert_eq!(parsed.bits(), 2048);

        let mut sig_blob = BytesMut::new();
        write_string(&mut sig_blob, "rsa-sha2-256");
        write_bytes(&mut sig_blob, &[0u8; 256]);
        assert!(parsed
            .verify(HostKeyAlgorithm::RsaSha2_256, b"data", &sig_blob)
            .is_err());
    }

    #[test]
    fn test_unsupported_key_type() {
        let mut blob = BytesMut::new();
        write_string(&mut blob, "ssh-dss");
        write_bytes(&mut blob, &[1, 2, 3]);
        assert!(matches!(
            HostPublicKey::parse(&blob),
            Err(ConduitError::Unsupported(_))
        ));
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint_sha256(b"key");
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn test_verifiers() {
        let key = Ed25519HostKey::generate();
        let blob = key.public_key_blob();
        let parsed = HostPublicKey::parse(&blob).unwrap();
        let info = HostKeyInfo::new(HostKeyAlgorithm::SshEd25519, &parsed, &blob);

        assert!(AcceptAnyHostKey.verify(&info));
        assert!(FingerprintVerifier::new([info.fingerprint.clone()]).verify(&info));
        assert!(!FingerprintVerifier::new(["SHA256:nope"]).verify(&info));

        let closure = |k: &HostKeyInfo| k.algorithm == "ssh-ed25519";
        assert!(closure.verify(&info));
    }

    #[test]
    fn test_from_bytes_length_check() {
        assert!(Ed25519HostKey::from_bytes(&[0u8; 31]).is_err());
        let a = Ed25519HostKey::from_bytes(&[7u8; 32]).unwrap();
        let b = Ed25519HostKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(a.public_key_blob(), b.public_key_blob());
    }
}
