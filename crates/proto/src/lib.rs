//! SSH2 client session engine.
//!
//! This crate drives one SSH2 connection from the client side: version
//! exchange, key exchange and re-keying, the encrypted packet transport,
//! user authentication, and any number of flow-controlled channels
//! multiplexed over the one transport.
//!
//! # Features
//!
//! - `ssh` (default) - the SSH2 client engine
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::{ChannelRequestType, Message};
//!
//! // Every SSH message has a lossless wire form
//! let msg = Message::ChannelRequest(conduit_proto::ssh::ChannelRequest::new(
//!     0,
//!     ChannelRequestType::Exec { command: "true".into() },
//!     true,
//! ));
//! let bytes = msg.encode();
//! assert_eq!(Message::decode(&bytes).unwrap(), msg);
//! ```
//!
//! # Security
//!
//! - All cryptographic operations use vetted libraries (`ring`, RustCrypto,
//!   `ed25519-dalek`)
//! - MAC comparisons are constant-time
//! - Key material is zeroized on drop with `zeroize`
//! - Decoders are fuzzed (`fuzz/`)
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;
