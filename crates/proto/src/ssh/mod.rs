//! SSH2 client session engine (RFC 4251-4254).
//!
//! # Architecture
//!
//! The engine is layered:
//!
//! 1. **Wire and packets** ([`message`], [`packet`], [`connection`], [`auth`]) -
//!    message codec and binary packet framing (RFC 4253 Section 6)
//! 2. **Transport** ([`transport`], [`crypto`]) - sequence numbers, ciphers,
//!    MACs and re-key accounting
//! 3. **Key exchange** ([`kex`], [`kex_dh`], [`negotiate`], [`hostkey`]) -
//!    algorithm negotiation, DH/ECDH, host key verification, key derivation
//! 4. **Channels** ([`channel`]) - flow-controlled channel handles over a
//!    per-session channel table
//! 5. **Session** ([`session`]) - connect, receive loop, teardown, waits and
//!    observers; user authentication through [`authenticator`]
//!
//! Every operation that waits on the peer returns a [`PendingWait`], which
//! resolves exactly once: with the answer, with `TimedOut` on the caller's
//! bound, or with `Disconnected` when the session is torn down.
//!
//! # Security Considerations
//!
//! - **Input Validation**: every decoder checks lengths before slicing;
//!   packets are limited to 35000 bytes
//! - **Host keys**: the exchange hash signature is always checked and the key
//!   is then handed to the configured [`HostKeyVerifier`]
//! - **Memory Safety**: secrets are zeroized on drop using [`zeroize`]
//! - **No Unsafe Code**: pure Rust, cryptography from `ring`, the RustCrypto
//!   crates and `ed25519-dalek`
//!
//! # Example
//!
//! ```no_run
//! use conduit_proto::ssh::{Session, SessionConfig, HostKeyInfo, NoneAuthenticator};
//!
//! # async fn run(stream: conduit_platform::BoxedStream) -> conduit_platform::ConduitResult<()> {
//! let config = SessionConfig::builder()
//!     .with_host_key_verifier(|key: &HostKeyInfo| {
//!         key.fingerprint == "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU"
//!     })
//!     .build()?;
//!
//! let session = Session::new(config);
//! session.connect_stream(stream).await?;
//! session.authenticate("git", &NoneAuthenticator).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

pub mod auth;
pub mod authenticator;
pub mod channel;
pub mod config;
pub mod connection;
pub mod crypto;
mod dispatcher;
pub mod hostkey;
pub mod kex;
pub mod kex_dh;
pub mod logging;
pub mod message;
mod multiplexer;
pub mod negotiate;
pub mod observer;
pub mod packet;
pub mod session;
pub mod transport;
pub mod version;
pub mod wait;
mod wire;

// Re-export main types
pub use auth::{construct_signature_data, AuthBanner, AuthFailure, AuthMethod, AuthPkOk, AuthRequest};
pub use authenticator::{
    AuthContext, AuthOutcome, AuthResponse, Authenticator, Ed25519Authenticator,
    NoneAuthenticator, PasswordAuthenticator,
};
pub use channel::{Channel, ChannelEvent, ChannelOptions, ChannelState, TerminalSize};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest,
    ChannelRequestType, ChannelSuccess, ChannelType, ChannelWindowAdjust, ExtendedDataType,
    GlobalRequest, TerminalModes,
};
pub use crypto::{Algorithms, CipherAlgorithm, MacAlgorithm};
pub use hostkey::{
    AcceptAnyHostKey, Ed25519HostKey, FingerprintVerifier, HostKeyAlgorithm, HostKeyInfo,
    HostKeyVerifier, HostPublicKey,
};
pub use kex::{KexInit, KexState, KeyExchange};
pub use kex_dh::KexAlgorithm;
pub use message::{Disconnect, DisconnectReason, Message, MessageType};
pub use negotiate::{negotiate_algorithm, NegotiatedAlgorithms};
pub use observer::{Observers, SubscriptionId};
pub use packet::Packet;
pub use session::{DisconnectInfo, DisconnectOrigin, KeepaliveTask, Session, SessionState};
pub use transport::{DirectionKeys, PacketReader, PacketWriter, RekeyPolicy};
pub use version::{ServerIdentification, Version};
pub use wait::{PendingWait, WaitResult};
