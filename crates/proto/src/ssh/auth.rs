//! SSH authentication protocol messages (RFC 4252).
//!
//! Message bodies for the `ssh-userauth` service. The client-side flow that
//! drives them lives in [`super::authenticator`].
//!
//! # Example
//!
//! ```rust
//! use conduit_proto::ssh::auth::{AuthMethod, AuthRequest};
//!
//! let auth = AuthRequest::new(
//!     "alice",
//!     "ssh-connection",
//!     AuthMethod::Password("secret".to_string()),
//! );
//! assert_eq!(auth.method().name(), "password");
//! ```

use bytes::{BufMut, BytesMut};
use conduit_platform::ConduitResult;
use zeroize::Zeroize;

use super::message::MessageType;
use super::wire::{
    expect_message_type, read_bool, read_bytes, read_name_list, read_remaining, read_string,
    write_bool, write_bytes, write_name_list, write_string,
};

/// SSH authentication method carried in a USERAUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// "none", used to query the methods the server accepts.
    None,
    /// "password"
    Password(String),
    /// "publickey", with or without a signature.
    PublicKey {
        /// Algorithm name (e.g., "ssh-ed25519")
        algorithm: String,
        /// Public key blob
        public_key: Vec<u8>,
        /// Signature, absent for a key probe
        signature: Option<Vec<u8>>,
    },
    /// Any other method; method-specific fields left raw.
    Other {
        /// Method name
        name: String,
        /// Method-specific fields
        data: Vec<u8>,
    },
}

impl AuthMethod {
    /// Returns the method name.
    pub fn name(&self) -> &str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Other { name, .. } => name,
        }
    }
}

impl Drop for AuthMethod {
    fn drop(&mut self) {
        if let AuthMethod::Password(ref mut password) = self {
            password.zeroize();
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST (RFC 4252 Section 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    user_name: String,
    service_name: String,
    method: AuthMethod,
}

impl AuthRequest {
    /// Creates a new authentication request.
    pub fn new(user_name: &str, service_name: &str, method: AuthMethod) -> Self {
        Self {
            user_name: user_name.to_string(),
            service_name: service_name.to_string(),
            method,
        }
    }

    /// Returns the user name.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the authentication method.
    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Serializes to bytes.
    ///
    /// ```text
    /// byte      SSH_MSG_USERAUTH_REQUEST (50)
    /// string    user name
    /// string    service name
    /// string    method name
    /// ....      method specific fields
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthRequest as u8);
        write_string(&mut buf, &self.user_name);
        write_string(&mut buf, &self.service_name);
        write_string(&mut buf, self.method.name());

        match &self.method {
            AuthMethod::None => {}
            AuthMethod::Password(password) => {
                // not a password change
                write_bool(&mut buf, false);
                write_string(&mut buf, password);
            }
            AuthMethod::PublicKey {
                algorithm,
                public_key,
                signature,
            } => {
                write_bool(&mut buf, signature.is_some());
                write_string(&mut buf, algorithm);
                write_bytes(&mut buf, public_key);
                if let Some(sig) = signature {
                    write_bytes(&mut buf, sig);
                }
            }
            AuthMethod::Other { data, .. } => buf.put_slice(data),
        }

        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::UserauthRequest as u8, "USERAUTH_REQUEST")?;

        let user_name = read_string(data, &mut offset)?;
        let service_name = read_string(data, &mut offset)?;
        let method_name = read_string(data, &mut offset)?;

        let method = match method_name.as_str() {
            "none" => AuthMethod::None,
            "password" => {
                let _changing = read_bool(data, &mut offset)?;
                AuthMethod::Password(read_string(data, &mut offset)?)
            }
            "publickey" => {
                let has_signature = read_bool(data, &mut offset)?;
                let algorithm = read_string(data, &mut offset)?;
                let public_key = read_bytes(data, &mut offset)?;
                let signature = if has_signature {
                    Some(read_bytes(data, &mut offset)?)
                } else {
                    None
                };
                AuthMethod::PublicKey {
                    algorithm,
                    public_key,
                    signature,
                }
            }
            _ => AuthMethod::Other {
                name: method_name,
                data: read_remaining(data, &mut offset),
            },
        };

        Ok(Self {
            user_name,
            service_name,
            method,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Methods that can continue
    pub methods: Vec<String>,
    /// Partial success flag
    pub partial_success: bool,
}

impl AuthFailure {
    /// Creates a new failure message.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods,
            partial_success,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthFailure as u8);
        write_name_list(&mut buf, &self.methods);
        write_bool(&mut buf, self.partial_success);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::UserauthFailure as u8, "USERAUTH_FAILURE")?;
        Ok(Self {
            methods: read_name_list(data, &mut offset)?,
            partial_success: read_bool(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_USERAUTH_BANNER (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    /// Banner text
    pub message: String,
    /// Language tag
    pub language_tag: String,
}

impl AuthBanner {
    /// Creates a new banner.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            language_tag: String::new(),
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthBanner as u8);
        write_string(&mut buf, &self.message);
        write_string(&mut buf, &self.language_tag);
        buf.to_vec()
    }

    /// Parses from bytes.
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::UserauthBanner as u8, "USERAUTH_BANNER")?;
        Ok(Self {
            message: read_string(data, &mut offset)?,
            language_tag: read_string(data, &mut offset)?,
        })
    }
}

/// SSH_MSG_USERAUTH_PK_OK (RFC 4252 Section 7).
///
/// Shares message number 60 with other method-specific replies, so it is
/// parsed by the authenticator from a method-specific payload rather than
/// by the generic message decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPkOk {
    /// Algorithm name
    pub algorithm: String,
    /// Public key blob
    pub public_key: Vec<u8>,
}

impl AuthPkOk {
    /// Parses from a full payload (message number included).
    pub fn from_bytes(data: &[u8]) -> ConduitResult<Self> {
        let mut offset =
            expect_message_type(data, MessageType::UserauthPkOk as u8, "USERAUTH_PK_OK")?;
        Ok(Self {
            algorithm: read_string(data, &mut offset)?,
            public_key: read_bytes(data, &mut offset)?,
        })
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthPkOk as u8);
        write_string(&mut buf, &self.algorithm);
        write_bytes(&mut buf, &self.public_key);
        buf.to_vec()
    }
}

/// Builds the data a client signs for publickey authentication
/// (RFC 4252 Section 7).
///
/// ```text
/// string    session identifier
/// byte      SSH_MSG_USERAUTH_REQUEST (50)
/// string    user name
/// string    service name
/// string    "publickey"
/// boolean   TRUE
/// string    public key algorithm name
/// string    public key blob
/// ```
pub fn construct_signature_data(
    session_id: &[u8],
    user_name: &str,
    service_name: &str,
    algorithm: &str,
    public_key_blob: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    write_bytes(&mut buf, session_id);
    buf.put_u8(MessageType::UserauthRequest as u8);
    write_string(&mut buf, user_name);
    write_string(&mut buf, service_name);
    write_string(&mut buf, "publickey");
    write_bool(&mut buf, true);
    write_string(&mut buf, algorithm);
    write_bytes(&mut buf, public_key_blob);
    buf.to_vec()
}
