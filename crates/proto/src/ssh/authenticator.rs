//! Client authentication (RFC 4252).
//!
//! An [`Authenticator`] runs one method against the server through an
//! [`AuthContext`]. The session sends the `ssh-userauth` service request
//! first and hands the authenticator a context bound to the session id and
//! user name.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run(session: &conduit_proto::ssh::Session) -> conduit_platform::ConduitResult<()> {
//! use conduit_proto::ssh::{AuthOutcome, PasswordAuthenticator};
//!
//! let outcome = session
//!     .authenticate("alice", &PasswordAuthenticator::new("secret"))
//!     .await?;
//! assert_eq!(outcome, AuthOutcome::Authenticated);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use conduit_platform::{ConduitError, ConduitResult};
use tracing::debug;
use zeroize::Zeroizing;

use super::auth::{construct_signature_data, AuthMethod, AuthPkOk, AuthRequest};
use super::hostkey::Ed25519HostKey;
use super::message::MessageType;
use super::wait::PendingWait;

/// Service authenticated users are granted.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// Service requested before authentication starts.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// One server answer to a USERAUTH_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    /// SSH_MSG_USERAUTH_SUCCESS
    Success,
    /// SSH_MSG_USERAUTH_FAILURE
    Failure {
        /// Methods that may continue
        methods: Vec<String>,
        /// Whether the request succeeded as one step of several
        partial_success: bool,
    },
    /// Method-specific reply (message numbers 60-79), as a full payload
    /// including the message number.
    MethodSpecific(Vec<u8>),
}

/// Result of running an authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The server accepted the user
    Authenticated,
    /// The server refused this method
    Rejected {
        /// Methods the server will still accept
        methods: Vec<String>,
        /// Whether this method succeeded as one step of several
        partial_success: bool,
    },
}

impl AuthOutcome {
    /// Whether the user is now authenticated.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated)
    }
}

/// Sends USERAUTH_REQUESTs and registers the wait for the reply.
#[async_trait]
pub(crate) trait AuthTransport: Send + Sync {
    async fn send_auth_request(
        &self,
        request: AuthRequest,
    ) -> ConduitResult<PendingWait<AuthResponse>>;
}

/// What an authenticator can see and do.
pub struct AuthContext<'a> {
    transport: &'a dyn AuthTransport,
    session_id: &'a [u8],
    user: &'a str,
}

impl<'a> AuthContext<'a> {
    pub(crate) fn new(transport: &'a dyn AuthTransport, session_id: &'a [u8], user: &'a str) -> Self {
        Self {
            transport,
            session_id,
            user,
        }
    }

    /// Session identifier, for signatures.
    pub fn session_id(&self) -> &[u8] {
        self.session_id
    }

    /// User being authenticated.
    pub fn user(&self) -> &str {
        self.user
    }

    /// Service requested on success.
    pub fn service(&self) -> &str {
        CONNECTION_SERVICE
    }

    /// Sends a USERAUTH_REQUEST for `method`. Replies are matched in order.
    pub async fn send_request(&self, method: AuthMethod) -> ConduitResult<PendingWait<AuthResponse>> {
        debug!(user = self.user, method = method.name(), "sending auth request");
        self.transport
            .send_auth_request(AuthRequest::new(self.user, CONNECTION_SERVICE, method))
            .await
    }
}

/// A client authentication method.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Method name, for logs.
    fn method_name(&self) -> &str;

    /// Runs the method to completion.
    async fn authenticate(&self, ctx: &AuthContext<'_>) -> ConduitResult<AuthOutcome>;
}

/// Maps a final reply; method-specific replies are unexpected here.
fn final_outcome(response: AuthResponse, method: &str) -> ConduitResult<AuthOutcome> {
    match response {
        AuthResponse::Success => Ok(AuthOutcome::Authenticated),
        AuthResponse::Failure {
            methods,
            partial_success,
        } => Ok(AuthOutcome::Rejected {
            methods,
            partial_success,
        }),
        AuthResponse::MethodSpecific(payload) => Err(ConduitError::Unsupported(format!(
            "{} authentication: unexpected message {}",
            method,
            payload.first().copied().unwrap_or_default()
        ))),
    }
}

/// The "none" method. Mostly used to learn which methods the server offers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    fn method_name(&self) -> &str {
        "none"
    }

    async fn authenticate(&self, ctx: &AuthContext<'_>) -> ConduitResult<AuthOutcome> {
        let mut wait = ctx.send_request(AuthMethod::None).await?;
        final_outcome(wait.result(None).await?, self.method_name())
    }
}

/// Password authentication. The password is zeroized on drop.
pub struct PasswordAuthenticator {
    password: Zeroizing<String>,
}

impl PasswordAuthenticator {
    /// Creates the authenticator.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for PasswordAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthenticator")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    fn method_name(&self) -> &str {
        "password"
    }

    async fn authenticate(&self, ctx: &AuthContext<'_>) -> ConduitResult<AuthOutcome> {
        let method = AuthMethod::Password(self.password.as_str().to_owned());
        let mut wait = ctx.send_request(method).await?;
        match wait.result(None).await? {
            // SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
            AuthResponse::MethodSpecific(payload) if payload.first() == Some(&60) => {
                Err(ConduitError::Unsupported(
                    "server requires a password change".to_string(),
                ))
            }
            other => final_outcome(other, self.method_name()),
        }
    }
}

/// Ed25519 public key authentication.
///
/// By default signs straight away. With [`with_probe`](Self::with_probe) it
/// first asks whether the key is acceptable and signs only after
/// SSH_MSG_USERAUTH_PK_OK.
#[derive(Debug)]
pub struct Ed25519Authenticator {
    key: Ed25519HostKey,
    probe: bool,
}

impl Ed25519Authenticator {
    /// Public key algorithm name.
    pub const ALGORITHM: &'static str = "ssh-ed25519";

    /// Creates the authenticator.
    pub fn new(key: Ed25519HostKey) -> Self {
        Self { key, probe: false }
    }

    /// Query the key before signing.
    pub fn with_probe(mut self) -> Self {
        self.probe = true;
        self
    }

    fn signed_method(&self, ctx: &AuthContext<'_>) -> AuthMethod {
        let blob = self.key.public_key_blob();
        let data = construct_signature_data(
            ctx.session_id(),
            ctx.user(),
            ctx.service(),
            Self::ALGORITHM,
            &blob,
        );
        AuthMethod::PublicKey {
            algorithm: Self::ALGORITHM.to_string(),
            public_key: blob,
            signature: Some(self.key.sign(&data)),
        }
    }

    async fn probe(&self, ctx: &AuthContext<'_>) -> ConduitResult<Option<AuthOutcome>> {
        let blob = self.key.public_key_blob();
        let mut wait = ctx
            .send_request(AuthMethod::PublicKey {
                algorithm: Self::ALGORITHM.to_string(),
                public_key: blob.clone(),
                signature: None,
            })
            .await?;

        match wait.result(None).await? {
            AuthResponse::MethodSpecific(payload)
                if payload.first() == Some(&(MessageType::UserauthPkOk as u8)) =>
            {
                let ok = AuthPkOk::from_bytes(&payload)?;
                if ok.algorithm != Self::ALGORITHM || ok.public_key != blob {
                    return Err(ConduitError::ProtocolFormat(
                        "USERAUTH_PK_OK for a different key".to_string(),
                    ));
                }
                Ok(None)
            }
            other => final_outcome(other, self.method_name()).map(Some),
        }
    }
}

#[async_trait]
impl Authenticator for Ed25519Authenticator {
    fn method_name(&self) -> &str {
        "publickey"
    }

    async fn authenticate(&self, ctx: &AuthContext<'_>) -> ConduitResult<AuthOutcome> {
        if self.probe {
            if let Some(outcome) = self.probe(ctx).await? {
                return Ok(outcome);
            }
        }
        let mut wait = ctx.send_request(self.signed_method(ctx)).await?;
        final_outcome(wait.result(None).await?, self.method_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::hostkey::{HostKeyAlgorithm, HostPublicKey};
    use crate::ssh::wait::WaitResult;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers each request with the next scripted response.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<AuthResponse>>,
        requests: Mutex<Vec<AuthRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<AuthResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuthTransport for ScriptedTransport {
        async fn send_auth_request(
            &self,
            request: AuthRequest,
        ) -> ConduitResult<PendingWait<AuthResponse>> {
            self.requests.lock().unwrap().push(request);
            let response = self.responses.lock().unwrap().pop_front().unwrap();
            Ok(PendingWait::ready(WaitResult::Succeeded(response)))
        }
    }

    const SESSION_ID: &[u8] = &[7u8; 32];

    #[tokio::test]
    async fn test_none_reports_methods() {
        let transport = ScriptedTransport::new(vec![AuthResponse::Failure {
            methods: vec!["publickey".into(), "password".into()],
            partial_success: false,
        }]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");

        let outcome = NoneAuthenticator.authenticate(&ctx).await.unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Rejected {
                methods: vec!["publickey".into(), "password".into()],
                partial_success: false,
            }
        );
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].service_name(), "ssh-connection");
        assert_eq!(requests[0].method(), &AuthMethod::None);
    }

    #[tokio::test]
    async fn test_password_success() {
        let transport = ScriptedTransport::new(vec![AuthResponse::Success]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");

        let outcome = PasswordAuthenticator::new("hunter2")
            .authenticate(&ctx)
            .await
            .unwrap();
        assert!(outcome.is_authenticated());
        assert_eq!(
            transport.requests.lock().unwrap()[0].method(),
            &AuthMethod::Password("hunter2".into())
        );
        assert!(!format!("{:?}", PasswordAuthenticator::new("hunter2")).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_password_change_request_unsupported() {
        let transport = ScriptedTransport::new(vec![AuthResponse::MethodSpecific(vec![60, 0, 0, 0, 0])]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");
        let err = PasswordAuthenticator::new("old").authenticate(&ctx).await.unwrap_err();
        assert!(matches!(err, ConduitError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_ed25519_signature_verifies() {
        let key = Ed25519HostKey::generate();
        let blob = key.public_key_blob();
        let transport = ScriptedTransport::new(vec![AuthResponse::Success]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");

        let outcome = Ed25519Authenticator::new(key).authenticate(&ctx).await.unwrap();
        assert!(outcome.is_authenticated());

        let requests = transport.requests.lock().unwrap();
        let AuthMethod::PublicKey {
            algorithm,
            public_key,
            signature: Some(signature),
        } = requests[0].method()
        else {
            panic!("expected signed publickey request");
        };
        assert_eq!(algorithm, "ssh-ed25519");
        assert_eq!(public_key, &blob);

        let data = construct_signature_data(SESSION_ID, "alice", "ssh-connection", algorithm, &blob);
        HostPublicKey::parse(&blob)
            .unwrap()
            .verify(HostKeyAlgorithm::SshEd25519, &data, signature)
            .unwrap();
    }

    #[tokio::test]
    async fn test_ed25519_probe_then_sign() {
        let key = Ed25519HostKey::generate();
        let pk_ok = AuthPkOk {
            algorithm: "ssh-ed25519".into(),
            public_key: key.public_key_blob(),
        };
        let transport = ScriptedTransport::new(vec![
            AuthResponse::MethodSpecific(pk_ok.to_bytes()),
            AuthResponse::Success,
        ]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");

        let outcome = Ed25519Authenticator::new(key)
            .with_probe()
            .authenticate(&ctx)
            .await
            .unwrap();
        assert!(outcome.is_authenticated());

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(matches!(
            requests[0].method(),
            AuthMethod::PublicKey { signature: None, .. }
        ));
        assert!(matches!(
            requests[1].method(),
            AuthMethod::PublicKey { signature: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_ed25519_probe_refused() {
        let transport = ScriptedTransport::new(vec![AuthResponse::Failure {
            methods: vec!["password".into()],
            partial_success: false,
        }]);
        let ctx = AuthContext::new(&transport, SESSION_ID, "alice");

        let outcome = Ed25519Authenticator::new(Ed25519HostKey::generate())
            .with_probe()
            .authenticate(&ctx)
            .await
            .unwrap();
        assert!(!outcome.is_authenticated());
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }
}
