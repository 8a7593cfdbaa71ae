//! Client session engine.
//!
//! A [`Session`] owns one transport, one receive loop and one channel table.
//! It is connected at most once; after teardown it keeps answering queries
//! (`disconnect_info`, `session_id`, ...) but every operation that would
//! touch the transport fails with [`ConduitError::NotConnected`] or resolves
//! its wait with `Disconnected`.
//!
//! # Example
//!
//! ```no_run
//! use conduit_platform::TcpConnector;
//! use conduit_proto::ssh::{
//!     AcceptAnyHostKey, PasswordAuthenticator, Session, SessionConfig,
//! };
//!
//! # async fn run() -> conduit_platform::ConduitResult<()> {
//! let config = SessionConfig::builder()
//!     .with_host_key_verifier(AcceptAnyHostKey)
//!     .build()?;
//! let session = Session::new(config);
//! session
//!     .connect(&TcpConnector::new("127.0.0.1:22".parse().unwrap()))
//!     .await?;
//! session
//!     .authenticate("alice", &PasswordAuthenticator::new("secret"))
//!     .await?;
//!
//! let channel = session.open_session().await?.result(None).await?;
//! channel.exec("uname -a").await?.result(None).await?;
//! while let Some(event) = channel.read().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub(crate) mod core;
pub mod keepalive;
pub mod state;

use std::sync::Arc;

use conduit_platform::{BoxedStream, ConduitError, ConduitResult, Connector};
use tracing::{debug, info};

use self::core::SessionCore;
use crate::ssh::authenticator::{AuthContext, AuthOutcome, Authenticator, USERAUTH_SERVICE};
use crate::ssh::channel::{Channel, ChannelOptions, ChannelState, MessageSink};
use crate::ssh::config::SessionConfig;
use crate::ssh::connection::{ChannelType, GlobalRequest};
use crate::ssh::dispatcher::Dispatcher;
use crate::ssh::hostkey::HostKeyInfo;
use crate::ssh::message::{DisconnectReason, Message};
use crate::ssh::negotiate::NegotiatedAlgorithms;
use crate::ssh::observer::SubscriptionId;
use crate::ssh::transport::{PacketReader, PacketWriter};
use crate::ssh::version::{exchange_versions, ServerIdentification, Version};
use crate::ssh::wait::{PendingWait, WaitResult};

pub use keepalive::{keepalive_message, KeepaliveTask};
pub use state::{DisconnectInfo, DisconnectOrigin, SessionState};

/// An SSH2 client session.
///
/// Dropping the session signals its receive loop to tear everything down.
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    /// Creates a never-connected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            core: SessionCore::new(config),
        }
    }

    /// Configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Opens a stream with `connector` and runs the handshake.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::Config`] if the session was already used
    /// - [`ConduitError::TimedOut`] if the stream, version exchange or key
    ///   exchange exceed their timeouts
    /// - any error that tore the session down during the handshake
    pub async fn connect(&self, connector: &dyn Connector) -> ConduitResult<()> {
        self.core.begin_connect()?;
        info!(endpoint = %connector.endpoint(), "connecting");

        let opened =
            tokio::time::timeout(self.core.config.connect_timeout, connector.connect()).await;
        let stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(self.abort_handshake(err).await),
            Err(_) => return Err(self.abort_handshake(ConduitError::TimedOut).await),
        };
        self.handshake(stream).await
    }

    /// Runs the handshake over an already open stream.
    pub async fn connect_stream(&self, stream: BoxedStream) -> ConduitResult<()> {
        self.core.begin_connect()?;
        self.handshake(stream).await
    }

    async fn handshake(&self, mut stream: BoxedStream) -> ConduitResult<()> {
        let core = &self.core;
        let exchanged = tokio::time::timeout(
            core.config.connect_timeout,
            exchange_versions(&mut stream, core.client_version(), core.config.max_banner_lines),
        )
        .await;
        let ident = match exchanged {
            Ok(Ok(ident)) => ident,
            Ok(Err(err)) => return Err(self.abort_handshake(err).await),
            Err(_) => return Err(self.abort_handshake(ConduitError::TimedOut).await),
        };
        for banner in &ident.banners {
            core.push_banner(banner.clone());
        }
        core.set_server(ident);

        let (read_half, write_half) = tokio::io::split(stream);
        core.install_writer(PacketWriter::new(write_half)).await;
        Dispatcher::new(Arc::clone(core), PacketReader::new(read_half)).spawn();

        let mut kex_done = match core.request_kex().await {
            Ok(wait) => wait,
            Err(err) => return Err(self.abort_handshake(err).await),
        };
        if let Err(err) = kex_done.result(Some(core.config.kex_timeout)).await {
            return Err(self.abort_handshake(err).await);
        }

        if !core.mark_connected() {
            return Err(core.disconnect_error());
        }
        core.start_keepalive();
        info!(
            server = %core.server().map(|s| s.line.as_str()).unwrap_or_default(),
            "session established"
        );
        Ok(())
    }

    /// Tears down a failed handshake and returns the error the caller sees.
    async fn abort_handshake(&self, err: ConduitError) -> ConduitError {
        let core = &self.core;
        if core.teardown_started() {
            core.wait_disconnected().await;
            return core.disconnect_error();
        }
        core.shutdown(DisconnectInfo::from_error(err.clone())).await;
        core.wait_loop_done().await;
        err
    }

    /// Sends `message` once the session is connected and no key exchange
    /// holds outbound traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::NotConnected`] immediately unless the state is
    /// `Connected`.
    pub async fn send_message(&self, message: Message) -> ConduitResult<()> {
        self.core.send_gated(message).await
    }

    /// Like [`send_message`](Self::send_message), reporting only success.
    pub async fn try_send_message(&self, message: Message) -> bool {
        match self.core.send_gated(message).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "send failed");
                false
            }
        }
    }

    /// Sends SSH_MSG_IGNORE with `data`.
    pub async fn send_ignore(&self, data: Vec<u8>) -> ConduitResult<()> {
        self.core.send_gated(Message::Ignore { data }).await
    }

    /// Ends the session. Idempotent; concurrent callers all return once the
    /// session is `Disconnected`.
    pub async fn disconnect(
        &self,
        reason: DisconnectReason,
        description: &str,
    ) -> ConduitResult<()> {
        let core = &self.core;
        if !core.was_used() {
            return Ok(());
        }
        let info = DisconnectInfo::new(DisconnectOrigin::Local, reason.code(), description);
        if !core.shutdown(info).await {
            core.wait_disconnected().await;
        }
        Ok(())
    }

    /// Why the session ended, once it has.
    pub fn disconnect_info(&self) -> Option<DisconnectInfo> {
        self.core.disconnect_info()
    }

    /// Resolves when the receive loop has finished. Immediate for a session
    /// that never connected.
    pub async fn closed(&self) {
        self.core.wait_loop_done().await;
    }

    /// Calls `observer` with every host key the server presents, before the
    /// verifier decides on it.
    pub fn on_host_key_received<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&HostKeyInfo) + Send + Sync + 'static,
    {
        self.core.host_key_observers.subscribe(observer)
    }

    /// Calls `observer` once when the session is torn down.
    pub fn on_disconnect<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&DisconnectInfo) + Send + Sync + 'static,
    {
        self.core.disconnect_observers.subscribe(observer)
    }

    /// Removes a subscription made with either `on_*` method.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.host_key_observers.unsubscribe(id)
            || self.core.disconnect_observers.unsubscribe(id)
    }

    /// Requests the `ssh-userauth` service and runs `authenticator`.
    pub async fn authenticate(
        &self,
        user: &str,
        authenticator: &dyn Authenticator,
    ) -> ConduitResult<AuthOutcome> {
        let core = &self.core;
        core.request_service(USERAUTH_SERVICE)
            .await?
            .result(Some(core.config.kex_timeout))
            .await?;

        let session_id = core.session_id().ok_or(ConduitError::NotConnected)?;
        let ctx = AuthContext::new(core.as_ref(), session_id, user);
        let outcome = authenticator.authenticate(&ctx).await?;
        info!(
            user = user,
            method = authenticator.method_name(),
            authenticated = outcome.is_authenticated(),
            "authentication attempt finished"
        );
        Ok(outcome)
    }

    /// Banner lines: pre-version lines and USERAUTH_BANNER messages.
    pub fn banners(&self) -> Vec<String> {
        self.core.banners()
    }

    /// The server's identification, once received.
    pub fn server_identification(&self) -> Option<&ServerIdentification> {
        self.core.server()
    }

    /// The server's parsed version, once received.
    pub fn server_version(&self) -> Option<&Version> {
        self.core.server().map(|ident| &ident.version)
    }

    /// First exchange hash, once the first key exchange completed.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.core.session_id()
    }

    /// Algorithms currently in force.
    pub fn negotiated(&self) -> Option<NegotiatedAlgorithms> {
        self.core.negotiated()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Whether application traffic is allowed.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Local ids of channels in the table.
    pub async fn channel_ids(&self) -> Vec<u32> {
        self.core.multiplexer.channel_ids().await
    }

    /// Sends SSH_MSG_GLOBAL_REQUEST. Without `want_reply` the wait is
    /// already resolved with empty data.
    pub async fn global_request(
        &self,
        name: &str,
        want_reply: bool,
        data: Vec<u8>,
    ) -> ConduitResult<PendingWait<Vec<u8>>> {
        if !self.core.is_connected() {
            return Ok(self.core.disconnected_wait());
        }
        let message = Message::GlobalRequest(GlobalRequest::new(name, want_reply, data));
        if want_reply {
            self.core.send_global(message).await
        } else {
            self.core.send_gated(message).await?;
            Ok(PendingWait::ready(WaitResult::Succeeded(Vec::new())))
        }
    }

    /// Asks the server to listen on `address:port` and forward connections
    /// back. Returns the bound port (the server's choice when `port` is 0).
    pub async fn request_port_forward(&self, address: &str, port: u32) -> ConduitResult<u32> {
        let core = &self.core;
        core.ensure_connected()?;
        let data = core
            .send_global(Message::GlobalRequest(GlobalRequest::tcpip_forward(
                address, port,
            )))
            .await?
            .result(Some(core.config.kex_timeout))
            .await?;

        let bound = if port == 0 {
            let bytes: [u8; 4] = data.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(|| {
                ConduitError::ProtocolFormat("tcpip-forward reply without a port".into())
            })?;
            u32::from_be_bytes(bytes)
        } else {
            port
        };
        core.bind_forward(address, bound);
        info!(address = address, port = bound, "remote port forward bound");
        Ok(bound)
    }

    /// Stops a forward made with
    /// [`request_port_forward`](Self::request_port_forward).
    pub async fn cancel_port_forward(&self, address: &str, port: u32) -> ConduitResult<()> {
        let core = &self.core;
        core.ensure_connected()?;
        if !core.unbind_forward(address, port) {
            debug!(address = address, port = port, "cancelling a forward we never bound");
        }
        core.send_global(Message::GlobalRequest(GlobalRequest::cancel_tcpip_forward(
            address, port,
        )))
        .await?
        .result(Some(core.config.kex_timeout))
        .await?;
        Ok(())
    }

    /// Next channel the server opened for one of our forwarded ports.
    ///
    /// # Errors
    ///
    /// Returns the teardown error once the session has ended.
    pub async fn accept_forwarded(&self) -> ConduitResult<Channel> {
        let mut rx = self.core.forwarded_rx.lock().await;
        loop {
            let Some(shared) = rx.recv().await else {
                return Err(self.core.disconnect_error());
            };
            if shared.state() == ChannelState::Closed {
                continue;
            }
            let sink: Arc<dyn MessageSink> = self.core.clone();
            return Ok(Channel::new(shared, sink));
        }
    }

    /// Starts a key exchange now. The wait resolves when it completes.
    pub async fn rekey(&self) -> ConduitResult<PendingWait<()>> {
        if !self.core.is_connected() {
            return Ok(self.core.disconnected_wait());
        }
        self.core.request_kex().await
    }

    /// Opens a channel. The wait resolves with the channel once the server
    /// confirms, or `Failed(ChannelOpenFailed)` if it refuses.
    pub async fn open_channel(
        &self,
        channel_type: ChannelType,
        options: ChannelOptions,
    ) -> ConduitResult<PendingWait<Channel>> {
        let core = &self.core;
        if !core.is_connected() {
            return Ok(core.disconnected_wait());
        }
        let (wait, open) = core.multiplexer.open(channel_type, options).await?;
        let local_id = open.sender_channel;
        if let Err(err) = core.send_gated(Message::ChannelOpen(open)).await {
            core.multiplexer.abort_open(local_id, err.clone()).await;
            return Err(err);
        }
        Ok(wait)
    }

    /// Opens a `session` channel with the configured defaults.
    pub async fn open_session(&self) -> ConduitResult<PendingWait<Channel>> {
        self.open_channel(ChannelType::Session, self.core.config.channel_defaults)
            .await
    }

    /// Opens a `direct-tcpip` channel to `host:port` with the configured
    /// defaults.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> ConduitResult<PendingWait<Channel>> {
        let channel_type = ChannelType::DirectTcpip {
            host: host.to_string(),
            port,
            originator_address: originator_address.to_string(),
            originator_port,
        };
        self.open_channel(channel_type, self.core.config.channel_defaults)
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.core.request_shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("core", &self.core).finish()
    }
}
