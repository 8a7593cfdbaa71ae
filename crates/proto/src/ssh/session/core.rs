//! State shared by a [`Session`](super::Session), its receive loop, its
//! channels and its keepalive task.
//!
//! Locks, in the order they may be taken:
//!
//! 1. `kex` (tokio mutex over the key exchange machine)
//! 2. `writer` (tokio mutex over the outbound transport)
//!
//! The channel table lock is never held across a write.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use conduit_platform::{BoxedStream, ConduitError, ConduitResult};
use once_cell::sync::OnceCell;
use tokio::io::WriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::keepalive::{keepalive_message, KeepaliveTask};
use super::state::{DisconnectInfo, DisconnectOrigin, SessionState};
use crate::ssh::auth::AuthRequest;
use crate::ssh::authenticator::{AuthResponse, AuthTransport};
use crate::ssh::channel::{ChannelShared, MessageSink};
use crate::ssh::config::SessionConfig;
use crate::ssh::hostkey::HostKeyInfo;
use crate::ssh::kex::KeyExchange;
use crate::ssh::logging;
use crate::ssh::message::{Disconnect, DisconnectReason, Message};
use crate::ssh::multiplexer::ChannelMultiplexer;
use crate::ssh::negotiate::NegotiatedAlgorithms;
use crate::ssh::observer::Observers;
use crate::ssh::transport::{DirectionKeys, PacketWriter, RekeyTracker};
use crate::ssh::version::{ServerIdentification, Version};
use crate::ssh::wait::{DisconnectRecord, PendingWait, WaitRegistry, WaitResult};

pub(crate) type SessionWriter = PacketWriter<WriteHalf<BoxedStream>>;

struct WriterState {
    writer: SessionWriter,
    // set from our KEXINIT until our NEWKEYS is written
    kex_active: bool,
    // loop-originated messages held back while kex_active
    deferred: VecDeque<Message>,
}

pub(crate) struct SessionCore {
    weak: Weak<SessionCore>,
    pub(crate) config: SessionConfig,
    client_version: Version,
    state: watch::Sender<SessionState>,
    used: AtomicBool,
    teardown_started: AtomicBool,

    writer: tokio::sync::Mutex<Option<WriterState>>,
    // open (true) unless a key exchange holds application writes back
    gate: watch::Sender<bool>,
    pub(crate) kex: tokio::sync::Mutex<KeyExchange>,
    kex_started: Mutex<Option<Instant>>,
    kex_epoch: AtomicU64,
    tracker: Mutex<RekeyTracker>,

    session_id: OnceCell<Vec<u8>>,
    server: OnceCell<ServerIdentification>,
    negotiated: Mutex<Option<NegotiatedAlgorithms>>,
    pub(crate) record: DisconnectRecord,

    pub(crate) multiplexer: ChannelMultiplexer,
    pub(crate) services: WaitRegistry<String, ()>,
    pub(crate) auth: WaitRegistry<u64, AuthResponse>,
    pub(crate) globals: WaitRegistry<u64, Vec<u8>>,
    pub(crate) kex_waits: WaitRegistry<u64, ()>,
    next_wait: AtomicU64,
    auth_order: tokio::sync::Mutex<()>,
    global_order: tokio::sync::Mutex<()>,

    forwards: Mutex<HashSet<(String, u32)>>,
    forwarded_tx: Mutex<Option<mpsc::UnboundedSender<Arc<ChannelShared>>>>,
    pub(crate) forwarded_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<ChannelShared>>>,
    banners: Mutex<Vec<String>>,

    pub(crate) host_key_observers: Observers<HostKeyInfo>,
    pub(crate) disconnect_observers: Observers<DisconnectInfo>,

    shutdown: watch::Sender<bool>,
    loop_done: watch::Sender<bool>,
    keepalive: Mutex<Option<KeepaliveTask>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionCore {
    pub(crate) fn new(config: SessionConfig) -> Arc<Self> {
        let record: DisconnectRecord = Arc::new(OnceCell::new());
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let client_version = Version::new(&config.software_version, None);
        let tracker = RekeyTracker::new(config.rekey_policy);

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            client_version,
            state: watch::channel(SessionState::Disconnected).0,
            used: AtomicBool::new(false),
            teardown_started: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(None),
            gate: watch::channel(true).0,
            kex: tokio::sync::Mutex::new(KeyExchange::new()),
            kex_started: Mutex::new(None),
            kex_epoch: AtomicU64::new(0),
            tracker: Mutex::new(tracker),
            session_id: OnceCell::new(),
            server: OnceCell::new(),
            negotiated: Mutex::new(None),
            multiplexer: ChannelMultiplexer::new(Arc::clone(&record)),
            services: WaitRegistry::new(Arc::clone(&record)),
            auth: WaitRegistry::new(Arc::clone(&record)),
            globals: WaitRegistry::new(Arc::clone(&record)),
            kex_waits: WaitRegistry::new(Arc::clone(&record)),
            next_wait: AtomicU64::new(0),
            auth_order: tokio::sync::Mutex::new(()),
            global_order: tokio::sync::Mutex::new(()),
            forwards: Mutex::new(HashSet::new()),
            forwarded_tx: Mutex::new(Some(forwarded_tx)),
            forwarded_rx: tokio::sync::Mutex::new(forwarded_rx),
            banners: Mutex::new(Vec::new()),
            host_key_observers: Observers::new(),
            disconnect_observers: Observers::new(),
            shutdown: watch::channel(false).0,
            loop_done: watch::channel(true).0,
            keepalive: Mutex::new(None),
            record,
            config,
        })
    }

    // ---- state ----

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, to: SessionState) {
        let mut from = to;
        let changed = self.state.send_if_modified(|state| {
            if *state == to {
                return false;
            }
            from = *state;
            *state = to;
            true
        });
        if changed {
            logging::log_state_transition(from, to);
        }
    }

    /// Claims the session for its one and only connect.
    pub(crate) fn begin_connect(&self) -> ConduitResult<()> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(ConduitError::Config("session cannot be reused".to_string()));
        }
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Connecting -> Connected. False if teardown got there first.
    pub(crate) fn mark_connected(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state != SessionState::Connecting {
                return false;
            }
            *state = SessionState::Connected;
            true
        });
        if changed {
            logging::log_state_transition(SessionState::Connecting, SessionState::Connected);
        }
        changed
    }

    pub(crate) fn was_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    pub(crate) fn teardown_started(&self) -> bool {
        self.teardown_started.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_connected(&self) -> ConduitResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConduitError::NotConnected)
        }
    }

    // ---- identity ----

    pub(crate) fn client_version(&self) -> &Version {
        &self.client_version
    }

    pub(crate) fn client_line(&self) -> String {
        self.client_version.to_string()
    }

    pub(crate) fn set_server(&self, ident: ServerIdentification) {
        if self.server.set(ident).is_err() {
            warn!("server identification already recorded");
        }
    }

    pub(crate) fn server(&self) -> Option<&ServerIdentification> {
        self.server.get()
    }

    pub(crate) fn session_id(&self) -> Option<&[u8]> {
        self.session_id.get().map(Vec::as_slice)
    }

    pub(crate) fn negotiated(&self) -> Option<NegotiatedAlgorithms> {
        lock(&self.negotiated).clone()
    }

    pub(crate) fn push_banner(&self, banner: String) {
        lock(&self.banners).push(banner);
    }

    pub(crate) fn banners(&self) -> Vec<String> {
        lock(&self.banners).clone()
    }

    pub(crate) fn next_wait_id(&self) -> u64 {
        self.next_wait.fetch_add(1, Ordering::Relaxed)
    }

    // ---- write path ----

    pub(crate) async fn install_writer(&self, writer: SessionWriter) {
        *self.writer.lock().await = Some(WriterState {
            writer,
            kex_active: false,
            deferred: VecDeque::new(),
        });
    }

    async fn write_to(&self, ws: &mut WriterState, message: &Message) -> ConduitResult<()> {
        let payload = message.encode();
        let seq = ws.writer.sequence();
        let written = ws.writer.write_payload(&payload).await?;
        logging::log_packet("send", seq, message.name(), payload.len());
        lock(&self.tracker).record(written);
        Ok(())
    }

    /// Application send path: requires `Connected` and waits out a key
    /// exchange.
    pub(crate) async fn send_gated(&self, message: Message) -> ConduitResult<()> {
        loop {
            self.ensure_connected()?;
            let mut gate = self.gate.subscribe();
            gate.wait_for(|open| *open)
                .await
                .map_err(|_| ConduitError::NotConnected)?;
            self.ensure_connected()?;

            let mut guard = self.writer.lock().await;
            let Some(ws) = guard.as_mut() else {
                return Err(ConduitError::NotConnected);
            };
            if ws.kex_active {
                continue;
            }
            let result = self.write_to(ws, &message).await;
            drop(guard);

            return match result {
                Ok(()) => {
                    self.maybe_rekey().await;
                    Ok(())
                }
                Err(err) => {
                    self.fail(err.clone());
                    Err(err)
                }
            };
        }
    }

    /// Receive-loop send path: never waits on the gate. Messages not allowed
    /// during a key exchange are deferred until our NEWKEYS.
    pub(crate) async fn send_from_loop(&self, message: Message) -> ConduitResult<()> {
        let mut guard = self.writer.lock().await;
        let ws = guard.as_mut().ok_or(ConduitError::NotConnected)?;
        if ws.kex_active && !message.allowed_during_kex() {
            trace!(msg = message.name(), "deferred until new keys");
            ws.deferred.push_back(message);
            return Ok(());
        }
        self.write_to(ws, &message).await
    }

    /// Registers a FIFO-matched wait and sends `message`, keeping
    /// registration order equal to send order.
    async fn send_fifo<T: Clone>(
        &self,
        registry: &WaitRegistry<u64, T>,
        order: &tokio::sync::Mutex<()>,
        message: Message,
    ) -> ConduitResult<PendingWait<T>> {
        let _order = order.lock().await;
        let id = self.next_wait_id();
        let wait = registry.register(id)?;
        if let Err(err) = self.send_gated(message).await {
            registry.cancel(&id);
            return Err(err);
        }
        Ok(wait)
    }

    pub(crate) async fn send_global(&self, message: Message) -> ConduitResult<PendingWait<Vec<u8>>> {
        self.send_fifo(&self.globals, &self.global_order, message).await
    }

    pub(crate) async fn request_service(&self, service: &str) -> ConduitResult<PendingWait<()>> {
        let wait = self.services.register(service.to_string())?;
        let message = Message::ServiceRequest {
            service: service.to_string(),
        };
        if let Err(err) = self.send_gated(message).await {
            self.services.cancel(&service.to_string());
            return Err(err);
        }
        Ok(wait)
    }

    /// Ready-made wait for operations attempted while not connected.
    pub(crate) fn disconnected_wait<T: Clone>(&self) -> PendingWait<T> {
        PendingWait::ready(WaitResult::Disconnected(self.disconnect_record()))
    }

    fn disconnect_record(&self) -> DisconnectInfo {
        self.record.get().cloned().unwrap_or_else(|| {
            DisconnectInfo::new(
                DisconnectOrigin::Local,
                DisconnectReason::ByApplication.code(),
                "not connected",
            )
        })
    }

    pub(crate) fn disconnect_info(&self) -> Option<DisconnectInfo> {
        self.record.get().cloned()
    }

    /// Error for callers that find the session gone.
    pub(crate) fn disconnect_error(&self) -> ConduitError {
        self.record
            .get()
            .cloned()
            .map(DisconnectInfo::into_error)
            .unwrap_or(ConduitError::NotConnected)
    }

    // ---- key exchange ----

    /// Starts a key exchange and returns a wait for its completion. The
    /// wait is withdrawn if the exchange cannot start.
    pub(crate) async fn request_kex(&self) -> ConduitResult<PendingWait<()>> {
        let id = self.next_wait_id();
        let wait = self.kex_waits.register(id)?;
        if let Err(err) = self.start_kex().await {
            self.kex_waits.cancel(&id);
            return Err(err);
        }
        Ok(wait)
    }

    /// Starts a key exchange unless one is already running.
    pub(crate) async fn start_kex(&self) -> ConduitResult<()> {
        let mut kex = self.kex.lock().await;
        if kex.in_progress() {
            return Ok(());
        }
        self.begin_kex(&mut kex, false).await
    }

    /// Sends our KEXINIT and closes the outbound gate. Caller holds the kex
    /// lock.
    pub(crate) async fn begin_kex(
        &self,
        kex: &mut KeyExchange,
        initiated_by_peer: bool,
    ) -> ConduitResult<()> {
        let mut guard = self.writer.lock().await;
        let ws = guard.as_mut().ok_or(ConduitError::NotConnected)?;
        let message = kex.start(&self.config.algorithms)?;
        ws.kex_active = true;
        self.gate.send_replace(false);

        let bytes = lock(&self.tracker).bytes();
        *lock(&self.kex_started) = Some(Instant::now());
        logging::log_kex_started(initiated_by_peer, bytes);
        self.spawn_kex_watchdog();

        self.write_to(ws, &message).await
    }

    // Tears the session down if this exchange outlives kex_timeout.
    fn spawn_kex_watchdog(&self) {
        let epoch = self.kex_epoch.load(Ordering::SeqCst);
        let weak = self.weak.clone();
        let limit = self.config.kex_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let Some(core) = weak.upgrade() else {
                return;
            };
            if core.kex_epoch.load(Ordering::SeqCst) == epoch && !core.teardown_started() {
                warn!(timeout = ?limit, "key exchange timed out");
                core.shutdown(DisconnectInfo::from_error(ConduitError::TimedOut))
                    .await;
            }
        });
    }

    /// Records the session id (first exchange only).
    pub(crate) fn set_session_id(&self, session_id: Vec<u8>) {
        let _ = self.session_id.set(session_id);
    }

    /// Writes our NEWKEYS, switches outbound keys and reopens the gate.
    pub(crate) async fn activate_outbound(
        &self,
        outbound: DirectionKeys,
        negotiated: NegotiatedAlgorithms,
    ) -> ConduitResult<()> {
        let mut guard = self.writer.lock().await;
        let ws = guard.as_mut().ok_or(ConduitError::NotConnected)?;
        self.write_to(ws, &Message::NewKeys).await?;
        ws.writer.set_keys(outbound);
        *lock(&self.negotiated) = Some(negotiated);
        ws.kex_active = false;

        while let Some(message) = ws.deferred.pop_front() {
            self.write_to(ws, &message).await?;
        }
        self.gate.send_replace(true);
        Ok(())
    }

    /// Peer's NEWKEYS processed: the exchange is over.
    pub(crate) fn complete_kex(&self) {
        self.kex_epoch.fetch_add(1, Ordering::SeqCst);
        lock(&self.tracker).reset();
        let elapsed = lock(&self.kex_started)
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        if let (Some(session_id), Some(negotiated)) = (self.session_id(), self.negotiated()) {
            logging::log_kex_complete(session_id, &negotiated, elapsed);
        }
        self.kex_waits.resolve_all(WaitResult::Succeeded(()));
    }

    /// Accounts inbound bytes.
    pub(crate) fn record_inbound(&self, bytes: usize) {
        lock(&self.tracker).record(bytes);
    }

    /// Whether a byte or time threshold has been crossed since the last
    /// completed exchange.
    pub(crate) fn rekey_due(&self) -> bool {
        lock(&self.tracker).needs_rekey()
    }

    async fn maybe_rekey(&self) {
        if self.rekey_due() {
            if let Err(err) = self.start_kex().await {
                warn!(error = %err, "re-key could not start");
            }
        }
    }

    // ---- forwarding ----

    pub(crate) fn bind_forward(&self, address: &str, port: u32) {
        lock(&self.forwards).insert((address.to_string(), port));
    }

    pub(crate) fn unbind_forward(&self, address: &str, port: u32) -> bool {
        lock(&self.forwards).remove(&(address.to_string(), port))
    }

    pub(crate) fn is_forward_bound(&self, address: &str, port: u32) -> bool {
        lock(&self.forwards).contains(&(address.to_string(), port))
    }

    /// Queues an accepted forwarded channel. False once the session is
    /// tearing down.
    pub(crate) fn deliver_forwarded(&self, shared: Arc<ChannelShared>) -> bool {
        match lock(&self.forwarded_tx).as_ref() {
            Some(tx) => tx.send(shared).is_ok(),
            None => false,
        }
    }

    // ---- keepalive ----

    pub(crate) fn start_keepalive(&self) {
        let Some(interval) = self.config.keepalive_interval else {
            return;
        };
        let weak = self.weak.clone();
        let mut task = KeepaliveTask::new(interval);
        task.start(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(core) => core.send_gated(keepalive_message(32)).await,
                    None => Err(ConduitError::NotConnected),
                }
            }
        });
        *lock(&self.keepalive) = Some(task);
    }

    // ---- teardown ----

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Asks the receive loop to end the session.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn set_loop_running(&self, running: bool) {
        self.loop_done.send_replace(!running);
    }

    /// Tears the session down in the background after a fatal send error.
    fn fail(&self, err: ConduitError) {
        if !err.is_fatal() || self.teardown_started() {
            return;
        }
        if let Some(core) = self.weak.upgrade() {
            tokio::spawn(async move {
                core.shutdown(DisconnectInfo::from_error(err)).await;
            });
        }
    }

    /// Runs teardown once. Returns false without waiting if teardown was
    /// already started by someone else.
    pub(crate) async fn shutdown(&self, info: DisconnectInfo) -> bool {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.set_state(SessionState::Disconnecting);
        let info = self.record.get_or_init(|| info).clone();
        logging::log_disconnect(&info);
        self.gate.send_replace(true);

        let notify_peer = info.origin != DisconnectOrigin::Peer
            && info.reason() != Some(DisconnectReason::ConnectionLost);
        let message = Message::Disconnect(Disconnect {
            reason_code: info.reason_code,
            description: info.description.clone(),
            language_tag: String::new(),
        });
        let close_writer = async {
            let taken = self.writer.lock().await.take();
            if let Some(mut ws) = taken {
                if notify_peer {
                    if let Err(err) = self.write_to(&mut ws, &message).await {
                        debug!(error = %err, "DISCONNECT not delivered");
                    }
                }
                if let Err(err) = ws.writer.shutdown().await {
                    trace!(error = %err, "write half shutdown failed");
                }
            }
        };
        if tokio::time::timeout(self.config.disconnect_timeout, close_writer)
            .await
            .is_err()
        {
            debug!("DISCONNECT write timed out");
        }

        let resolved = self.services.close(&info)
            + self.auth.close(&info)
            + self.globals.close(&info)
            + self.kex_waits.close(&info);
        debug!(waits = resolved, "pending waits resolved at teardown");
        self.multiplexer.teardown(&info).await;
        lock(&self.forwarded_tx).take();

        self.request_shutdown();
        if let Some(mut task) = lock(&self.keepalive).take() {
            task.stop();
        }

        self.disconnect_observers.notify(&info);
        self.set_state(SessionState::Disconnected);
        true
    }

    pub(crate) async fn wait_disconnected(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Disconnected).await;
    }

    pub(crate) async fn wait_loop_done(&self) {
        let mut rx = self.loop_done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[async_trait]
impl MessageSink for SessionCore {
    async fn send_message(&self, message: Message) -> ConduitResult<()> {
        self.send_gated(message).await
    }
}

#[async_trait]
impl AuthTransport for SessionCore {
    async fn send_auth_request(
        &self,
        request: AuthRequest,
    ) -> ConduitResult<PendingWait<AuthResponse>> {
        self.send_fifo(&self.auth, &self.auth_order, Message::UserauthRequest(request))
            .await
    }
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("state", &self.state())
            .field("server", &self.server.get().map(|s| s.line.as_str()))
            .finish_non_exhaustive()
    }
}
