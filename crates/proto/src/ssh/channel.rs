//! SSH channels (RFC 4254 Section 5).
//!
//! The multiplexer owns each channel's shared state; applications hold a
//! cheap, cloneable [`Channel`] handle. Once a channel reaches
//! [`ChannelState::Closed`] the handle is inert: writes and requests fail
//! with [`ConduitError::ChannelClosed`] and [`Channel::read`] returns `None`
//! once the events received before the close are drained.
//!
//! # Flow control
//!
//! Outbound data is chunked to the peer's maximum packet size (capped at
//! [`MAX_DATA_CHUNK`]) and never
//! exceeds the window the peer granted; a writer suspends until a
//! `CHANNEL_WINDOW_ADJUST` arrives or the channel closes. Inbound data
//! shrinks our receive window, and when it falls below the low-water mark the
//! multiplexer tops it back up with a single adjust.
//!
//! # Close protocol
//!
//! ```text
//! Open --close()--> Closing --peer CLOSE--> Closed
//! Open --peer CLOSE (answered automatically)--> Closed
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use conduit_platform::{ConduitError, ConduitResult};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use super::connection::{
    ChannelClose, ChannelData, ChannelEof, ChannelRequest, ChannelRequestType, ChannelType,
    ExtendedDataType, TerminalModes,
};
use super::logging;
use super::message::Message;
use super::packet::MAX_PACKET_SIZE;
use super::session::DisconnectInfo;
use super::wait::{DisconnectRecord, PendingWait, WaitRegistry, WaitResult};

/// Default receive window (2 MiB).
pub const DEFAULT_WINDOW_SIZE: u32 = 2 * 1024 * 1024;

/// Default maximum packet size we accept (32 KiB).
pub const DEFAULT_MAX_PACKET: u32 = 32 * 1024;

/// Largest CHANNEL_DATA payload we put in one packet, whatever the peer
/// advertises. Keeps every frame under [`MAX_PACKET_SIZE`].
pub const MAX_DATA_CHUNK: u32 = 32 * 1024;

// room for the CHANNEL_DATA header, padding and the length field
const _: () = assert!(MAX_DATA_CHUNK as usize + 64 < MAX_PACKET_SIZE);

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// CHANNEL_OPEN sent, no answer yet
    Opening,
    /// Open and usable
    Open,
    /// Our CHANNEL_CLOSE sent, waiting for the peer's
    Closing,
    /// Close both sent and received, or the session ended
    Closed,
}

/// Local parameters for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Receive window advertised at open and restored by each adjust
    pub initial_window: u32,
    /// Largest data packet we accept
    pub max_packet: u32,
    /// Receive window level below which an adjust is sent
    pub low_water_mark: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_MAX_PACKET)
    }
}

impl ChannelOptions {
    /// Options with the low-water mark at a quarter of the window.
    pub fn new(initial_window: u32, max_packet: u32) -> Self {
        Self {
            initial_window,
            max_packet,
            low_water_mark: initial_window / 4,
        }
    }

    /// Overrides the low-water mark.
    pub fn with_low_water_mark(mut self, low_water_mark: u32) -> Self {
        self.low_water_mark = low_water_mark;
        self
    }

    /// Checks the options are usable.
    pub fn validate(&self) -> ConduitResult<()> {
        if self.initial_window == 0 {
            return Err(ConduitError::Config("channel window must be non-zero".into()));
        }
        if self.max_packet == 0 {
            return Err(ConduitError::Config("channel max packet must be non-zero".into()));
        }
        if self.low_water_mark > self.initial_window {
            return Err(ConduitError::Config(format!(
                "low-water mark {} exceeds window {}",
                self.low_water_mark, self.initial_window
            )));
        }
        Ok(())
    }
}

/// Terminal dimensions for `pty-req` and `window-change`.
///
/// Pixel sizes are optional in the protocol; zero means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalSize {
    /// Columns
    pub width_chars: u32,
    /// Rows
    pub height_rows: u32,
    /// Width in pixels
    pub width_pixels: u32,
    /// Height in pixels
    pub height_pixels: u32,
}

impl TerminalSize {
    /// Character dimensions only.
    pub fn new(width_chars: u32, height_rows: u32) -> Self {
        Self {
            width_chars,
            height_rows,
            width_pixels: 0,
            height_pixels: 0,
        }
    }

    /// Adds pixel dimensions.
    pub fn with_pixels(mut self, width_pixels: u32, height_pixels: u32) -> Self {
        self.width_pixels = width_pixels;
        self.height_pixels = height_pixels;
        self
    }
}

/// Something that happened on a channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// CHANNEL_DATA payload
    Data(Vec<u8>),
    /// CHANNEL_EXTENDED_DATA payload (stderr for sessions)
    ExtendedData {
        /// Data type code
        data_type: ExtendedDataType,
        /// Payload
        data: Vec<u8>,
    },
    /// Peer will send no more data
    Eof,
    /// Remote command exited
    ExitStatus(u32),
    /// Remote command was killed by a signal
    ExitSignal {
        /// Signal name without "SIG"
        signal_name: String,
        /// Whether a core was dumped
        core_dumped: bool,
        /// Error message
        error_message: String,
    },
}

/// Where channel handles send their messages. Implemented by the session,
/// which applies the connected-state check and the key exchange gate.
#[async_trait]
pub(crate) trait MessageSink: Send + Sync {
    async fn send_message(&self, message: Message) -> ConduitResult<()>;
}

struct ChannelInner {
    remote_id: u32,
    state: ChannelState,
    send_window: u32,
    remote_max_packet: u32,
    recv_window: u32,
    local_eof: bool,
    remote_eof: bool,
    close_sent: bool,
    close_received: bool,
    next_request: u64,
    events: Option<mpsc::UnboundedSender<ChannelEvent>>,
}

/// State shared between the multiplexer and every handle.
pub(crate) struct ChannelShared {
    local_id: u32,
    channel_type: ChannelType,
    options: ChannelOptions,
    inner: Mutex<ChannelInner>,
    window: Notify,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    requests: WaitRegistry<u64, ()>,
    // held from registration to send so replies match in send order
    request_order: tokio::sync::Mutex<()>,
}

impl ChannelShared {
    pub(crate) fn new(
        local_id: u32,
        channel_type: ChannelType,
        options: ChannelOptions,
        record: DisconnectRecord,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            local_id,
            channel_type,
            options,
            inner: Mutex::new(ChannelInner {
                remote_id: 0,
                state: ChannelState::Opening,
                send_window: 0,
                remote_max_packet: 0,
                recv_window: options.initial_window,
                local_eof: false,
                remote_eof: false,
                close_sent: false,
                close_received: false,
                next_request: 0,
                events: Some(tx),
            }),
            window: Notify::new(),
            events: tokio::sync::Mutex::new(rx),
            requests: WaitRegistry::new(record),
            request_order: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn local_id(&self) -> u32 {
        self.local_id
    }

    pub(crate) fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.lock().state
    }

    pub(crate) fn remote_id(&self) -> u32 {
        self.lock().remote_id
    }

    /// Opening -> Open with the peer's parameters.
    pub(crate) fn confirm(&self, remote_id: u32, window: u32, max_packet: u32) {
        let mut inner = self.lock();
        inner.remote_id = remote_id;
        inner.send_window = window;
        inner.remote_max_packet = max_packet.max(1);
        inner.state = ChannelState::Open;
    }

    /// Accounts inbound data and delivers it. Returns the bytes to add in a
    /// window adjust when the window fell below the low-water mark.
    pub(crate) fn on_data(&self, event: ChannelEvent, len: usize) -> Option<(u32, u32)> {
        let mut inner = self.lock();
        if inner.state == ChannelState::Closed {
            debug!(channel = self.local_id, "data on closed channel ignored");
            return None;
        }

        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if len > inner.recv_window {
            warn!(
                channel = self.local_id,
                len,
                window = inner.recv_window,
                "peer exceeded receive window"
            );
            inner.recv_window = 0;
        } else {
            inner.recv_window -= len;
        }

        if inner.local_eof || inner.remote_eof {
            trace!(channel = self.local_id, len, "data after EOF discarded");
        } else if let Some(tx) = &inner.events {
            let _ = tx.send(event);
        }

        if inner.recv_window < self.options.low_water_mark && !inner.close_sent {
            let bytes_to_add = self.options.initial_window - inner.recv_window;
            inner.recv_window = self.options.initial_window;
            logging::log_window_adjust(self.local_id, bytes_to_add, inner.recv_window);
            return Some((inner.remote_id, bytes_to_add));
        }
        None
    }

    pub(crate) fn on_window_adjust(&self, bytes_to_add: u32) {
        {
            let mut inner = self.lock();
            inner.send_window = inner.send_window.saturating_add(bytes_to_add);
            trace!(channel = self.local_id, window = inner.send_window, "send window grown");
        }
        self.window.notify_waiters();
    }

    pub(crate) fn on_eof(&self) {
        let mut inner = self.lock();
        if inner.remote_eof {
            return;
        }
        inner.remote_eof = true;
        if let Some(tx) = &inner.events {
            let _ = tx.send(ChannelEvent::Eof);
        }
        logging::log_channel_event(self.local_id, "remote eof");
    }

    pub(crate) fn push_event(&self, event: ChannelEvent) {
        if let Some(tx) = &self.lock().events {
            let _ = tx.send(event);
        }
    }

    /// Peer sent CHANNEL_CLOSE. Returns the remote id to answer with our own
    /// CHANNEL_CLOSE if we have not sent one yet.
    pub(crate) fn on_close(&self) -> Option<u32> {
        let reply = {
            let mut inner = self.lock();
            inner.close_received = true;
            let reply = if inner.close_sent {
                None
            } else {
                inner.close_sent = true;
                Some(inner.remote_id)
            };
            inner.state = ChannelState::Closed;
            inner.events = None;
            reply
        };
        self.window.notify_waiters();
        self.requests
            .resolve_all(WaitResult::Failed(ConduitError::ChannelClosed(self.local_id)));
        logging::log_channel_event(self.local_id, "closed");
        reply
    }

    pub(crate) fn on_request_reply(&self, success: bool) -> bool {
        let result = if success {
            WaitResult::Succeeded(())
        } else {
            WaitResult::Failed(ConduitError::RequestRejected(format!(
                "channel {} request",
                self.local_id
            )))
        };
        self.requests.resolve_first(result)
    }

    /// Nobody took the handle for a freshly confirmed channel: start the
    /// close handshake. Returns the remote id for our CHANNEL_CLOSE.
    pub(crate) fn abandon(&self) -> Option<u32> {
        let remote_id = {
            let mut inner = self.lock();
            if inner.close_sent || inner.state == ChannelState::Closed {
                return None;
            }
            inner.close_sent = true;
            inner.state = ChannelState::Closing;
            inner.events = None;
            inner.remote_id
        };
        logging::log_channel_event(self.local_id, "abandoned");
        Some(remote_id)
    }

    /// Ends the channel without a close handshake (open failure, teardown).
    pub(crate) fn force_close(&self, info: Option<&DisconnectInfo>) {
        {
            let mut inner = self.lock();
            inner.state = ChannelState::Closed;
            inner.events = None;
        }
        self.window.notify_waiters();
        match info {
            Some(info) => {
                self.requests.close(info);
            }
            None => {
                self.requests
                    .resolve_all(WaitResult::Failed(ConduitError::ChannelClosed(self.local_id)));
            }
        }
    }
}

/// Application handle to an open channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    sink: Arc<dyn MessageSink>,
}

impl Channel {
    pub(crate) fn new(shared: Arc<ChannelShared>, sink: Arc<dyn MessageSink>) -> Self {
        Self { shared, sink }
    }

    /// Our channel number.
    pub fn local_id(&self) -> u32 {
        self.shared.local_id
    }

    /// The peer's channel number.
    pub fn remote_id(&self) -> u32 {
        self.shared.remote_id()
    }

    /// Channel type this channel was opened with.
    pub fn channel_type(&self) -> &ChannelType {
        &self.shared.channel_type
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Bytes we may still send before the peer grants more.
    pub fn send_window(&self) -> u32 {
        self.shared.lock().send_window
    }

    /// Bytes the peer may still send before we grant more.
    pub fn recv_window(&self) -> u32 {
        self.shared.lock().recv_window
    }

    /// Peer's maximum packet size.
    pub fn remote_max_packet(&self) -> u32 {
        self.shared.lock().remote_max_packet
    }

    fn closed(&self) -> ConduitError {
        ConduitError::ChannelClosed(self.shared.local_id)
    }

    /// Sends `data`, chunked and flow controlled.
    ///
    /// Suspends while the peer's window is exhausted.
    ///
    /// # Errors
    ///
    /// [`ConduitError::ChannelClosed`] after local EOF or once closing has
    /// started; session errors from the send path.
    pub async fn write(&self, data: &[u8]) -> ConduitResult<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let (remote_id, len) = self.reserve(rest.len()).await?;
            let (chunk, tail) = rest.split_at(len);
            self.sink
                .send_message(Message::ChannelData(ChannelData::new(remote_id, chunk.to_vec())))
                .await?;
            rest = tail;
        }
        Ok(())
    }

    // Takes up to `wanted` bytes of send window.
    async fn reserve(&self, wanted: usize) -> ConduitResult<(u32, usize)> {
        loop {
            let notified = self.shared.window.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.shared.lock();
                if inner.state != ChannelState::Open || inner.local_eof || inner.close_sent {
                    return Err(self.closed());
                }
                let len = wanted
                    .min(inner.send_window as usize)
                    .min(inner.remote_max_packet.min(MAX_DATA_CHUNK) as usize);
                if len > 0 {
                    inner.send_window -= len as u32;
                    return Ok((inner.remote_id, len));
                }
            }

            trace!(channel = self.shared.local_id, "waiting for send window");
            notified.await;
        }
    }

    /// Next event, or `None` once the channel is closed and drained.
    pub async fn read(&self) -> Option<ChannelEvent> {
        self.shared.events.lock().await.recv().await
    }

    /// Sends a channel request.
    ///
    /// With `want_reply` the returned wait resolves when the peer answers;
    /// answers are matched in the order requests were sent. Without it the
    /// wait is already resolved.
    pub async fn request(
        &self,
        request_type: ChannelRequestType,
        want_reply: bool,
    ) -> ConduitResult<PendingWait<()>> {
        let _order = self.shared.request_order.lock().await;
        let (remote_id, pending) = {
            let mut inner = self.shared.lock();
            if inner.state != ChannelState::Open || inner.close_sent {
                return Err(self.closed());
            }
            let pending = if want_reply {
                let seq = inner.next_request;
                inner.next_request += 1;
                Some((seq, self.shared.requests.register(seq)?))
            } else {
                None
            };
            (inner.remote_id, pending)
        };

        debug!(
            channel = self.shared.local_id,
            request = request_type.name(),
            want_reply,
            "channel request"
        );
        let message = Message::ChannelRequest(ChannelRequest::new(remote_id, request_type, want_reply));
        if let Err(err) = self.sink.send_message(message).await {
            if let Some((seq, _)) = &pending {
                self.shared.requests.cancel(seq);
            }
            return Err(err);
        }

        Ok(match pending {
            Some((_, wait)) => wait,
            None => PendingWait::ready(WaitResult::Succeeded(())),
        })
    }

    /// Requests a pseudo-terminal.
    pub async fn request_pty(
        &self,
        term: &str,
        size: TerminalSize,
        modes: &TerminalModes,
    ) -> ConduitResult<PendingWait<()>> {
        self.request(
            ChannelRequestType::PtyReq {
                term: term.to_string(),
                width_chars: size.width_chars,
                height_rows: size.height_rows,
                width_pixels: size.width_pixels,
                height_pixels: size.height_pixels,
                modes: modes.encode(),
            },
            true,
        )
        .await
    }

    /// Starts the user's shell.
    pub async fn shell(&self) -> ConduitResult<PendingWait<()>> {
        self.request(ChannelRequestType::Shell, true).await
    }

    /// Runs a command.
    pub async fn exec(&self, command: &str) -> ConduitResult<PendingWait<()>> {
        self.request(
            ChannelRequestType::Exec {
                command: command.to_string(),
            },
            true,
        )
        .await
    }

    /// Sets an environment variable for the shell or command.
    pub async fn set_env(&self, name: &str, value: &str) -> ConduitResult<PendingWait<()>> {
        self.request(
            ChannelRequestType::Env {
                name: name.to_string(),
                value: value.to_string(),
            },
            true,
        )
        .await
    }

    /// Reports a terminal resize. No reply is requested.
    pub async fn window_change(&self, size: TerminalSize) -> ConduitResult<()> {
        self.request(
            ChannelRequestType::WindowChange {
                width_chars: size.width_chars,
                height_rows: size.height_rows,
                width_pixels: size.width_pixels,
                height_pixels: size.height_pixels,
            },
            false,
        )
        .await
        .map(|_| ())
    }

    /// Starts a subsystem such as "sftp".
    pub async fn subsystem(&self, name: &str) -> ConduitResult<PendingWait<()>> {
        self.request(
            ChannelRequestType::Subsystem {
                name: name.to_string(),
            },
            true,
        )
        .await
    }

    /// Sends a signal (name without "SIG"). No reply is requested.
    pub async fn signal(&self, name: &str) -> ConduitResult<()> {
        self.request(
            ChannelRequestType::Signal {
                name: name.to_string(),
            },
            false,
        )
        .await
        .map(|_| ())
    }

    /// Half-closes: we send no more data. Repeated calls are no-ops.
    pub async fn send_eof(&self) -> ConduitResult<()> {
        let remote_id = {
            let mut inner = self.shared.lock();
            if inner.state == ChannelState::Closed || inner.close_sent {
                return Err(self.closed());
            }
            if inner.local_eof {
                return Ok(());
            }
            inner.local_eof = true;
            inner.remote_id
        };
        self.shared.window.notify_waiters();
        logging::log_channel_event(self.shared.local_id, "local eof");
        self.sink
            .send_message(Message::ChannelEof(ChannelEof::new(remote_id)))
            .await
    }

    /// Starts closing. The state becomes `Closed` when the peer's
    /// CHANNEL_CLOSE arrives.
    pub async fn close(&self) -> ConduitResult<()> {
        let remote_id = {
            let mut inner = self.shared.lock();
            if inner.state == ChannelState::Closed {
                return Err(self.closed());
            }
            if inner.close_sent {
                return Ok(());
            }
            inner.close_sent = true;
            inner.state = ChannelState::Closing;
            inner.remote_id
        };
        self.shared.window.notify_waiters();
        logging::log_channel_event(self.shared.local_id, "closing");
        self.sink
            .send_message(Message::ChannelClose(ChannelClose::new(remote_id)))
            .await
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &self.shared.local_id)
            .field("type", &self.shared.channel_type.name())
            .field("state", &self.state())
            .finish()
    }
}
