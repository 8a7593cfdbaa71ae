//! Receive loop.
//!
//! One task per session owns the inbound half of the transport. It decodes
//! every packet, routes it (key exchange, authentication, global replies,
//! channels) and sends whatever protocol replies are due. A fatal error or a
//! peer DISCONNECT ends the loop and tears the session down.

use std::sync::Arc;

use conduit_platform::{BoxedStream, ConduitError, ConduitResult};
use tokio::io::ReadHalf;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::ssh::authenticator::AuthResponse;
use crate::ssh::channel::{ChannelEvent, MessageSink};
use crate::ssh::connection::{ChannelOpen, ChannelType};
use crate::ssh::kex::KexContext;
use crate::ssh::logging;
use crate::ssh::message::{DisconnectReason, Message};
use crate::ssh::multiplexer::ChannelMultiplexer;
use crate::ssh::session::core::SessionCore;
use crate::ssh::session::{DisconnectInfo, DisconnectOrigin, SessionState};
use crate::ssh::transport::{DirectionKeys, InboundPacket, PacketReader};
use crate::ssh::wait::WaitResult;

pub(crate) type SessionReader = PacketReader<ReadHalf<BoxedStream>>;

/// Routes inbound packets for one session.
pub(crate) struct Dispatcher {
    core: Arc<SessionCore>,
    reader: SessionReader,
    // inbound keys derived but not yet in force (until the peer's NEWKEYS)
    pending_inbound: Option<DirectionKeys>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub(crate) fn new(core: Arc<SessionCore>, reader: SessionReader) -> Self {
        let shutdown = core.shutdown_receiver();
        Self {
            core,
            reader,
            pending_inbound: None,
            shutdown,
        }
    }

    /// Starts the loop on its own task.
    pub(crate) fn spawn(self) {
        self.core.set_loop_running(true);
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        debug!("receive loop started");

        let ended = loop {
            let packet = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => {
                    break None;
                }
                packet = self.reader.read_packet() => packet,
            };

            let result = match packet {
                Ok(packet) => self.handle(packet).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(Some(info)) => break Some(info),
                Ok(None) => {}
                Err(err) if err.is_fatal() => {
                    break Some(DisconnectInfo::from_error(err));
                }
                Err(err) => {
                    debug!(error = %err, "non-fatal error on receive loop");
                }
            }
        };

        let info = ended.unwrap_or_else(|| {
            DisconnectInfo::new(
                DisconnectOrigin::Local,
                DisconnectReason::ByApplication.code(),
                "session dropped",
            )
        });
        if !self.core.teardown_started() {
            self.core.shutdown(info).await;
        }

        self.core.set_loop_running(false);
        debug!("receive loop stopped");
    }

    /// Handles one packet. `Some` ends the session.
    async fn handle(&mut self, packet: InboundPacket) -> ConduitResult<Option<DisconnectInfo>> {
        self.core.record_inbound(packet.wire_len);
        let message = Message::decode(&packet.payload)?;
        logging::log_packet("recv", packet.sequence, message.name(), packet.payload.len());

        let ended = self.dispatch(message, &packet).await?;

        // checked after dispatch: the peer's NEWKEYS restarts the counters
        if ended.is_none() && self.core.rekey_due() && self.core.state() == SessionState::Connected
        {
            self.core.start_kex().await?;
        }
        Ok(ended)
    }

    async fn dispatch(
        &mut self,
        message: Message,
        packet: &InboundPacket,
    ) -> ConduitResult<Option<DisconnectInfo>> {
        let core = Arc::clone(&self.core);
        let name = message.name();

        match message {
            Message::Disconnect(msg) => {
                return Ok(Some(DisconnectInfo::new(
                    DisconnectOrigin::Peer,
                    msg.reason_code,
                    msg.description,
                )));
            }
            Message::Ignore { .. } => {}
            Message::Debug {
                always_display,
                message,
                ..
            } => {
                debug!(always_display, message = %message, "peer debug message");
            }
            Message::Unimplemented { sequence_number } => {
                warn!(seq_num = sequence_number, "peer did not implement our packet");
            }
            Message::ExtInfo(extensions) => {
                debug!(count = extensions.len(), "extension info ignored");
            }

            // ---- key exchange ----
            Message::KexInit(server) => {
                let mut kex = core.kex.lock().await;
                if !kex.in_progress() {
                    core.begin_kex(&mut kex, true).await?;
                }
                let reply = kex.on_server_kexinit(&server, &packet.payload)?;
                core.send_from_loop(reply).await?;
            }
            Message::KexDhReply {
                host_key,
                f,
                signature,
            } => {
                let mut kex = core.kex.lock().await;
                let client_line = core.client_line();
                let server_line = core
                    .server()
                    .map(|ident| ident.line.clone())
                    .ok_or_else(|| {
                        ConduitError::ProtocolFormat("key exchange before version exchange".into())
                    })?;
                let ctx = KexContext {
                    client_version: &client_line,
                    server_version: &server_line,
                    session_id: core.session_id(),
                };

                let verified = kex.on_reply(&host_key, &f, &signature, &ctx)?;
                core.host_key_observers.notify(&verified.host_key);
                if !core.config.host_key_verifier.verify(&verified.host_key) {
                    return Err(ConduitError::HostKeyRejected(format!(
                        "{} {}",
                        verified.host_key.algorithm, verified.host_key.fingerprint
                    )));
                }

                let outcome = kex.finish(&core.config.algorithms, &ctx)?;
                core.set_session_id(outcome.session_id);
                core.activate_outbound(outcome.outbound, outcome.negotiated)
                    .await?;
                self.pending_inbound = Some(outcome.inbound);
            }
            Message::NewKeys => {
                let keys = self.pending_inbound.take().ok_or_else(|| {
                    ConduitError::ProtocolFormat("NEWKEYS before key exchange reply".into())
                })?;
                self.reader.set_keys(keys);
                core.kex.lock().await.reset()?;
                core.complete_kex();
            }

            // ---- service and authentication ----
            Message::ServiceAccept { service } => {
                if !core.services.resolve(&service, WaitResult::Succeeded(())) {
                    debug!(service = %service, "unsolicited SERVICE_ACCEPT");
                }
            }
            Message::UserauthSuccess => {
                core.auth.resolve_first(WaitResult::Succeeded(AuthResponse::Success));
            }
            Message::UserauthFailure(failure) => {
                core.auth.resolve_first(WaitResult::Succeeded(AuthResponse::Failure {
                    methods: failure.methods,
                    partial_success: failure.partial_success,
                }));
            }
            Message::UserauthMethodSpecific {
                message_type,
                payload,
            } => {
                let mut full = Vec::with_capacity(payload.len() + 1);
                full.push(message_type);
                full.extend_from_slice(&payload);
                core.auth
                    .resolve_first(WaitResult::Succeeded(AuthResponse::MethodSpecific(full)));
            }
            Message::UserauthBanner(banner) => {
                info!(banner = %banner.message, "authentication banner");
                core.push_banner(banner.message);
            }

            // ---- global requests ----
            Message::GlobalRequest(request) => {
                debug!(name = %request.name, "peer global request refused");
                if request.want_reply {
                    core.send_from_loop(Message::RequestFailure).await?;
                }
            }
            Message::RequestSuccess { data } => {
                core.globals.resolve_first(WaitResult::Succeeded(data));
            }
            Message::RequestFailure => {
                core.globals.resolve_first(WaitResult::Failed(ConduitError::RequestRejected(
                    "global request".to_string(),
                )));
            }

            // ---- channels ----
            Message::ChannelOpen(open) => {
                let reply = self.on_channel_open(&open).await?;
                core.send_from_loop(reply).await?;
            }
            Message::ChannelOpenConfirmation(msg) => {
                let sink: Arc<dyn MessageSink> = core.clone();
                let close = core.multiplexer.on_open_confirmation(&msg, &sink).await?;
                self.reply(close).await?;
            }
            Message::ChannelOpenFailure(msg) => {
                core.multiplexer.on_open_failure(&msg).await;
            }
            Message::ChannelWindowAdjust(msg) => {
                core.multiplexer.on_window_adjust(&msg).await;
            }
            Message::ChannelData(msg) => {
                let len = msg.data.len();
                let adjust = core
                    .multiplexer
                    .on_data(msg.recipient_channel, ChannelEvent::Data(msg.data), len)
                    .await;
                self.reply(adjust).await?;
            }
            Message::ChannelExtendedData(msg) => {
                let len = msg.data.len();
                let event = ChannelEvent::ExtendedData {
                    data_type: msg.data_type,
                    data: msg.data,
                };
                let adjust = core
                    .multiplexer
                    .on_data(msg.recipient_channel, event, len)
                    .await;
                self.reply(adjust).await?;
            }
            Message::ChannelEof(msg) => {
                core.multiplexer.on_eof(msg.recipient_channel).await;
            }
            Message::ChannelClose(msg) => {
                let answer = core.multiplexer.on_close(msg.recipient_channel).await;
                self.reply(answer).await?;
            }
            Message::ChannelRequest(msg) => {
                let answer = core.multiplexer.on_request(msg).await;
                self.reply(answer).await?;
            }
            Message::ChannelSuccess(msg) => {
                core.multiplexer
                    .on_request_reply(msg.recipient_channel, true)
                    .await;
            }
            Message::ChannelFailure(msg) => {
                core.multiplexer
                    .on_request_reply(msg.recipient_channel, false)
                    .await;
            }

            // ---- everything else ----
            Message::Unsupported { message_type, .. } => {
                logging::log_unsupported_message(packet.sequence, message_type);
                core.send_from_loop(Message::Unimplemented {
                    sequence_number: packet.sequence,
                })
                .await?;
            }
            Message::KexDhInit { .. }
            | Message::ServiceRequest { .. }
            | Message::UserauthRequest(_) => {
                debug!(msg = name, "server-only message dropped");
            }
        }

        Ok(None)
    }

    async fn reply(&mut self, message: Option<Message>) -> ConduitResult<()> {
        match message {
            Some(message) => self.core.send_from_loop(message).await,
            None => Ok(()),
        }
    }

    /// Peer-initiated opens: only forwarded-tcpip for a port we asked for.
    async fn on_channel_open(&mut self, open: &ChannelOpen) -> ConduitResult<Message> {
        let bound = match &open.channel_type {
            ChannelType::ForwardedTcpip {
                connected_address,
                connected_port,
                ..
            } => self.core.is_forward_bound(connected_address, *connected_port),
            _ => false,
        };
        if !bound {
            return Ok(ChannelMultiplexer::reject_incoming(open));
        }

        let (shared, confirmation) = self
            .core
            .multiplexer
            .accept_incoming(open, self.core.config.channel_defaults)
            .await?;
        trace!(channel = shared.local_id(), "forwarded connection accepted");
        if self.core.deliver_forwarded(Arc::clone(&shared)) {
            Ok(confirmation)
        } else {
            shared.force_close(None);
            Ok(ChannelMultiplexer::reject_incoming(open))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn require_send<T: Send>(_: &T) {}

    // The loop is handed to tokio::spawn, so its future must be Send.
    #[allow(dead_code)]
    fn loop_future_is_send(dispatcher: Dispatcher) {
        let run = dispatcher.run();
        require_send(&run);
    }

    #[test]
    fn test_loop_future_is_send() {
        let check: fn(Dispatcher) = loop_future_is_send;
        let _ = check;
    }
}
