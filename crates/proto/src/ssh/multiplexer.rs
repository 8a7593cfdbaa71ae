//! Channel table and routing of channel-scoped messages.
//!
//! Local channel ids are allocated lowest-free-first. An id is retired only
//! when its channel is `Closed` and no [`Channel`] handle refers to it any
//! more, so an id is never reused while anything can still observe it.
//!
//! Handlers that run on the receive loop never send; they return the reply
//! (window adjust, close answer, request failure) for the loop to send once
//! the table lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_platform::{ConduitError, ConduitResult};
use tokio::sync::RwLock;
use tracing::debug;

use super::channel::{Channel, ChannelEvent, ChannelOptions, ChannelShared, ChannelState, MessageSink};
use super::connection::{
    ChannelClose, ChannelFailure, ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure,
    ChannelOpenFailureReason, ChannelRequest, ChannelRequestType, ChannelType,
    ChannelWindowAdjust,
};
use super::logging;
use super::message::Message;
use super::session::DisconnectInfo;
use super::wait::{DisconnectRecord, PendingWait, WaitRegistry, WaitResult};

pub(crate) struct ChannelMultiplexer {
    channels: RwLock<BTreeMap<u32, Arc<ChannelShared>>>,
    opens: WaitRegistry<u32, Channel>,
    record: DisconnectRecord,
}

impl ChannelMultiplexer {
    pub(crate) fn new(record: DisconnectRecord) -> Self {
        Self {
            channels: RwLock::new(BTreeMap::new()),
            opens: WaitRegistry::new(Arc::clone(&record)),
            record,
        }
    }

    fn purge(channels: &mut BTreeMap<u32, Arc<ChannelShared>>) {
        channels.retain(|id, shared| {
            let retire = shared.state() == ChannelState::Closed && Arc::strong_count(shared) == 1;
            if retire {
                debug!(channel = *id, "channel id retired");
            }
            !retire
        });
    }

    fn lowest_free(channels: &BTreeMap<u32, Arc<ChannelShared>>) -> ConduitResult<u32> {
        let mut candidate = 0u32;
        for &id in channels.keys() {
            if id != candidate {
                break;
            }
            candidate = candidate
                .checked_add(1)
                .ok_or_else(|| ConduitError::Config("channel ids exhausted".to_string()))?;
        }
        Ok(candidate)
    }

    async fn get(&self, local_id: u32) -> Option<Arc<ChannelShared>> {
        let shared = self.channels.read().await.get(&local_id).cloned();
        if shared.is_none() {
            debug!(channel = local_id, "message for unknown channel dropped");
        }
        shared
    }

    /// Allocates a channel in `Opening` and builds its CHANNEL_OPEN. The
    /// caller sends it, or calls [`abort_open`](Self::abort_open) if it
    /// cannot.
    pub(crate) async fn open(
        &self,
        channel_type: ChannelType,
        options: ChannelOptions,
    ) -> ConduitResult<(PendingWait<Channel>, ChannelOpen)> {
        options.validate()?;
        let mut channels = self.channels.write().await;
        Self::purge(&mut channels);
        let local_id = Self::lowest_free(&channels)?;

        let wait = self.opens.register(local_id)?;
        let shared = Arc::new(ChannelShared::new(
            local_id,
            channel_type.clone(),
            options,
            Arc::clone(&self.record),
        ));
        channels.insert(local_id, shared);
        logging::log_channel_event(local_id, "opening");

        let open = ChannelOpen::new(
            channel_type,
            local_id,
            options.initial_window,
            options.max_packet,
        );
        Ok((wait, open))
    }

    /// The CHANNEL_OPEN could not be sent.
    pub(crate) async fn abort_open(&self, local_id: u32, err: ConduitError) {
        if let Some(shared) = self.channels.write().await.remove(&local_id) {
            shared.force_close(None);
        }
        self.opens.resolve(&local_id, WaitResult::Failed(err));
    }

    /// Completes an open. If the caller already gave up on the open wait,
    /// returns the CHANNEL_CLOSE that releases the peer's side.
    pub(crate) async fn on_open_confirmation(
        &self,
        msg: &ChannelOpenConfirmation,
        sink: &Arc<dyn MessageSink>,
    ) -> ConduitResult<Option<Message>> {
        let Some(shared) = self.get(msg.recipient_channel).await else {
            return Ok(None);
        };
        if shared.state() != ChannelState::Opening {
            return Err(ConduitError::ProtocolFormat(format!(
                "open confirmation for channel {} which is not opening",
                msg.recipient_channel
            )));
        }

        shared.confirm(msg.sender_channel, msg.initial_window_size, msg.maximum_packet_size);
        logging::log_channel_event(msg.recipient_channel, "open");
        let channel = Channel::new(Arc::clone(&shared), Arc::clone(sink));
        let delivered = self
            .opens
            .deliver(&msg.recipient_channel, WaitResult::Succeeded(channel));
        if delivered.is_ok() {
            return Ok(None);
        }

        debug!(channel = msg.recipient_channel, "open wait abandoned, closing");
        Ok(shared
            .abandon()
            .map(|remote_id| Message::ChannelClose(ChannelClose::new(remote_id))))
    }

    pub(crate) async fn on_open_failure(&self, msg: &ChannelOpenFailure) {
        let removed = self.channels.write().await.remove(&msg.recipient_channel);
        let Some(shared) = removed else {
            debug!(channel = msg.recipient_channel, "open failure for unknown channel");
            return;
        };
        shared.force_close(None);
        debug!(
            channel = msg.recipient_channel,
            reason = msg.reason.as_str(),
            description = %msg.description,
            "channel open refused"
        );
        self.opens.resolve(
            &msg.recipient_channel,
            WaitResult::Failed(ConduitError::ChannelOpenFailed {
                reason_code: msg.reason.code(),
                description: msg.description.clone(),
            }),
        );
    }

    /// Routes CHANNEL_DATA / CHANNEL_EXTENDED_DATA. Returns a window adjust
    /// to send, if one is due.
    pub(crate) async fn on_data(
        &self,
        recipient: u32,
        event: ChannelEvent,
        len: usize,
    ) -> Option<Message> {
        let shared = self.get(recipient).await?;
        shared
            .on_data(event, len)
            .map(|(remote_id, bytes)| {
                Message::ChannelWindowAdjust(ChannelWindowAdjust::new(remote_id, bytes))
            })
    }

    pub(crate) async fn on_window_adjust(&self, msg: &ChannelWindowAdjust) {
        if let Some(shared) = self.get(msg.recipient_channel).await {
            shared.on_window_adjust(msg.bytes_to_add);
        }
    }

    pub(crate) async fn on_eof(&self, recipient: u32) {
        if let Some(shared) = self.get(recipient).await {
            shared.on_eof();
        }
    }

    /// Returns our answering CHANNEL_CLOSE when the peer closed first.
    pub(crate) async fn on_close(&self, recipient: u32) -> Option<Message> {
        let mut channels = self.channels.write().await;
        let shared = channels.get(&recipient).cloned();
        let Some(shared) = shared else {
            debug!(channel = recipient, "close for unknown channel");
            return None;
        };
        let reply = shared.on_close();
        drop(shared);
        Self::purge(&mut channels);
        reply.map(|remote_id| Message::ChannelClose(ChannelClose::new(remote_id)))
    }

    /// Handles a peer CHANNEL_REQUEST. Returns a failure reply for requests
    /// we do not serve.
    pub(crate) async fn on_request(&self, msg: ChannelRequest) -> Option<Message> {
        let shared = self.get(msg.recipient_channel).await?;
        match msg.request_type {
            ChannelRequestType::ExitStatus { exit_status } => {
                debug!(channel = msg.recipient_channel, exit_status, "exit status");
                shared.push_event(ChannelEvent::ExitStatus(exit_status));
                None
            }
            ChannelRequestType::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                ..
            } => {
                debug!(channel = msg.recipient_channel, signal = %signal_name, "exit signal");
                shared.push_event(ChannelEvent::ExitSignal {
                    signal_name,
                    core_dumped,
                    error_message,
                });
                None
            }
            other => {
                debug!(
                    channel = msg.recipient_channel,
                    request = other.name(),
                    "unhandled channel request"
                );
                msg.want_reply
                    .then(|| Message::ChannelFailure(ChannelFailure::new(shared.remote_id())))
            }
        }
    }

    pub(crate) async fn on_request_reply(&self, recipient: u32, success: bool) {
        if let Some(shared) = self.get(recipient).await {
            if !shared.on_request_reply(success) {
                debug!(channel = recipient, "channel reply without a pending request");
            }
        }
    }

    /// Accepts a peer-initiated open. Returns the channel state and our
    /// confirmation; the handle is built when the application accepts it.
    pub(crate) async fn accept_incoming(
        &self,
        open: &ChannelOpen,
        options: ChannelOptions,
    ) -> ConduitResult<(Arc<ChannelShared>, Message)> {
        let mut channels = self.channels.write().await;
        Self::purge(&mut channels);
        let local_id = Self::lowest_free(&channels)?;

        let shared = Arc::new(ChannelShared::new(
            local_id,
            open.channel_type.clone(),
            options,
            Arc::clone(&self.record),
        ));
        shared.confirm(
            open.sender_channel,
            open.initial_window_size,
            open.maximum_packet_size,
        );
        channels.insert(local_id, Arc::clone(&shared));
        logging::log_channel_event(local_id, "accepted");

        let confirmation = Message::ChannelOpenConfirmation(ChannelOpenConfirmation::new(
            open.sender_channel,
            local_id,
            options.initial_window,
            options.max_packet,
        ));
        Ok((shared, confirmation))
    }

    /// Refusal for a peer-initiated open.
    pub(crate) fn reject_incoming(open: &ChannelOpen) -> Message {
        debug!(
            channel_type = open.channel_type.name(),
            sender = open.sender_channel,
            "incoming channel open refused"
        );
        Message::ChannelOpenFailure(ChannelOpenFailure::new(
            open.sender_channel,
            ChannelOpenFailureReason::AdministrativelyProhibited,
        ))
    }

    /// Closes every channel and resolves pending opens with `Disconnected`.
    pub(crate) async fn teardown(&self, info: &DisconnectInfo) {
        let channels = std::mem::take(&mut *self.channels.write().await);
        for shared in channels.values() {
            shared.force_close(Some(info));
        }
        self.opens.close(info);
        debug!(channels = channels.len(), "channels torn down");
    }

    pub(crate) async fn channel_ids(&self) -> Vec<u32> {
        self.channels.read().await.keys().copied().collect()
    }
}
