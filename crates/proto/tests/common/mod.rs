//! In-process SSH server for exercising a client [`Session`] end to end.
//!
//! The server is scripted: tests drive it step by step (`handshake`,
//! `recv`, `send`, `run_kex`, ...) over a `tokio::io::duplex` pipe, using
//! the crate's own transport and key exchange primitives from the server's
//! side of the exchange.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use conduit_platform::{ConduitError, ConduitResult};
use conduit_proto::ssh::kex::{KeyLetters, KeyMaterial};
use conduit_proto::ssh::kex_dh::{compute_exchange_hash, ExchangeHashInput, KexExchange};
use conduit_proto::ssh::{
    AcceptAnyHostKey, Algorithms, ChannelOpenConfirmation, ChannelOpenFailure,
    ChannelOpenFailureReason, ChannelType, Ed25519HostKey, KexAlgorithm, KexInit, Message,
    NegotiatedAlgorithms, PacketReader, PacketWriter, Session, SessionConfig,
    SessionConfigBuilder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

pub const SERVER_SOFTWARE: &str = "FakeServer_1.0";

/// Bound for every single step a test waits on.
pub const STEP: Duration = Duration::from_secs(5);

pub struct ServerOptions {
    pub algorithms: Algorithms,
    pub host_key: Ed25519HostKey,
    pub banners: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            algorithms: Algorithms::default().with_host_key(["ssh-ed25519"]),
            host_key: Ed25519HostKey::generate(),
            banners: Vec::new(),
        }
    }
}

pub struct FakeServer {
    reader: PacketReader<ReadHalf<DuplexStream>>,
    writer: PacketWriter<WriteHalf<DuplexStream>>,
    options: ServerOptions,
    client_line: String,
    server_line: String,
    session_id: Option<Vec<u8>>,
    backlog: VecDeque<Message>,
    next_channel: u32,
    pub negotiated: Option<NegotiatedAlgorithms>,
    pub kex_count: usize,
}

/// Test logging, enabled with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client_config() -> SessionConfigBuilder {
    SessionConfig::builder()
        .with_host_key_verifier(AcceptAnyHostKey)
        .with_kex_timeout(STEP)
        .with_connect_timeout(STEP)
}

/// Connects `session` to a fresh fake server and completes the first key
/// exchange on both sides.
pub async fn connect(session: &Session, options: ServerOptions) -> FakeServer {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let server = tokio::spawn(FakeServer::handshake(server_io, options));
    tokio::time::timeout(STEP, session.connect_stream(Box::new(client_io)))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    tokio::time::timeout(STEP, server)
        .await
        .expect("server timed out")
        .expect("server task panicked")
        .expect("server handshake failed")
}

/// A connected session plus its server, with default options.
pub async fn connected() -> (Session, FakeServer) {
    init_tracing();
    let session = Session::new(client_config().build().expect("config"));
    let server = connect(&session, ServerOptions::default()).await;
    (session, server)
}

async fn read_line(io: &mut DuplexStream) -> ConduitResult<String> {
    let mut line = Vec::new();
    loop {
        let byte = io.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| ConduitError::ProtocolFormat("version line".into()))
}

impl FakeServer {
    /// Version exchange only.
    pub async fn accept(mut io: DuplexStream, options: ServerOptions) -> ConduitResult<Self> {
        let server_line = format!("SSH-2.0-{}", SERVER_SOFTWARE);
        for banner in &options.banners {
            io.write_all(format!("{}\r\n", banner).as_bytes()).await?;
        }
        io.write_all(format!("{}\r\n", server_line).as_bytes()).await?;
        let client_line = read_line(&mut io).await?;

        let (read_half, write_half) = tokio::io::split(io);
        Ok(Self {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
            options,
            client_line,
            server_line,
            session_id: None,
            backlog: VecDeque::new(),
            next_channel: 100,
            negotiated: None,
            kex_count: 0,
        })
    }

    /// Version exchange plus the first key exchange.
    pub async fn handshake(io: DuplexStream, options: ServerOptions) -> ConduitResult<Self> {
        let mut server = Self::accept(io, options).await?;
        server.run_kex().await?;
        Ok(server)
    }

    pub fn client_line(&self) -> &str {
        &self.client_line
    }

    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Sequence number our next packet carries.
    pub fn next_sequence(&self) -> u32 {
        self.writer.sequence()
    }

    pub fn host_key(&self) -> &Ed25519HostKey {
        &self.options.host_key
    }

    async fn read_message(&mut self) -> ConduitResult<(Message, Vec<u8>)> {
        let packet = self.reader.read_packet().await?;
        let message = Message::decode(&packet.payload)?;
        Ok((message, packet.payload))
    }

    /// Next message, skipping IGNORE.
    pub async fn recv(&mut self) -> ConduitResult<Message> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(message);
        }
        loop {
            let (message, _) = self.read_message().await?;
            if !matches!(message, Message::Ignore { .. }) {
                return Ok(message);
            }
        }
    }

    /// Next message, failing the test after [`STEP`].
    pub async fn expect(&mut self) -> Message {
        tokio::time::timeout(STEP, self.recv())
            .await
            .expect("no message from client")
            .expect("transport failed")
    }

    /// Raw packet payload, bypassing the backlog (IGNORE included).
    pub async fn recv_raw(&mut self) -> ConduitResult<Vec<u8>> {
        Ok(self.reader.read_packet().await?.payload)
    }

    pub async fn send(&mut self, message: Message) -> ConduitResult<()> {
        self.writer.write_payload(&message.encode()).await?;
        Ok(())
    }

    /// Seals `message` under the current keys, lets `tamper` alter the
    /// frame, and writes it.
    pub async fn send_tampered<F>(&mut self, message: Message, tamper: F) -> ConduitResult<()>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let mut frame = self.writer.seal(&message.encode())?;
        tamper(&mut frame);
        let io = self.writer.get_mut();
        io.write_all(&frame).await?;
        io.flush().await?;
        Ok(())
    }

    /// Runs one full key exchange as the responder: sends our KEXINIT, reads
    /// the client's, answers KEXDH_INIT and swaps keys in both directions.
    pub async fn run_kex(&mut self) -> ConduitResult<()> {
        let server_kexinit = KexInit::from_algorithms(&self.options.algorithms);
        let server_payload = server_kexinit.to_bytes();
        self.writer.write_payload(&server_payload).await?;

        let (client_kexinit, client_payload) = loop {
            let (message, payload) = self.read_message().await?;
            match message {
                Message::KexInit(init) => break (init, payload),
                Message::Ignore { .. } => {}
                other => self.backlog.push_back(other),
            }
        };
        let negotiated = NegotiatedAlgorithms::negotiate(&client_kexinit, &server_kexinit)?;

        let e = loop {
            match self.read_message().await?.0 {
                Message::KexDhInit { e } => break e,
                Message::Ignore { .. } => {}
                other => {
                    return Err(ConduitError::ProtocolFormat(format!(
                        "expected KEXDH_INIT, got {}",
                        other.name()
                    )))
                }
            }
        };

        let algorithm = KexAlgorithm::from_name(&negotiated.kex)
            .ok_or_else(|| ConduitError::NegotiationFailed(negotiated.kex.clone()))?;
        let exchange = KexExchange::new(algorithm)?;
        let f = exchange.public_wire().to_vec();
        let shared_secret = exchange.compute_shared_secret(&e)?;
        let host_key_blob = self.options.host_key.public_key_blob();

        let exchange_hash = compute_exchange_hash(
            algorithm.hash(),
            &ExchangeHashInput {
                client_version: &self.client_line,
                server_version: &self.server_line,
                client_kexinit: &client_payload,
                server_kexinit: &server_payload,
                host_key: &host_key_blob,
                client_public: &e,
                server_public: &f,
                shared_secret: &shared_secret,
            },
        );
        let session_id = self
            .session_id
            .get_or_insert_with(|| exchange_hash.clone())
            .clone();

        let signature = self.options.host_key.sign(&exchange_hash);
        self.send(Message::KexDhReply {
            host_key: host_key_blob,
            f,
            signature,
        })
        .await?;

        let material = KeyMaterial {
            hash: algorithm.hash(),
            shared_secret: &shared_secret,
            exchange_hash: &exchange_hash,
            session_id: &session_id,
        };
        let outbound = material.direction_keys(
            &self.options.algorithms,
            &negotiated.cipher_server_to_client,
            &negotiated.mac_server_to_client,
            KeyLetters::SERVER_TO_CLIENT,
        )?;
        let inbound = material.direction_keys(
            &self.options.algorithms,
            &negotiated.cipher_client_to_server,
            &negotiated.mac_client_to_server,
            KeyLetters::CLIENT_TO_SERVER,
        )?;

        self.send(Message::NewKeys).await?;
        self.writer.set_keys(outbound);

        loop {
            match self.read_message().await?.0 {
                Message::NewKeys => break,
                Message::Ignore { .. } => {}
                Message::Disconnect(d) => {
                    return Err(ConduitError::PeerDisconnected {
                        reason_code: d.reason_code,
                        description: d.description,
                    })
                }
                other => self.backlog.push_back(other),
            }
        }
        self.reader.set_keys(inbound);
        self.negotiated = Some(negotiated);
        self.kex_count += 1;
        Ok(())
    }

    /// Answers SERVICE_REQUEST with SERVICE_ACCEPT.
    pub async fn accept_service(&mut self) -> ConduitResult<String> {
        match self.expect().await {
            Message::ServiceRequest { service } => {
                self.send(Message::ServiceAccept {
                    service: service.clone(),
                })
                .await?;
                Ok(service)
            }
            other => Err(ConduitError::ProtocolFormat(format!(
                "expected SERVICE_REQUEST, got {}",
                other.name()
            ))),
        }
    }

    /// Reads a CHANNEL_OPEN and confirms it. Returns (client id, server id,
    /// channel type).
    pub async fn confirm_open(
        &mut self,
        window: u32,
        max_packet: u32,
    ) -> ConduitResult<(u32, u32, ChannelType)> {
        match self.expect().await {
            Message::ChannelOpen(open) => {
                let server_id = self.next_channel;
                self.next_channel += 1;
                self.send(Message::ChannelOpenConfirmation(ChannelOpenConfirmation::new(
                    open.sender_channel,
                    server_id,
                    window,
                    max_packet,
                )))
                .await?;
                Ok((open.sender_channel, server_id, open.channel_type))
            }
            other => Err(ConduitError::ProtocolFormat(format!(
                "expected CHANNEL_OPEN, got {}",
                other.name()
            ))),
        }
    }

    /// Reads a CHANNEL_OPEN and refuses it with `reason`.
    pub async fn refuse_open(&mut self, reason: ChannelOpenFailureReason, text: &str) -> ConduitResult<u32> {
        match self.expect().await {
            Message::ChannelOpen(open) => {
                let mut failure = ChannelOpenFailure::new(open.sender_channel, reason);
                failure.description = text.to_string();
                self.send(Message::ChannelOpenFailure(failure)).await?;
                Ok(open.sender_channel)
            }
            other => Err(ConduitError::ProtocolFormat(format!(
                "expected CHANNEL_OPEN, got {}",
                other.name()
            ))),
        }
    }
}
