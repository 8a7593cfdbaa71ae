//! Session lifecycle against the in-process server: handshake, host key
//! checks, disconnects from either side, observers and never-connected
//! sessions.

mod common;

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use common::{client_config, connect, connected, FakeServer, ServerOptions, SERVER_SOFTWARE, STEP};
use conduit_platform::{BoxedStream, ConduitError, ConduitResult, Connector};
use conduit_proto::ssh::hostkey::fingerprint_sha256;
use conduit_proto::ssh::{
    DisconnectOrigin, DisconnectReason, GlobalRequest, HostKeyInfo, Message, Session,
    SessionState, WaitResult,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[tokio::test]
async fn test_handshake_establishes_session() {
    common::init_tracing();
    let session = Session::new(client_config().build().unwrap());
    let options = ServerOptions {
        banners: vec!["Welcome".to_string(), "Authorized use only".to_string()],
        ..ServerOptions::default()
    };
    let server = connect(&session, options).await;

    assert!(session.is_connected());
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.session_id(), server.session_id());
    assert_eq!(session.server_version().unwrap().software(), SERVER_SOFTWARE);
    assert_eq!(session.banners(), vec!["Welcome", "Authorized use only"]);
    assert!(server.client_line().starts_with("SSH-2.0-Conduit_"));

    let negotiated = session.negotiated().unwrap();
    assert_eq!(Some(&negotiated), server.negotiated.as_ref());
    assert_eq!(negotiated.host_key, "ssh-ed25519");
    assert_eq!(negotiated.kex, "curve25519-sha256");
}

#[tokio::test]
async fn test_host_key_rejection_tears_down() {
    common::init_tracing();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let session = Session::new(
        client_config()
            .with_host_key_verifier(|_: &HostKeyInfo| false)
            .build()
            .unwrap(),
    );
    let observed = Arc::clone(&seen);
    session.on_host_key_received(move |key| {
        observed.lock().unwrap().push(key.fingerprint.clone());
    });

    let options = ServerOptions::default();
    let expected = fingerprint_sha256(&options.host_key.public_key_blob());
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let server = tokio::spawn(FakeServer::handshake(server_io, options));

    let err = session.connect_stream(Box::new(client_io)).await.unwrap_err();
    assert!(matches!(err, ConduitError::HostKeyRejected(_)), "{:?}", err);

    let server_err = server.await.unwrap().err().expect("server sees a DISCONNECT");
    match server_err {
        ConduitError::PeerDisconnected { reason_code, .. } => {
            assert_eq!(reason_code, DisconnectReason::HostKeyNotVerifiable.code());
        }
        other => panic!("unexpected server error {:?}", other),
    }

    assert_eq!(*seen.lock().unwrap(), vec![expected]);
    assert_eq!(session.state(), SessionState::Disconnected);
    let info = session.disconnect_info().unwrap();
    assert_eq!(info.origin, DisconnectOrigin::Error);
    assert_eq!(info.reason(), Some(DisconnectReason::HostKeyNotVerifiable));
    tokio::time::timeout(STEP, session.closed()).await.unwrap();
}

#[tokio::test]
async fn test_peer_disconnect_reported() {
    let (session, mut server) = connected().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    session.on_disconnect(move |info| {
        assert_eq!(info.origin, DisconnectOrigin::Peer);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut wait = session.global_request("probe@test", true, vec![]).await.unwrap();
    assert!(matches!(server.expect().await, Message::GlobalRequest(_)));

    server
        .send(Message::Disconnect(conduit_proto::ssh::Disconnect::new(
            DisconnectReason::ByApplication,
            "maintenance",
        )))
        .await
        .unwrap();

    let err = wait.result(Some(STEP)).await.unwrap_err();
    match err {
        ConduitError::PeerDisconnected {
            reason_code,
            description,
        } => {
            assert_eq!(reason_code, 11);
            assert_eq!(description, "maintenance");
        }
        other => panic!("unexpected {:?}", other),
    }

    tokio::time::timeout(STEP, session.closed()).await.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    let info = session.disconnect_info().unwrap();
    assert_eq!(info.origin, DisconnectOrigin::Peer);
    assert_eq!(info.description, "maintenance");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // no DISCONNECT is echoed back, the stream just ends
    assert!(server.recv().await.is_err());
}

#[tokio::test]
async fn test_concurrent_disconnect_sends_one() {
    let (session, mut server) = connected().await;

    let mut wait = session.global_request("probe@test", true, vec![]).await.unwrap();
    assert!(matches!(server.expect().await, Message::GlobalRequest(_)));

    let (a, b) = tokio::join!(
        session.disconnect(DisconnectReason::ByApplication, "first"),
        session.disconnect(DisconnectReason::ByApplication, "second"),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    match server.expect().await {
        Message::Disconnect(d) => assert_eq!(d.reason_code, 11),
        other => panic!("unexpected {:?}", other),
    }
    assert!(server.recv().await.is_err(), "exactly one DISCONNECT");

    let first = match wait.wait(None).await {
        WaitResult::Disconnected(info) => info,
        _ => panic!("wait should report the teardown"),
    };
    assert_eq!(first.origin, DisconnectOrigin::Local);
    match wait.wait(None).await {
        WaitResult::Disconnected(again) => assert_eq!(again, first),
        _ => panic!("result is cached"),
    }

    // still idempotent afterwards
    session
        .disconnect(DisconnectReason::ByApplication, "third")
        .await
        .unwrap();
    assert_eq!(session.disconnect_info().unwrap(), first);
}

#[tokio::test]
async fn test_session_cannot_be_reused() {
    let (session, _server) = connected().await;
    session
        .disconnect(DisconnectReason::ByApplication, "done")
        .await
        .unwrap();

    let (client_io, _server_io) = tokio::io::duplex(1024);
    let err = session.connect_stream(Box::new(client_io)).await.unwrap_err();
    assert!(matches!(err, ConduitError::Config(_)));
    assert!(matches!(
        session.send_message(Message::Ignore { data: vec![] }).await,
        Err(ConduitError::NotConnected)
    ));
}

#[tokio::test]
async fn test_drop_tears_down() {
    let (session, mut server) = connected().await;
    drop(session);

    match server.expect().await {
        Message::Disconnect(d) => {
            assert_eq!(d.reason_code, DisconnectReason::ByApplication.code());
            assert_eq!(d.description, "session dropped");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_observers_unsubscribe() {
    let (session, _server) = connected().await;

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let (a, b) = (Arc::clone(&first), Arc::clone(&second));
    let id = session.on_disconnect(move |_| {
        a.fetch_add(1, Ordering::SeqCst);
    });
    session.on_disconnect(move |info| {
        assert_eq!(info.origin, DisconnectOrigin::Local);
        b.fetch_add(1, Ordering::SeqCst);
    });

    assert!(session.unsubscribe(id));
    assert!(!session.unsubscribe(id));

    session
        .disconnect(DisconnectReason::ByApplication, "bye")
        .await
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsupported_message_answered() {
    let (session, mut server) = connected().await;

    let sequence = server.next_sequence();
    server
        .send(Message::Unsupported {
            message_type: 200,
            payload: vec![1, 2, 3],
        })
        .await
        .unwrap();

    match server.expect().await {
        Message::Unimplemented { sequence_number } => assert_eq!(sequence_number, sequence),
        other => panic!("unexpected {:?}", other),
    }
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_peer_global_request_refused() {
    let (session, mut server) = connected().await;

    server
        .send(Message::GlobalRequest(GlobalRequest::new(
            "keepalive@openssh.com",
            true,
            vec![],
        )))
        .await
        .unwrap();
    assert_eq!(server.expect().await, Message::RequestFailure);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_global_request_reply_data() {
    let (session, mut server) = connected().await;

    let mut first = session.global_request("one@test", true, vec![]).await.unwrap();
    let mut second = session.global_request("two@test", true, vec![]).await.unwrap();
    assert!(matches!(server.expect().await, Message::GlobalRequest(r) if r.name == "one@test"));
    assert!(matches!(server.expect().await, Message::GlobalRequest(r) if r.name == "two@test"));

    server
        .send(Message::RequestSuccess { data: vec![7] })
        .await
        .unwrap();
    server.send(Message::RequestFailure).await.unwrap();

    assert_eq!(first.result(Some(STEP)).await.unwrap(), vec![7]);
    assert!(matches!(
        second.result(Some(STEP)).await,
        Err(ConduitError::RequestRejected(_))
    ));

    // no reply wanted: resolved at once
    let mut quiet = session.global_request("three@test", false, vec![]).await.unwrap();
    assert!(quiet.is_resolved());
}

#[tokio::test]
async fn test_keepalive_sends_ignore() {
    common::init_tracing();
    let session = Session::new(
        client_config()
            .with_keepalive(Duration::from_millis(50))
            .build()
            .unwrap(),
    );
    let mut server = connect(&session, ServerOptions::default()).await;

    let payload = tokio::time::timeout(STEP, server.recv_raw())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload[0], 2, "SSH_MSG_IGNORE");
}

struct CountingStream {
    writes: Arc<AtomicUsize>,
}

impl AsyncRead for CountingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct StubConnector {
    connects: AtomicUsize,
    writes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Connector for StubConnector {
    fn endpoint(&self) -> String {
        "stub".to_string()
    }

    async fn connect(&self) -> ConduitResult<BoxedStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingStream {
            writes: Arc::clone(&self.writes),
        }))
    }
}

#[tokio::test]
async fn test_never_connected_writes_nothing() {
    let stub = StubConnector {
        connects: AtomicUsize::new(0),
        writes: Arc::new(AtomicUsize::new(0)),
    };
    let session = Session::new(client_config().build().unwrap());

    assert!(matches!(
        session.send_message(Message::Ignore { data: vec![1] }).await,
        Err(ConduitError::NotConnected)
    ));
    assert!(!session.try_send_message(Message::Ignore { data: vec![] }).await);
    assert!(matches!(
        session.send_ignore(vec![]).await,
        Err(ConduitError::NotConnected)
    ));
    let mut rekey = session.rekey().await.unwrap();
    assert!(matches!(rekey.wait(None).await, WaitResult::Disconnected(_)));
    assert!(matches!(
        session.request_port_forward("127.0.0.1", 0).await,
        Err(ConduitError::NotConnected)
    ));
    session
        .disconnect(DisconnectReason::ByApplication, "never connected")
        .await
        .unwrap();
    tokio::time::timeout(STEP, session.closed()).await.unwrap();

    assert_eq!(stub.connects.load(Ordering::SeqCst), 0);
    assert_eq!(stub.writes.load(Ordering::SeqCst), 0);
    assert!(session.disconnect_info().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out() {
    let writes = Arc::new(AtomicUsize::new(0));
    let stub = StubConnector {
        connects: AtomicUsize::new(0),
        writes: Arc::clone(&writes),
    };
    let session = Session::new(
        client_config()
            .with_connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap(),
    );

    let err = session.connect(&stub).await.unwrap_err();
    assert!(matches!(err, ConduitError::TimedOut));
    assert_eq!(stub.connects.load(Ordering::SeqCst), 1);
    // our identification line went out before the wait
    assert!(writes.load(Ordering::SeqCst) >= 1);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(
        session.disconnect_info().unwrap().reason(),
        Some(DisconnectReason::ConnectionLost)
    );
}

/// Parks a global request, then has the server send one damaged packet.
async fn tampered_packet_teardown<F>(tamper: F) -> (Session, FakeServer, WaitResult<Vec<u8>>)
where
    F: FnOnce(&mut Vec<u8>),
{
    let (session, mut server) = connected().await;
    let mut pending = session
        .global_request("pending@test", true, vec![])
        .await
        .unwrap();
    assert!(matches!(server.expect().await, Message::GlobalRequest(_)));

    server
        .send_tampered(Message::Ignore { data: vec![0; 32] }, tamper)
        .await
        .unwrap();
    let outcome = pending.wait(Some(STEP)).await;
    tokio::time::timeout(STEP, session.closed()).await.unwrap();
    (session, server, outcome)
}

#[tokio::test]
async fn test_corrupted_mac_tears_down() {
    let (session, mut server, outcome) = tampered_packet_teardown(|frame| {
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
    })
    .await;

    let code = DisconnectReason::MacError.code();
    match outcome {
        WaitResult::Disconnected(info) => assert_eq!(info.reason_code, code),
        other => panic!("unexpected {:?}", other.is_success()),
    }
    let info = session.disconnect_info().unwrap();
    assert_eq!(info.origin, DisconnectOrigin::Error);
    assert_eq!(info.reason_code, code);
    assert_eq!(session.state(), SessionState::Disconnected);

    match server.expect().await {
        Message::Disconnect(d) => assert_eq!(d.reason_code, code),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_packet_length_tears_down() {
    // a flipped top bit turns the length field into more than 2 GiB
    let (session, _server, outcome) = tampered_packet_teardown(|frame| frame[0] ^= 0x80).await;

    let code = DisconnectReason::ProtocolError.code();
    assert!(matches!(outcome, WaitResult::Disconnected(ref info) if info.reason_code == code));
    let info = session.disconnect_info().unwrap();
    assert_eq!(info.reason_code, code);
    assert!(matches!(info.error, Some(ConduitError::PacketTooLarge { .. })));
    assert!(!session.is_connected());
}
