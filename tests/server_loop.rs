//! The sequential accept loop: message delivery, failure survival, lifecycle.

mod common;

use std::time::Duration;

use tls12_mutual::endpoint::client;
use tls12_mutual::error::SessionError;
use tls12_mutual::{
    CipherSuite, Connector, Error, FailureKind, KeyExchangeMode, Server, ServerHandle,
    ServerState, SessionEvent,
};

use common::{TestPki, TEST_TIMEOUT};

async fn next_event(handle: &mut ServerHandle) -> SessionEvent {
    tokio::time::timeout(TEST_TIMEOUT, handle.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("server loop exited")
}

#[tokio::test]
async fn end_to_end_test_message() {
    let pki = TestPki::new();
    let mut handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();

    let suite = client::send_once(pki.client_config(KeyExchangeMode::Dhe, addr), b"test_message")
        .await
        .unwrap();
    assert_eq!(suite, CipherSuite::DheRsaAes128CbcSha256);

    match next_event(&mut handle).await {
        SessionEvent::Received {
            peer,
            suite,
            payload,
        } => {
            assert!(peer.ip().is_loopback());
            assert_eq!(suite, CipherSuite::DheRsaAes128CbcSha256);
            assert_eq!(&payload[..], b"test_message");
        }
        other => panic!("expected Received, got {other:?}"),
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn loop_survives_failures() {
    let pki = TestPki::new();
    let rogue = TestPki::new();
    let mut handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();

    // 1. Client that does not trust the server aborts the handshake.
    let err = client::send_once(rogue.client_config(KeyExchangeMode::Dhe, addr), b"x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Handshake);
    match next_event(&mut handle).await {
        SessionEvent::Failed { kind, .. } => assert_eq!(kind, FailureKind::Handshake),
        other => panic!("expected Failed, got {other:?}"),
    }

    // 2. Plain TCP connection that hangs up without speaking TLS.
    drop(tokio::net::TcpStream::connect(addr).await.unwrap());
    match next_event(&mut handle).await {
        SessionEvent::Failed { kind, .. } => assert_eq!(kind, FailureKind::Handshake),
        other => panic!("expected Failed, got {other:?}"),
    }

    // 3. A well-behaved client still gets through.
    let suite = client::send_once(pki.client_config(KeyExchangeMode::Rsa, addr), b"after failures")
        .await
        .unwrap();
    assert_eq!(suite, CipherSuite::RsaAes128CbcSha256);
    match next_event(&mut handle).await {
        SessionEvent::Received { payload, suite, .. } => {
            assert_eq!(&payload[..], b"after failures");
            assert_eq!(suite, CipherSuite::RsaAes128CbcSha256);
        }
        other => panic!("expected Received, got {other:?}"),
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn sessions_are_served_one_after_another() {
    let pki = TestPki::new();
    let mut handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();

    for (i, mode) in [KeyExchangeMode::Dhe, KeyExchangeMode::Rsa, KeyExchangeMode::Dhe]
        .into_iter()
        .enumerate()
    {
        let msg = format!("message #{i}");
        client::send_once(pki.client_config(mode, addr), msg.as_bytes())
            .await
            .unwrap();
        match next_event(&mut handle).await {
            SessionEvent::Received { payload, suite, .. } => {
                assert_eq!(payload, msg.as_bytes());
                assert_eq!(suite, mode.cipher_suite());
            }
            other => panic!("expected Received, got {other:?}"),
        }
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_message_is_refused_by_sender() {
    let pki = TestPki::new();
    let mut handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();

    let mut channel = Connector::new(pki.client_config(KeyExchangeMode::Dhe, addr))
        .connect()
        .await
        .unwrap();
    assert_eq!(channel.max_message_size(), 1024);

    let big = vec![b'a'; 1025];
    let err = channel.send(&big).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::MessageTooLarge {
            size: 1025,
            max: 1024
        }
    ));

    // Nothing was written, so the channel is still usable.
    let exact = vec![b'b'; 1024];
    channel.send(&exact).await.unwrap();
    channel.close().await.unwrap();

    match next_event(&mut handle).await {
        SessionEvent::Received { payload, .. } => {
            assert!(!payload.is_empty());
            assert!(payload.iter().all(|&b| b == b'b'));
        }
        other => panic!("expected Received, got {other:?}"),
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn silent_peer_hits_read_timeout() {
    let pki = TestPki::new();
    let config = pki
        .server_builder()
        .read_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let mut handle = Server::bind(config).await.unwrap().start();
    let addr = handle.local_addr();

    let channel = Connector::new(pki.client_config(KeyExchangeMode::Rsa, addr))
        .connect()
        .await
        .unwrap();

    match next_event(&mut handle).await {
        SessionEvent::Failed { kind, error } => {
            assert_eq!(kind, FailureKind::Session);
            assert!(error.contains("timed out"), "{error}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    drop(channel);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stop_releases_the_port() {
    let pki = TestPki::new();
    let handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();
    assert_ne!(handle.state(), ServerState::Stopped);

    tokio::time::timeout(TEST_TIMEOUT, handle.stop())
        .await
        .unwrap()
        .unwrap();

    let err = client::connect(pki.client_config(KeyExchangeMode::Dhe, addr))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transport);
}

#[tokio::test]
async fn dropping_handle_stops_the_loop() {
    let pki = TestPki::new();
    let handle = Server::bind(pki.server_config()).await.unwrap().start();
    let addr = handle.local_addr();
    drop(handle);

    // The loop exits on its own task; once it has, the port is closed.
    let refused = async {
        loop {
            match tokio::net::TcpStream::connect(addr).await {
                Err(_) => break,
                Ok(stream) => {
                    drop(stream);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    };
    tokio::time::timeout(TEST_TIMEOUT, refused)
        .await
        .expect("listener still open after the handle was dropped");
}

#[tokio::test]
async fn state_is_observable_through_listener() {
    let pki = TestPki::new();
    let server = Server::bind(pki.server_config()).await.unwrap();
    let mut states = server.listener().subscribe();
    assert_eq!(*states.borrow(), ServerState::Listening);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(server.serve(shutdown.clone(), None));
    shutdown.cancel();
    task.await.unwrap();

    states.changed().await.ok();
    assert_eq!(*states.borrow(), ServerState::Stopped);
}

#[tokio::test]
async fn accepting_is_reported_while_waiting_for_a_client() {
    let pki = TestPki::new();
    let handle = Server::bind(pki.server_config()).await.unwrap().start();

    let mut seen = handle.state();
    let waited = tokio::time::timeout(TEST_TIMEOUT, async {
        while seen != ServerState::Accepting {
            tokio::task::yield_now().await;
            seen = handle.state();
        }
    })
    .await;
    assert!(waited.is_ok(), "state stuck at {seen:?}");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn bind_with_missing_identity_is_configuration_error() {
    let pki = TestPki::new();
    let config = pki
        .server_builder()
        .identity(tls12_mutual::Identity::new(
            pki.pki.dir().join("missing.pem"),
            pki.pki.dir().join("missing.key"),
        ))
        .build()
        .unwrap();

    match Server::bind(config).await.unwrap_err() {
        Error::Config(e) => assert!(e.to_string().contains("missing.pem"), "{e}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
}
