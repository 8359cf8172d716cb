// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # IPC Integration Tests
//!
//! Integration tests for vigil-ipc over a live loopback server including:
//!
//! - Handshake and protocol version negotiation
//! - Request/response round trips
//! - A test application reporting its run to a runner
//!
//! ## Test Categories
//!
//! - `test_handshake_*`: Negotiation tests
//! - `test_request_*`: Request/response tests
//! - `test_reporter_*`: End-to-end reporting tests

use std::time::Duration;

use vigil_bin::TestApplication;
use vigil_core::command_line::names;
use vigil_core::{CommandLineOptions, ExecutionId, ExitCode, TestRunCancellationToken};
use vigil_ipc::messages::{SessionEventType, SuccessfulTestResultMessage, TestResultMessages, TestSessionEvent};
use vigil_ipc::{HandshakeInfo, HandshakeKey, IpcError, IpcMessage, PROTOCOL_VERSION};
use vigil_tests::common::init_test_logging;
use vigil_tests::prelude::*;

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_succeeds_with_matching_version() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;

    let client = harness.connect().await.unwrap();
    assert_eq!(
        client.remote_handshake().get(HandshakeKey::ProtocolVersion),
        Some(PROTOCOL_VERSION)
    );
    assert_eq!(client.remote_handshake().get(HandshakeKey::HostType), Some(HARNESS_HOST_TYPE));
    assert!(!client.is_closed());

    client.close().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_rejected() {
    init_test_logging();
    let handler = RecordingRequestHandler::new();
    let advertised = HandshakeInfo::local(HARNESS_HOST_TYPE, None).with(HandshakeKey::ProtocolVersion, "9.9.9");
    let harness = IpcHarness::start_with(handler.clone(), advertised).await;

    let result = harness.connect().await;
    match result {
        Err(IpcError::VersionMismatch { local, remote }) => {
            assert_eq!(local, PROTOCOL_VERSION);
            assert_eq!(remote, "9.9.9");
        }
        Err(other) => panic!("Expected VersionMismatch, got {:?}", other),
        Ok(_) => panic!("Expected VersionMismatch, got a connection"),
    }

    assert_eventually(Duration::from_secs(5), "server rejects the handshake", || {
        harness.stats().handshakes_rejected == 1
    })
    .await;
    assert_eq!(handler.request_count(), 0);
    assert_eq!(handler.disconnects(), 0);
    assert_eq!(harness.stats().requests_handled, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_handshake_missing_version_is_rejected() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;

    let result = harness
        .connect_with(HandshakeInfo::new().with(HandshakeKey::HostType, "legacy"))
        .await;
    assert!(result.is_err());

    assert_eventually(Duration::from_secs(5), "server rejects the handshake", || {
        harness.stats().handshakes_rejected == 1
    })
    .await;
    assert_eq!(handler.request_count(), 0);

    harness.shutdown().await;
}

// =============================================================================
// Request / Response
// =============================================================================

#[tokio::test]
async fn test_request_round_trip() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;
    let client = harness.connect().await.unwrap();

    let event = IpcMessage::SessionEvent(TestSessionEvent {
        session_type: SessionEventType::Start,
        session_uid: "s1".to_string(),
        execution_id: "e1".to_string(),
    });
    let response = client.request(event.clone(), None).await.unwrap();
    assert_eq!(response, IpcMessage::VoidResponse);

    client
        .request(IpcMessage::TestHostProcessExit { exit_code: 2 }, None)
        .await
        .unwrap();

    assert_eq!(
        handler.requests(),
        vec![event, IpcMessage::TestHostProcessExit { exit_code: 2 }]
    );
    assert_eq!(client.requests_sent(), 2);

    client.close().await;
    assert!(client.is_closed());
    assert_eventually(Duration::from_secs(5), "server sees the disconnect", || {
        handler.disconnects() == 1
    })
    .await;
    assert_eq!(harness.stats().requests_handled, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_request_after_close_fails() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;
    let client = harness.connect().await.unwrap();

    client.close().await;
    let result = client.request(IpcMessage::TestHostProcessPid { pid: 1 }, None).await;
    assert!(matches!(result, Err(IpcError::ConnectionClosed { .. })));
    assert_eq!(handler.request_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_request_oversized_is_rejected_locally() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;
    let client = harness.connect().await.unwrap();

    let chatty = IpcMessage::TestResults(TestResultMessages {
        execution_id: "e1".to_string(),
        successful: vec![SuccessfulTestResultMessage {
            uid: "suite::chatty".to_string(),
            display_name: "chatty".to_string(),
            state: 2,
            duration_ms: 1,
            reason: None,
            stdout: Some("x".repeat(17 * 1024 * 1024)),
            stderr: None,
            session_uid: "s1".to_string(),
        }],
        failed: Vec::new(),
    });

    let result = client.request(chatty, None).await;
    assert!(matches!(result, Err(IpcError::FrameTooLarge { .. })));
    assert!(!client.is_closed());
    assert_eq!(client.requests_sent(), 0);

    client
        .send(IpcMessage::TestHostProcessPid { pid: 7 }, None)
        .await
        .unwrap();
    assert_eq!(handler.requests(), vec![IpcMessage::TestHostProcessPid { pid: 7 }]);

    client.close().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_request_cancelled_by_token() {
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;
    let client = harness.connect().await.unwrap();

    let token = TestRunCancellationToken::new();
    token.cancel();
    let result = client
        .request(IpcMessage::TestHostProcessPid { pid: 1 }, Some(&token))
        .await;
    assert!(matches!(result, Err(IpcError::Cancelled)));

    client.close().await;
    harness.shutdown().await;
}

// =============================================================================
// Reporter
// =============================================================================

fn server_options(port: u16) -> CommandLineOptions {
    CommandLineOptions::new()
        .with(names::SERVER, Vec::<String>::new())
        .with(names::CLIENT_HOST, ["127.0.0.1"])
        .with(names::CLIENT_PORT, [port.to_string()])
        .with(names::NO_BANNER, Vec::<String>::new())
}

#[tokio::test]
async fn test_reporter_forwards_run_to_runner() {
    init_test_logging();
    let handler = RecordingRequestHandler::new();
    let harness = IpcHarness::start(handler.clone()).await;

    let app = TestApplication::new(RegistryFixtures::mixed());
    let outcome = app
        .run(
            server_options(harness.port()),
            ExecutionId::generate(),
            TestRunCancellationToken::new(),
        )
        .await
        .unwrap();
    outcome.assert_exit_code(ExitCode::AtLeastOneTestFailed);

    let requests = handler.requests();
    let sent: Vec<&str> = requests.iter().map(IpcMessage::name).collect();
    assert_eq!(sent.first(), Some(&"CommandLineOptionMessages"));
    assert_eq!(sent.last(), Some(&"TestHostProcessExitRequest"));
    assert!(sent.contains(&"TestHostProcessPidRequest"));

    let session_events: Vec<SessionEventType> = requests
        .iter()
        .filter_map(|r| match r {
            IpcMessage::SessionEvent(e) => Some(e.session_type),
            _ => None,
        })
        .collect();
    assert_eq!(session_events, vec![SessionEventType::Start, SessionEventType::End]);

    let failed: Vec<_> = requests
        .iter()
        .filter_map(|r| match r {
            IpcMessage::TestResults(results) => Some(results.failed.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].uid, "math::divides");
    assert_eq!(failed[0].exception_message.as_deref(), Some("Assertion failed."));

    let successful = requests
        .iter()
        .filter_map(|r| match r {
            IpcMessage::TestResults(results) => Some(results.successful.len()),
            _ => None,
        })
        .sum::<usize>();
    assert_eq!(successful, 3);

    assert!(matches!(
        requests.last(),
        Some(IpcMessage::TestHostProcessExit { exit_code: 2 })
    ));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_reporter_version_mismatch_maps_to_exit_code() {
    let handler = RecordingRequestHandler::new();
    let advertised = HandshakeInfo::local(HARNESS_HOST_TYPE, None).with(HandshakeKey::ProtocolVersion, "9.9.9");
    let harness = IpcHarness::start_with(handler.clone(), advertised).await;

    let app = TestApplication::new(RegistryFixtures::passing(1));
    let err = app
        .run(
            server_options(harness.port()),
            ExecutionId::generate(),
            TestRunCancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), ExitCode::IncompatibleProtocolVersion);
    assert_eq!(handler.request_count(), 0);

    harness.shutdown().await;
}
