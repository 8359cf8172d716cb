// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `listen` command.
//!
//! Acts as a minimal test runner: accepts test hosts over IPC, acknowledges
//! every request and prints what the hosts report, either as text or as one
//! JSON object per line.

use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use vigil_config::{TransportKind, VigilConfig};
use vigil_core::StateKind;
use vigil_ipc::{
    HandshakeInfo, IpcEndpoint, IpcListener, IpcMessage, IpcResult, IpcServer, IpcServerConfig, PeerInfo,
    RequestHandler, SessionEventType,
};

use crate::cli::ListenArgs;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Host type advertised by the listening side.
const RUNNER_HOST_TYPE: &str = "runner";

/// Binds the listener and prints events until a shutdown signal.
pub async fn listen(args: ListenArgs, config: &VigilConfig) -> BinResult<()> {
    let endpoint = listen_endpoint(&args, config);
    let listener = IpcListener::bind(&endpoint)
        .await
        .map_err(|e| BinError::from(e).with_context(format!("binding {}", endpoint)))?;
    let bound = listener.local_endpoint()?;
    println!("Listening on {}", bound);
    info!(endpoint = %bound, "Waiting for test hosts");

    let printer = Arc::new(EventPrinter::stdout(args.json));
    let server = IpcServer::new(
        printer,
        HandshakeInfo::local(RUNNER_HOST_TYPE, None),
        IpcServerConfig {
            handshake_timeout: config.ipc.connect_timeout,
            max_frame_size: config.ipc.max_frame_size as usize,
        },
    );

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.spawn_signal_listener();
    let result = server.serve(listener, coordinator.token()).await;
    signals.abort();

    let stats = server.stats();
    info!(
        connections = stats.connections_accepted,
        "Listener stopped"
    );
    Ok(result?)
}

fn listen_endpoint(args: &ListenArgs, config: &VigilConfig) -> IpcEndpoint {
    if let Some(ref socket) = args.socket {
        return IpcEndpoint::unix(socket.clone());
    }
    let ipc = &config.ipc;
    if args.host.is_none() && args.port.is_none() && ipc.transport == TransportKind::Unix {
        if let Some(ref path) = ipc.socket_path {
            return IpcEndpoint::unix(path.clone());
        }
    }
    let host = args.host.clone().unwrap_or_else(|| ipc.host.clone());
    IpcEndpoint::tcp(host, args.port.unwrap_or(ipc.port))
}

// =============================================================================
// EventPrinter
// =============================================================================

/// Request handler that prints each reported event.
pub struct EventPrinter {
    json: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventPrinter {
    /// Creates a printer writing to `out`.
    pub fn new(json: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            json,
            out: Mutex::new(out),
        }
    }

    /// Creates a printer writing to stdout.
    pub fn stdout(json: bool) -> Self {
        Self::new(json, Box::new(io::stdout()))
    }

    /// Renders one message as output lines.
    pub fn render(&self, peer: &PeerInfo, message: &IpcMessage) -> Vec<String> {
        if self.json {
            render_json(peer, message)
                .into_iter()
                .map(|value| value.to_string())
                .collect()
        } else {
            render_text(peer, message)
        }
    }
}

#[async_trait]
impl RequestHandler for EventPrinter {
    async fn handle(&self, peer: &PeerInfo, request: IpcMessage) -> IpcResult<IpcMessage> {
        let lines = self.render(peer, &request);
        let mut out = self.out.lock();
        for line in lines {
            if let Err(e) = writeln!(out, "{}", line) {
                warn!(error = %e, "Failed to print event");
                break;
            }
        }
        let _ = out.flush();
        Ok(IpcMessage::VoidResponse)
    }

    async fn on_disconnect(&self, peer: &PeerInfo) {
        info!(connection = peer.connection_id, address = %peer.address, "Test host disconnected");
    }
}

fn state_name(code: u8) -> &'static str {
    StateKind::from_u8(code).map(|k| k.as_str()).unwrap_or("unknown")
}

fn render_text(peer: &PeerInfo, message: &IpcMessage) -> Vec<String> {
    let tag = format!("[{}]", peer.connection_id);
    match message {
        IpcMessage::SessionEvent(event) => {
            let edge = match event.session_type {
                SessionEventType::Start => "started",
                SessionEventType::End => "finished",
            };
            vec![format!("{} session {} {}", tag, event.session_uid, edge)]
        }
        IpcMessage::DiscoveredTests(batch) => batch
            .tests
            .iter()
            .map(|t| format!("{} discovered {}", tag, t.display_name))
            .collect(),
        IpcMessage::TestResults(batch) => {
            let mut lines: Vec<String> = batch
                .successful
                .iter()
                .map(|r| format!("{} {} {} ({} ms)", tag, state_name(r.state), r.display_name, r.duration_ms))
                .collect();
            for r in &batch.failed {
                let mut line = format!("{} {} {} ({} ms)", tag, state_name(r.state), r.display_name, r.duration_ms);
                if let Some(detail) = r.exception_message.as_deref().or(r.reason.as_deref()) {
                    line.push_str(": ");
                    line.push_str(detail);
                }
                lines.push(line);
            }
            lines
        }
        IpcMessage::FileArtifacts(batch) => batch
            .artifacts
            .iter()
            .map(|a| format!("{} artifact {} ({})", tag, a.display_name, a.full_path))
            .collect(),
        IpcMessage::CommandLineOptions(declared) => {
            vec![format!("{} {} options declared by {}", tag, declared.options.len(), declared.module_path)]
        }
        IpcMessage::TestHostProcessPid { pid } => vec![format!("{} test host pid {}", tag, pid)],
        IpcMessage::TestHostProcessExit { exit_code } => {
            vec![format!("{} test host exiting with {}", tag, exit_code)]
        }
        IpcMessage::VoidResponse | IpcMessage::Handshake(_) => Vec::new(),
    }
}

fn render_json(peer: &PeerInfo, message: &IpcMessage) -> Vec<serde_json::Value> {
    let connection = peer.connection_id;
    let event = |body: serde_json::Value| {
        json!({ "connection": connection, "message": message.name(), "body": body })
    };

    match message {
        IpcMessage::SessionEvent(e) => vec![event(json!({
            "type": match e.session_type {
                SessionEventType::Start => "start",
                SessionEventType::End => "end",
            },
            "session_uid": e.session_uid,
            "execution_id": e.execution_id,
        }))],
        IpcMessage::DiscoveredTests(batch) => batch
            .tests
            .iter()
            .map(|t| event(json!({ "uid": t.uid, "display_name": t.display_name })))
            .collect(),
        IpcMessage::TestResults(batch) => batch
            .successful
            .iter()
            .map(|r| {
                event(json!({
                    "uid": r.uid,
                    "display_name": r.display_name,
                    "state": state_name(r.state),
                    "duration_ms": r.duration_ms,
                    "reason": r.reason,
                }))
            })
            .chain(batch.failed.iter().map(|r| {
                event(json!({
                    "uid": r.uid,
                    "display_name": r.display_name,
                    "state": state_name(r.state),
                    "duration_ms": r.duration_ms,
                    "reason": r.reason,
                    "exception_message": r.exception_message,
                    "exception_type": r.exception_type,
                    "stack_trace": r.stack_trace,
                }))
            }))
            .collect(),
        IpcMessage::FileArtifacts(batch) => batch
            .artifacts
            .iter()
            .map(|a| {
                event(json!({
                    "full_path": a.full_path,
                    "display_name": a.display_name,
                    "test_uid": a.test_uid,
                }))
            })
            .collect(),
        IpcMessage::CommandLineOptions(declared) => vec![event(json!({
            "module_path": declared.module_path,
            "options": declared.options.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
        }))],
        IpcMessage::TestHostProcessPid { pid } => vec![event(json!({ "pid": pid }))],
        IpcMessage::TestHostProcessExit { exit_code } => vec![event(json!({ "exit_code": exit_code }))],
        IpcMessage::VoidResponse | IpcMessage::Handshake(_) => Vec::new(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_ipc::messages::{
        DiscoveredTestMessage, DiscoveredTestMessages, FailedTestResultMessage, TestResultMessages,
        TestSessionEvent,
    };

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn peer() -> PeerInfo {
        PeerInfo {
            connection_id: 1,
            address: "test".into(),
            handshake: HandshakeInfo::new(),
        }
    }

    fn failed_result() -> IpcMessage {
        IpcMessage::TestResults(TestResultMessages {
            execution_id: "exec".into(),
            successful: Vec::new(),
            failed: vec![FailedTestResultMessage {
                uid: "math::divides".into(),
                display_name: "divides".into(),
                state: StateKind::Failed.as_u8(),
                duration_ms: 12,
                reason: None,
                stdout: None,
                stderr: None,
                session_uid: "s1".into(),
                exception_message: Some("expected 2, got 3".into()),
                exception_type: None,
                stack_trace: None,
            }],
        })
    }

    #[tokio::test]
    async fn test_text_rendering() {
        let buffer = SharedBuffer::default();
        let printer = EventPrinter::new(false, Box::new(buffer.clone()));

        let start = IpcMessage::SessionEvent(TestSessionEvent {
            session_type: SessionEventType::Start,
            session_uid: "s1".into(),
            execution_id: "exec".into(),
        });
        let response = printer.handle(&peer(), start).await.unwrap();
        assert_eq!(response, IpcMessage::VoidResponse);
        printer.handle(&peer(), failed_result()).await.unwrap();

        let output = buffer.contents();
        assert!(output.contains("[1] session s1 started"));
        assert!(output.contains("[1] failed divides (12 ms): expected 2, got 3"));
    }

    #[test]
    fn test_json_rendering() {
        let printer = EventPrinter::new(true, Box::new(io::sink()));
        let discovered = IpcMessage::DiscoveredTests(DiscoveredTestMessages {
            execution_id: "exec".into(),
            tests: vec![
                DiscoveredTestMessage { uid: "a".into(), display_name: "A".into() },
                DiscoveredTestMessage { uid: "b".into(), display_name: "B".into() },
            ],
        });

        let lines = printer.render(&peer(), &discovered);
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["connection"], 1);
        assert_eq!(first["body"]["uid"], "a");

        let lines = printer.render(&peer(), &failed_result());
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["body"]["state"], "failed");
    }

    #[test]
    fn test_listen_endpoint() {
        let config = VigilConfig::default();
        let args = ListenArgs {
            port: Some(4000),
            ..Default::default()
        };
        assert_eq!(listen_endpoint(&args, &config), IpcEndpoint::tcp("127.0.0.1", 4000));

        let args = ListenArgs {
            socket: Some("/tmp/vigil.sock".into()),
            ..Default::default()
        };
        assert_eq!(listen_endpoint(&args, &config), IpcEndpoint::unix("/tmp/vigil.sock"));
    }
}
