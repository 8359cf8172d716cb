// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bridge from the message bus to an IPC client.
//!
//! [`IpcReporter`] lets an external runner observe a run:
//!
//! | Bus / lifecycle event         | IPC message              |
//! |-------------------------------|--------------------------|
//! | node discovered               | `DiscoveredTestMessages` |
//! | node reached a final state    | `TestResultMessages`     |
//! | node carries file artifacts   | `FileArtifactMessages`   |
//! | session artifact              | `FileArtifactMessages`   |
//! | session starting / finishing  | `TestSessionEvent`       |
//! | before run / after run        | pid / exit requests      |

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use vigil_core::bus::{DataConsumer, ProducerInfo};
use vigil_core::{
    BusMessage, Cancelled, CommandLineOption, DataKind, ExecutionId, ExitCode, Extension,
    ExtensionInfo, ExtensionSet, HandlerError, Property, SessionFileArtifactMessage, TestApplicationLifecycleCallbacks,
    TestNode, TestRunCancellationToken, TestSessionContext, TestSessionLifetimeHandler,
};

use crate::client::IpcClient;
use crate::error::{IpcError, IpcResult};
use crate::messages::{
    CommandLineOptionMessage, CommandLineOptionMessages, DiscoveredTestMessage, DiscoveredTestMessages,
    FailedTestResultMessage, FileArtifactMessage, FileArtifactMessages, IpcMessage, SessionEventType,
    SuccessfulTestResultMessage, TestResultMessages, TestSessionEvent,
};

// =============================================================================
// Conversion
// =============================================================================

/// Captured output forwarded per stream and per test.
pub const MAX_REPORTED_OUTPUT: usize = 1024 * 1024;

fn joined(node: &TestNode, pick: fn(&Property) -> Option<&str>) -> Option<String> {
    let parts: Vec<&str> = node.properties.iter().filter_map(pick).collect();
    if parts.is_empty() {
        None
    } else {
        Some(truncate_output(parts.join("\n"), MAX_REPORTED_OUTPUT))
    }
}

/// Cuts `text` to at most `limit` bytes on a char boundary, noting the cut.
fn truncate_output(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let dropped = text.len() - cut;
    text.truncate(cut);
    text.push_str(&format!("\n... [{} bytes truncated]", dropped));
    text
}

fn stdout_of(property: &Property) -> Option<&str> {
    match property {
        Property::StandardOutput(s) => Some(s),
        _ => None,
    }
}

fn stderr_of(property: &Property) -> Option<&str> {
    match property {
        Property::StandardError(s) => Some(s),
        _ => None,
    }
}

/// Converts one node update into the IPC messages that report it.
///
/// In-progress updates produce nothing.
pub fn node_messages(execution_id: &str, session_uid: &str, node: &TestNode) -> Vec<IpcMessage> {
    let state = node.state();
    let kind = state.kind();
    let mut messages = Vec::new();

    if !kind.is_final() {
        if kind == vigil_core::StateKind::Discovered {
            messages.push(IpcMessage::DiscoveredTests(DiscoveredTestMessages {
                execution_id: execution_id.to_string(),
                tests: vec![DiscoveredTestMessage {
                    uid: node.uid.to_string(),
                    display_name: node.display_name.clone(),
                }],
            }));
        }
        return messages;
    }

    let duration_ms = node
        .properties
        .timing()
        .map(|t| t.duration.as_millis() as u64)
        .unwrap_or(0);
    let reason = state.explanation().map(String::from);
    let stdout = joined(node, stdout_of);
    let stderr = joined(node, stderr_of);

    let mut results = TestResultMessages {
        execution_id: execution_id.to_string(),
        successful: Vec::new(),
        failed: Vec::new(),
    };
    if kind.is_failure() {
        let exception = state.exception();
        results.failed.push(FailedTestResultMessage {
            uid: node.uid.to_string(),
            display_name: node.display_name.clone(),
            state: kind.as_u8(),
            duration_ms,
            reason,
            stdout,
            stderr,
            session_uid: session_uid.to_string(),
            exception_message: exception.map(|e| e.message.clone()),
            exception_type: exception.and_then(|e| e.type_name.clone()),
            stack_trace: exception.and_then(|e| e.stack_trace.clone()),
        });
    } else {
        results.successful.push(SuccessfulTestResultMessage {
            uid: node.uid.to_string(),
            display_name: node.display_name.clone(),
            state: kind.as_u8(),
            duration_ms,
            reason,
            stdout,
            stderr,
            session_uid: session_uid.to_string(),
        });
    }
    messages.push(IpcMessage::TestResults(results));

    let artifacts: Vec<FileArtifactMessage> = node
        .properties
        .file_artifacts()
        .map(|a| FileArtifactMessage {
            full_path: a.path.display().to_string(),
            display_name: a.display_name.clone(),
            description: a.description.clone(),
            test_uid: Some(node.uid.to_string()),
            test_display_name: Some(node.display_name.clone()),
            session_uid: session_uid.to_string(),
        })
        .collect();
    if !artifacts.is_empty() {
        messages.push(IpcMessage::FileArtifacts(FileArtifactMessages {
            execution_id: execution_id.to_string(),
            artifacts,
        }));
    }

    messages
}

fn session_artifact_message(execution_id: &str, artifact: &SessionFileArtifactMessage) -> IpcMessage {
    IpcMessage::FileArtifacts(FileArtifactMessages {
        execution_id: execution_id.to_string(),
        artifacts: vec![FileArtifactMessage {
            full_path: artifact.path.display().to_string(),
            display_name: artifact.display_name.clone(),
            description: artifact.description.clone(),
            test_uid: None,
            test_display_name: None,
            session_uid: artifact.session_uid.to_string(),
        }],
    })
}

fn handler_error(error: IpcError) -> HandlerError {
    match error {
        IpcError::Cancelled => HandlerError::Cancelled(Cancelled),
        other => HandlerError::with_source("IPC report failed", other),
    }
}

// =============================================================================
// IpcReporter
// =============================================================================

/// Forwards bus traffic and lifecycle events over an [`IpcClient`].
pub struct IpcReporter {
    info: ExtensionInfo,
    client: Arc<IpcClient>,
    execution_id: ExecutionId,
}

impl IpcReporter {
    /// Uid of the reporter extension.
    pub const UID: &'static str = "ipc-reporter";

    /// Creates a reporter over a handshaken client.
    pub fn new(client: Arc<IpcClient>, execution_id: ExecutionId) -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(Self::UID, "IPC reporter", "Reports test results to a connected runner"),
            client,
            execution_id,
        })
    }

    /// Returns the reporter registered in every role it plays on the bus and
    /// session.
    pub fn extension_set(self: &Arc<Self>) -> ExtensionSet {
        ExtensionSet::new()
            .with_consumer(self.clone())
            .with_lifetime_handler(self.clone())
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &Arc<IpcClient> {
        &self.client
    }

    /// Sends the host's declared options.
    pub async fn report_command_line_options(&self, options: &[&CommandLineOption]) -> IpcResult<()> {
        let module_path = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let message = IpcMessage::CommandLineOptions(CommandLineOptionMessages {
            module_path,
            options: options
                .iter()
                .map(|o| CommandLineOptionMessage {
                    name: o.name.clone(),
                    description: o.description.clone(),
                    is_hidden: o.is_hidden,
                    is_builtin: o.is_builtin,
                })
                .collect(),
        });
        self.client.send(message, None).await
    }

    async fn session_event(&self, kind: SessionEventType, context: &TestSessionContext) -> Result<(), HandlerError> {
        let event = IpcMessage::SessionEvent(TestSessionEvent {
            session_type: kind,
            session_uid: context.session_uid.to_string(),
            execution_id: self.execution_id.to_string(),
        });
        self.client.send(event, None).await.map_err(handler_error)
    }
}

impl Extension for IpcReporter {
    fn uid(&self) -> &str {
        self.info.uid()
    }
    fn version(&self) -> &str {
        self.info.version()
    }
    fn display_name(&self) -> &str {
        self.info.display_name()
    }
    fn description(&self) -> &str {
        self.info.description()
    }
}

#[async_trait]
impl DataConsumer for IpcReporter {
    fn data_types_consumed(&self) -> &[DataKind] {
        &[DataKind::TestNodeUpdate, DataKind::SessionFileArtifact]
    }

    async fn consume(
        &self,
        _producer: &ProducerInfo,
        message: &BusMessage,
        _cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError> {
        let messages = match message {
            BusMessage::TestNodeUpdate(update) => node_messages(
                self.execution_id.as_str(),
                update.session_uid.as_str(),
                &update.test_node,
            ),
            BusMessage::SessionFileArtifact(artifact) => {
                vec![session_artifact_message(self.execution_id.as_str(), artifact)]
            }
        };

        // Not bound by the run token: final states are still reported after a cancel.
        for message in messages {
            debug!(message = message.name(), "Reporting over IPC");
            self.client.send(message, None).await.map_err(handler_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TestSessionLifetimeHandler for IpcReporter {
    async fn on_test_session_starting(&self, context: &TestSessionContext) -> Result<(), HandlerError> {
        self.session_event(SessionEventType::Start, context).await
    }

    async fn on_test_session_finishing(&self, context: &TestSessionContext) -> Result<(), HandlerError> {
        self.session_event(SessionEventType::End, context).await
    }
}

#[async_trait]
impl TestApplicationLifecycleCallbacks for IpcReporter {
    async fn before_run(&self, cancellation: &TestRunCancellationToken) -> Result<(), HandlerError> {
        let pid = IpcMessage::TestHostProcessPid { pid: std::process::id() };
        self.client.send(pid, Some(cancellation)).await.map_err(handler_error)
    }

    async fn after_run(&self, exit_code: ExitCode, _cancellation: &TestRunCancellationToken) -> Result<(), HandlerError> {
        let exit = IpcMessage::TestHostProcessExit {
            exit_code: exit_code.code(),
        };
        let sent = self.client.send(exit, None).await.map_err(handler_error);
        self.client.close().await;
        sent
    }
}

impl std::fmt::Debug for IpcReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcReporter")
            .field("execution_id", &self.execution_id)
            .field("client", &self.client)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::property::{ExceptionInfo, FileArtifactProperty};
    use vigil_core::TestNodeStateProperty;

    #[test]
    fn test_oversized_output_is_truncated() {
        let node = TestNode::new("a", "a", TestNodeStateProperty::passed())
            .with_property(Property::StandardOutput("x".repeat(MAX_REPORTED_OUTPUT + 10)));

        let messages = node_messages("e", "s", &node);
        let IpcMessage::TestResults(results) = &messages[0] else {
            panic!("expected results, got {:?}", messages[0]);
        };
        let stdout = results.successful[0].stdout.as_deref().unwrap();
        assert!(stdout.starts_with(&"x".repeat(MAX_REPORTED_OUTPUT)));
        assert!(stdout.ends_with("[10 bytes truncated]"));
        assert!(messages[0].encode().ensure_within(crate::codec::DEFAULT_MAX_FRAME_SIZE).is_ok());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = truncate_output("aé".to_string(), 2);
        assert_eq!(text, "a\n... [2 bytes truncated]");
    }

    #[test]
    fn test_in_progress_produces_nothing() {
        let node = TestNode::new("a", "a", TestNodeStateProperty::InProgress);
        assert!(node_messages("e", "s", &node).is_empty());
    }

    #[test]
    fn test_discovered_node() {
        let node = TestNode::new("math.adds", "adds", TestNodeStateProperty::Discovered);
        let messages = node_messages("e", "s", &node);
        assert_eq!(
            messages,
            vec![IpcMessage::DiscoveredTests(DiscoveredTestMessages {
                execution_id: "e".into(),
                tests: vec![DiscoveredTestMessage {
                    uid: "math.adds".into(),
                    display_name: "adds".into()
                }],
            })]
        );
    }

    #[test]
    fn test_failed_node_with_artifact() {
        let node = TestNode::new(
            "math.divides",
            "divides",
            TestNodeStateProperty::failed_with(ExceptionInfo::new("Assertion failed.")),
        )
        .with_property(Property::StandardOutput("one".into()))
        .with_property(Property::StandardOutput("two".into()))
        .with_property(Property::FileArtifact(FileArtifactProperty {
            path: "/tmp/out.log".into(),
            display_name: "log".into(),
            description: None,
        }));

        let messages = node_messages("e", "s", &node);
        assert_eq!(messages.len(), 2);

        let IpcMessage::TestResults(results) = &messages[0] else {
            panic!("expected results, got {:?}", messages[0]);
        };
        assert!(results.successful.is_empty());
        let failed = &results.failed[0];
        assert_eq!(failed.exception_message.as_deref(), Some("Assertion failed."));
        assert_eq!(failed.stdout.as_deref(), Some("one\ntwo"));
        assert_eq!(failed.state, vigil_core::StateKind::Failed.as_u8());

        let IpcMessage::FileArtifacts(artifacts) = &messages[1] else {
            panic!("expected artifacts, got {:?}", messages[1]);
        };
        assert_eq!(artifacts.artifacts[0].test_uid.as_deref(), Some("math.divides"));
    }

    #[test]
    fn test_skipped_node_is_successful_with_reason() {
        let node = TestNode::new("a", "a", TestNodeStateProperty::skipped(Some("slow".into())));
        let messages = node_messages("e", "s", &node);
        let IpcMessage::TestResults(results) = &messages[0] else {
            panic!("expected results");
        };
        assert_eq!(results.successful[0].reason.as_deref(), Some("slow"));
    }
}
