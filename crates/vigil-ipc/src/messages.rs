// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! IPC message catalogue.
//!
//! | Id | Message                      |
//! |----|------------------------------|
//! | 0  | `VoidResponse`               |
//! | 1  | `TestHostProcessExitRequest` |
//! | 2  | `TestHostProcessPidRequest`  |
//! | 3  | `CommandLineOptionMessages`  |
//! | 5  | `DiscoveredTestMessages`     |
//! | 6  | `TestResultMessages`         |
//! | 7  | `FileArtifactMessages`       |
//! | 8  | `TestSessionEvent`           |
//! | 9  | `HandshakeMessage`           |
//!
//! Fields are encoded in declaration order.

use crate::codec::{Decoder, Encoder, Frame};
use crate::error::{IpcError, IpcResult};
use crate::handshake::HandshakeInfo;

/// Wire ids.
pub mod ids {
    /// `VoidResponse`.
    pub const VOID_RESPONSE: u32 = 0;
    /// `TestHostProcessExitRequest`.
    pub const PROCESS_EXIT: u32 = 1;
    /// `TestHostProcessPidRequest`.
    pub const PROCESS_PID: u32 = 2;
    /// `CommandLineOptionMessages`.
    pub const COMMAND_LINE_OPTIONS: u32 = 3;
    /// `DiscoveredTestMessages`.
    pub const DISCOVERED_TESTS: u32 = 5;
    /// `TestResultMessages`.
    pub const TEST_RESULTS: u32 = 6;
    /// `FileArtifactMessages`.
    pub const FILE_ARTIFACTS: u32 = 7;
    /// `TestSessionEvent`.
    pub const SESSION_EVENT: u32 = 8;
    /// `HandshakeMessage`.
    pub const HANDSHAKE: u32 = 9;
}

// =============================================================================
// Payload Types
// =============================================================================

/// One command-line option a test host declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineOptionMessage {
    /// Option name without dashes.
    pub name: String,
    /// Help text.
    pub description: String,
    /// Hidden from help output.
    pub is_hidden: bool,
    /// Declared by the platform itself.
    pub is_builtin: bool,
}

/// Options declared by a test host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineOptionMessages {
    /// Path of the test host executable.
    pub module_path: String,
    /// Declared options.
    pub options: Vec<CommandLineOptionMessage>,
}

/// A discovered test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTestMessage {
    /// Node uid.
    pub uid: String,
    /// Display name.
    pub display_name: String,
}

/// A batch of discovered tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTestMessages {
    /// Execution id of the run.
    pub execution_id: String,
    /// Discovered tests.
    pub tests: Vec<DiscoveredTestMessage>,
}

/// A non-failing final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessfulTestResultMessage {
    /// Node uid.
    pub uid: String,
    /// Display name.
    pub display_name: String,
    /// State wire code.
    pub state: u8,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Explanation or skip reason.
    pub reason: Option<String>,
    /// Captured standard output.
    pub stdout: Option<String>,
    /// Captured standard error.
    pub stderr: Option<String>,
    /// Session uid.
    pub session_uid: String,
}

/// A failing final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTestResultMessage {
    /// Node uid.
    pub uid: String,
    /// Display name.
    pub display_name: String,
    /// State wire code.
    pub state: u8,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Explanation.
    pub reason: Option<String>,
    /// Captured standard output.
    pub stdout: Option<String>,
    /// Captured standard error.
    pub stderr: Option<String>,
    /// Session uid.
    pub session_uid: String,
    /// Exception message.
    pub exception_message: Option<String>,
    /// Exception type name.
    pub exception_type: Option<String>,
    /// Stack trace.
    pub stack_trace: Option<String>,
}

/// A batch of final results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResultMessages {
    /// Execution id of the run.
    pub execution_id: String,
    /// Passed and skipped results.
    pub successful: Vec<SuccessfulTestResultMessage>,
    /// Failed, timed out, cancelled and errored results.
    pub failed: Vec<FailedTestResultMessage>,
}

/// A file produced by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifactMessage {
    /// Absolute path.
    pub full_path: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    pub description: Option<String>,
    /// Producing test, for test-level artifacts.
    pub test_uid: Option<String>,
    /// Producing test's display name.
    pub test_display_name: Option<String>,
    /// Session uid.
    pub session_uid: String,
}

/// A batch of file artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifactMessages {
    /// Execution id of the run.
    pub execution_id: String,
    /// Artifacts.
    pub artifacts: Vec<FileArtifactMessage>,
}

/// Which session edge a [`TestSessionEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventType {
    /// Session started.
    Start,
    /// Session finished.
    End,
}

impl SessionEventType {
    fn code(self) -> u8 {
        match self {
            SessionEventType::Start => 0,
            SessionEventType::End => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SessionEventType::Start),
            1 => Some(SessionEventType::End),
            _ => None,
        }
    }
}

/// A session start or end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSessionEvent {
    /// Start or end.
    pub session_type: SessionEventType,
    /// Session uid.
    pub session_uid: String,
    /// Execution id of the run.
    pub execution_id: String,
}

// =============================================================================
// IpcMessage
// =============================================================================

/// Every message that can cross the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    /// Acknowledgement with no content.
    VoidResponse,
    /// The test host is about to exit with a code.
    TestHostProcessExit {
        /// Process exit code.
        exit_code: i32,
    },
    /// The test host's process id.
    TestHostProcessPid {
        /// Process id.
        pid: u32,
    },
    /// Declared command-line options.
    CommandLineOptions(CommandLineOptionMessages),
    /// Discovered tests.
    DiscoveredTests(DiscoveredTestMessages),
    /// Final test results.
    TestResults(TestResultMessages),
    /// File artifacts.
    FileArtifacts(FileArtifactMessages),
    /// Session start/end.
    SessionEvent(TestSessionEvent),
    /// Connection handshake.
    Handshake(HandshakeInfo),
}

impl IpcMessage {
    /// Returns the wire id.
    pub fn id(&self) -> u32 {
        match self {
            IpcMessage::VoidResponse => ids::VOID_RESPONSE,
            IpcMessage::TestHostProcessExit { .. } => ids::PROCESS_EXIT,
            IpcMessage::TestHostProcessPid { .. } => ids::PROCESS_PID,
            IpcMessage::CommandLineOptions(_) => ids::COMMAND_LINE_OPTIONS,
            IpcMessage::DiscoveredTests(_) => ids::DISCOVERED_TESTS,
            IpcMessage::TestResults(_) => ids::TEST_RESULTS,
            IpcMessage::FileArtifacts(_) => ids::FILE_ARTIFACTS,
            IpcMessage::SessionEvent(_) => ids::SESSION_EVENT,
            IpcMessage::Handshake(_) => ids::HANDSHAKE,
        }
    }

    /// Returns the message name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            IpcMessage::VoidResponse => "VoidResponse",
            IpcMessage::TestHostProcessExit { .. } => "TestHostProcessExitRequest",
            IpcMessage::TestHostProcessPid { .. } => "TestHostProcessPidRequest",
            IpcMessage::CommandLineOptions(_) => "CommandLineOptionMessages",
            IpcMessage::DiscoveredTests(_) => "DiscoveredTestMessages",
            IpcMessage::TestResults(_) => "TestResultMessages",
            IpcMessage::FileArtifacts(_) => "FileArtifactMessages",
            IpcMessage::SessionEvent(_) => "TestSessionEvent",
            IpcMessage::Handshake(_) => "HandshakeMessage",
        }
    }

    /// Encodes the message into a frame.
    pub fn encode(&self) -> Frame {
        let mut enc = Encoder::new();
        match self {
            IpcMessage::VoidResponse => {}
            IpcMessage::TestHostProcessExit { exit_code } => {
                enc.i32(*exit_code);
            }
            IpcMessage::TestHostProcessPid { pid } => {
                enc.u32(*pid);
            }
            IpcMessage::CommandLineOptions(m) => {
                enc.string(&m.module_path).list(&m.options, |e, o| {
                    e.string(&o.name)
                        .string(&o.description)
                        .bool(o.is_hidden)
                        .bool(o.is_builtin);
                });
            }
            IpcMessage::DiscoveredTests(m) => {
                enc.string(&m.execution_id).list(&m.tests, |e, t| {
                    e.string(&t.uid).string(&t.display_name);
                });
            }
            IpcMessage::TestResults(m) => {
                enc.string(&m.execution_id)
                    .list(&m.successful, |e, r| {
                        encode_result_head(
                            e,
                            ResultHead {
                                uid: &r.uid,
                                display_name: &r.display_name,
                                state: r.state,
                                duration_ms: r.duration_ms,
                                reason: r.reason.as_deref(),
                                stdout: r.stdout.as_deref(),
                                stderr: r.stderr.as_deref(),
                                session_uid: &r.session_uid,
                            },
                        );
                    })
                    .list(&m.failed, |e, r| {
                        encode_result_head(
                            e,
                            ResultHead {
                                uid: &r.uid,
                                display_name: &r.display_name,
                                state: r.state,
                                duration_ms: r.duration_ms,
                                reason: r.reason.as_deref(),
                                stdout: r.stdout.as_deref(),
                                stderr: r.stderr.as_deref(),
                                session_uid: &r.session_uid,
                            },
                        );
                        e.opt_string(r.exception_message.as_deref())
                            .opt_string(r.exception_type.as_deref())
                            .opt_string(r.stack_trace.as_deref());
                    });
            }
            IpcMessage::FileArtifacts(m) => {
                enc.string(&m.execution_id).list(&m.artifacts, |e, a| {
                    e.string(&a.full_path)
                        .string(&a.display_name)
                        .opt_string(a.description.as_deref())
                        .opt_string(a.test_uid.as_deref())
                        .opt_string(a.test_display_name.as_deref())
                        .string(&a.session_uid);
                });
            }
            IpcMessage::SessionEvent(m) => {
                enc.u8(m.session_type.code())
                    .string(&m.session_uid)
                    .string(&m.execution_id);
            }
            IpcMessage::Handshake(info) => {
                let entries: Vec<(u8, &str)> = info.entries().collect();
                enc.list(&entries, |e, (key, value)| {
                    e.u8(*key).string(value);
                });
            }
        }
        Frame::new(self.id(), enc.finish())
    }

    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// - `IpcError::UnknownMessageId` - The id is not in the catalogue
    /// - `IpcError::Malformed` - The payload is short, invalid or has
    ///   trailing bytes
    pub fn decode(frame: Frame) -> IpcResult<Self> {
        let id = frame.message_id;
        let mut dec = Decoder::new(id, frame.payload);

        let message = match id {
            ids::VOID_RESPONSE => IpcMessage::VoidResponse,
            ids::PROCESS_EXIT => IpcMessage::TestHostProcessExit { exit_code: dec.i32()? },
            ids::PROCESS_PID => IpcMessage::TestHostProcessPid { pid: dec.u32()? },
            ids::COMMAND_LINE_OPTIONS => IpcMessage::CommandLineOptions(CommandLineOptionMessages {
                module_path: dec.string()?,
                options: dec.list(|d| {
                    Ok(CommandLineOptionMessage {
                        name: d.string()?,
                        description: d.string()?,
                        is_hidden: d.bool()?,
                        is_builtin: d.bool()?,
                    })
                })?,
            }),
            ids::DISCOVERED_TESTS => IpcMessage::DiscoveredTests(DiscoveredTestMessages {
                execution_id: dec.string()?,
                tests: dec.list(|d| {
                    Ok(DiscoveredTestMessage {
                        uid: d.string()?,
                        display_name: d.string()?,
                    })
                })?,
            }),
            ids::TEST_RESULTS => IpcMessage::TestResults(TestResultMessages {
                execution_id: dec.string()?,
                successful: dec.list(|d| {
                    Ok(SuccessfulTestResultMessage {
                        uid: d.string()?,
                        display_name: d.string()?,
                        state: d.u8()?,
                        duration_ms: d.u64()?,
                        reason: d.opt_string()?,
                        stdout: d.opt_string()?,
                        stderr: d.opt_string()?,
                        session_uid: d.string()?,
                    })
                })?,
                failed: dec.list(|d| {
                    Ok(FailedTestResultMessage {
                        uid: d.string()?,
                        display_name: d.string()?,
                        state: d.u8()?,
                        duration_ms: d.u64()?,
                        reason: d.opt_string()?,
                        stdout: d.opt_string()?,
                        stderr: d.opt_string()?,
                        session_uid: d.string()?,
                        exception_message: d.opt_string()?,
                        exception_type: d.opt_string()?,
                        stack_trace: d.opt_string()?,
                    })
                })?,
            }),
            ids::FILE_ARTIFACTS => IpcMessage::FileArtifacts(FileArtifactMessages {
                execution_id: dec.string()?,
                artifacts: dec.list(|d| {
                    Ok(FileArtifactMessage {
                        full_path: d.string()?,
                        display_name: d.string()?,
                        description: d.opt_string()?,
                        test_uid: d.opt_string()?,
                        test_display_name: d.opt_string()?,
                        session_uid: d.string()?,
                    })
                })?,
            }),
            ids::SESSION_EVENT => {
                let code = dec.u8()?;
                let session_type = SessionEventType::from_code(code)
                    .ok_or_else(|| IpcError::malformed(id, format!("unknown session event type {}", code)))?;
                IpcMessage::SessionEvent(TestSessionEvent {
                    session_type,
                    session_uid: dec.string()?,
                    execution_id: dec.string()?,
                })
            }
            ids::HANDSHAKE => IpcMessage::Handshake(
                dec.list(|d| Ok((d.u8()?, d.string()?)))?.into_iter().collect(),
            ),
            unknown => return Err(IpcError::UnknownMessageId(unknown)),
        };

        dec.finish()?;
        Ok(message)
    }
}

struct ResultHead<'a> {
    uid: &'a str,
    display_name: &'a str,
    state: u8,
    duration_ms: u64,
    reason: Option<&'a str>,
    stdout: Option<&'a str>,
    stderr: Option<&'a str>,
    session_uid: &'a str,
}

fn encode_result_head(enc: &mut Encoder, head: ResultHead<'_>) {
    enc.string(head.uid)
        .string(head.display_name)
        .u8(head.state)
        .u64(head.duration_ms)
        .opt_string(head.reason)
        .opt_string(head.stdout)
        .opt_string(head.stderr)
        .string(head.session_uid);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakeKey;

    fn round_trip(message: IpcMessage) {
        let frame = message.encode();
        assert_eq!(frame.message_id, message.id());
        assert_eq!(IpcMessage::decode(frame).unwrap(), message);
    }

    fn failed_result(uid: &str) -> FailedTestResultMessage {
        FailedTestResultMessage {
            uid: uid.into(),
            display_name: String::new(),
            state: 4,
            duration_ms: 12,
            reason: None,
            stdout: Some("line 1\nline 2".into()),
            stderr: None,
            session_uid: "s".into(),
            exception_message: Some("Assertion failed.".into()),
            exception_type: Some("assertion".into()),
            stack_trace: Some("at tests/math.rs:42".into()),
        }
    }

    #[test]
    fn test_messages_survive_the_wire() {
        round_trip(IpcMessage::VoidResponse);
        round_trip(IpcMessage::TestHostProcessExit { exit_code: -1 });
        round_trip(IpcMessage::TestHostProcessPid { pid: u32::MAX });
        round_trip(IpcMessage::CommandLineOptions(CommandLineOptionMessages {
            module_path: String::new(),
            options: vec![CommandLineOptionMessage {
                name: "filter".into(),
                description: "Run matching tests".into(),
                is_hidden: false,
                is_builtin: true,
            }],
        }));
        round_trip(IpcMessage::DiscoveredTests(DiscoveredTestMessages {
            execution_id: "e".into(),
            tests: Vec::new(),
        }));
        round_trip(IpcMessage::TestResults(TestResultMessages {
            execution_id: "e".into(),
            successful: vec![SuccessfulTestResultMessage {
                uid: "math.adds".into(),
                display_name: "adds".into(),
                state: 2,
                duration_ms: 0,
                reason: Some(String::new()),
                stdout: None,
                stderr: None,
                session_uid: "s".into(),
            }],
            failed: vec![failed_result("math.divides")],
        }));
        round_trip(IpcMessage::FileArtifacts(FileArtifactMessages {
            execution_id: "e".into(),
            artifacts: vec![FileArtifactMessage {
                full_path: "/tmp/report.txt".into(),
                display_name: "report".into(),
                description: None,
                test_uid: Some("math.adds".into()),
                test_display_name: None,
                session_uid: "s".into(),
            }],
        }));
        round_trip(IpcMessage::SessionEvent(TestSessionEvent {
            session_type: SessionEventType::End,
            session_uid: "s".into(),
            execution_id: "e".into(),
        }));
        round_trip(IpcMessage::Handshake(
            HandshakeInfo::new()
                .with(HandshakeKey::ProtocolVersion, "1.0.0")
                .with(HandshakeKey::Os, ""),
        ));
    }

    #[test]
    fn test_large_lists() {
        let failed: Vec<_> = (0..5_000).map(|i| failed_result(&format!("t{}", i))).collect();
        round_trip(IpcMessage::TestResults(TestResultMessages {
            execution_id: "e".into(),
            successful: Vec::new(),
            failed,
        }));
    }

    #[test]
    fn test_unknown_id_and_bad_payloads() {
        let err = IpcMessage::decode(Frame::new(4, Vec::new())).unwrap_err();
        assert!(matches!(err, IpcError::UnknownMessageId(4)));

        let err = IpcMessage::decode(Frame::new(ids::PROCESS_EXIT, vec![1, 2])).unwrap_err();
        assert!(matches!(err, IpcError::Malformed { message_id: 1, .. }));

        let err = IpcMessage::decode(Frame::new(ids::VOID_RESPONSE, vec![0])).unwrap_err();
        assert!(err.is_protocol_error());

        let mut bad_event = IpcMessage::SessionEvent(TestSessionEvent {
            session_type: SessionEventType::Start,
            session_uid: "s".into(),
            execution_id: "e".into(),
        })
        .encode();
        let mut payload = bad_event.payload.to_vec();
        payload[0] = 9;
        bad_event.payload = payload.into();
        assert!(IpcMessage::decode(bad_event).is_err());
    }
}
