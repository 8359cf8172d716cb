// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Human-readable output.
//!
//! [`ConsoleOutputDevice`] is both the [`OutputDevice`] the host writes
//! banners, errors and the final summary to, and a [`DataConsumer`] that
//! renders node updates as they arrive.
//!
//! # Rendering
//!
//! ```text
//! passed   math::adds (math.adds) 3ms
//! skipped  net::slow (net.slow) - needs network
//! failed   math::divides (math.divides) 1ms
//!   Assertion failed.
//!   at tests/math.rs:42
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::bus::{DataConsumer, ProducerInfo};
use crate::cancellation::TestRunCancellationToken;
use crate::error::HandlerError;
use crate::exit_code::ExitCode;
use crate::extension::{Extension, ExtensionInfo};
use crate::message::{BusMessage, DataKind};
use crate::node::TestNode;
use crate::property::StateKind;
use crate::summary::TestRunSummary;

// =============================================================================
// OutputDevice
// =============================================================================

/// Where the host writes user-facing text.
pub trait OutputDevice: Send + Sync {
    /// Writes the startup banner.
    fn display_banner(&self, banner: &str) -> io::Result<()>;

    /// Writes one line of text.
    fn display_line(&self, line: &str) -> io::Result<()>;

    /// Writes an error message.
    fn display_error(&self, message: &str) -> io::Result<()>;

    /// Writes the final run summary.
    fn display_summary(&self, summary: &TestRunSummary, exit_code: ExitCode) -> io::Result<()>;
}

// =============================================================================
// Rendering
// =============================================================================

fn format_duration(duration: Duration) -> String {
    let millis = Duration::from_millis(duration.as_millis() as u64);
    humantime::format_duration(millis).to_string()
}

/// Renders a node update, or returns `None` for states that are not shown.
pub fn render_node(node: &TestNode, show_passed: bool) -> Option<Vec<String>> {
    let state = node.state();
    let kind = state.kind();
    let duration = node
        .properties
        .timing()
        .map(|t| format!(" {}", format_duration(t.duration)))
        .unwrap_or_default();
    let head = format!("{:<8} {} ({})", kind.as_str(), node.display_name, node.uid);

    let mut lines = match kind {
        StateKind::Discovered | StateKind::InProgress => return None,
        StateKind::Passed if !show_passed => return None,
        StateKind::Passed => vec![format!("{}{}", head, duration)],
        StateKind::Skipped => match state.explanation() {
            Some(reason) => vec![format!("{} - {}", head, reason)],
            None => vec![head],
        },
        StateKind::Failed | StateKind::Timeout | StateKind::Cancelled | StateKind::Error => {
            vec![format!("{}{}", head, duration)]
        }
    };

    if kind.is_failure() {
        if let Some(explanation) = state.explanation() {
            lines.push(format!("  {}", explanation));
        }
        if let Some(exception) = state.exception() {
            lines.push(format!("  {}", exception.message));
            if let Some(type_name) = &exception.type_name {
                lines.push(format!("  type: {}", type_name));
            }
            if let Some(stack) = &exception.stack_trace {
                lines.extend(stack.lines().map(|l| format!("  {}", l)));
            }
        }
    }

    Some(lines)
}

// =============================================================================
// ConsoleOutputDevice
// =============================================================================

/// Writes results to any [`Write`] sink.
pub struct ConsoleOutputDevice {
    info: ExtensionInfo,
    sink: Mutex<Box<dyn Write + Send>>,
    show_passed: bool,
}

impl ConsoleOutputDevice {
    /// Uid of the console output device.
    pub const UID: &'static str = "console-output";

    /// Creates a device writing to `sink`.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            info: ExtensionInfo::builtin(Self::UID, "Console", "Writes test results to the console"),
            sink: Mutex::new(Box::new(sink)),
            show_passed: true,
        }
    }

    /// Creates a device writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Sets whether passed tests are listed.
    pub fn with_show_passed(mut self, show_passed: bool) -> Self {
        self.show_passed = show_passed;
        self
    }

    fn write_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> io::Result<()> {
        let mut sink = self.sink.lock();
        for line in lines {
            writeln!(sink, "{}", line)?;
        }
        sink.flush()
    }
}

impl OutputDevice for ConsoleOutputDevice {
    fn display_banner(&self, banner: &str) -> io::Result<()> {
        self.write_lines(banner.lines())
    }

    fn display_line(&self, line: &str) -> io::Result<()> {
        self.write_lines([line])
    }

    fn display_error(&self, message: &str) -> io::Result<()> {
        let line = format!("error: {}", message);
        self.write_lines([line.as_str()])
    }

    fn display_summary(&self, summary: &TestRunSummary, exit_code: ExitCode) -> io::Result<()> {
        let outcome = if exit_code.is_success() { "Passed!" } else { "Failed!" };
        let counts = format!(
            "{} - total: {}, passed: {}, failed: {}, skipped: {}, timed out: {}, cancelled: {}, errored: {}, duration: {}",
            outcome,
            summary.executed(),
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.timed_out,
            summary.cancelled,
            summary.errored,
            format_duration(summary.duration),
        );
        let code = format!("Exit code: {}", exit_code);
        self.write_lines(["", counts.as_str(), code.as_str()])
    }
}

impl Extension for ConsoleOutputDevice {
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
impl DataConsumer for ConsoleOutputDevice {
    fn data_types_consumed(&self) -> &[DataKind] {
        &[DataKind::TestNodeUpdate, DataKind::SessionFileArtifact]
    }

    async fn consume(
        &self,
        _producer: &ProducerInfo,
        message: &BusMessage,
        _cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError> {
        match message {
            BusMessage::TestNodeUpdate(update) => {
                if let Some(lines) = render_node(&update.test_node, self.show_passed) {
                    self.write_lines(lines.iter().map(String::as_str))?;
                }
            }
            BusMessage::SessionFileArtifact(artifact) => {
                let line = format!("artifact {} ({})", artifact.display_name, artifact.path.display());
                self.write_lines([line.as_str()])?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConsoleOutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleOutputDevice")
            .field("show_passed", &self.show_passed)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CapturedOutput
// =============================================================================

/// A cloneable in-memory sink, for inspecting rendered output.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{ExceptionInfo, Property, TestNodeStateProperty, TimingProperty};
    use crate::types::SessionUid;
    use chrono::Utc;

    #[tokio::test]
    async fn test_failed_node_renders_uid_and_message() {
        let captured = CapturedOutput::new();
        let device = ConsoleOutputDevice::new(captured.clone());
        let node = TestNode::new(
            "math.divides",
            "math::divides",
            TestNodeStateProperty::failed_with(
                ExceptionInfo::new("Assertion failed.").with_stack_trace("at tests/math.rs:42"),
            ),
        );
        let producer = ProducerInfo {
            uid: "p".to_string(),
            display_name: "p".to_string(),
        };

        device
            .consume(
                &producer,
                &BusMessage::node_update(SessionUid::new("s"), node, None),
                &TestRunCancellationToken::new(),
            )
            .await
            .unwrap();

        let text = captured.contents();
        assert!(text.contains("failed"));
        assert!(text.contains("(math.divides)"));
        assert!(text.contains("  Assertion failed."));
        assert!(text.contains("  at tests/math.rs:42"));
    }

    #[test]
    fn test_render_states() {
        let now = Utc::now();
        let passed = TestNode::new("a", "a", TestNodeStateProperty::passed())
            .with_property(Property::Timing(TimingProperty::new(now, now + chrono::Duration::milliseconds(5))));
        assert_eq!(render_node(&passed, true).unwrap(), vec!["passed   a (a) 5ms".to_string()]);
        assert!(render_node(&passed, false).is_none());

        let in_progress = TestNode::new("a", "a", TestNodeStateProperty::InProgress);
        assert!(render_node(&in_progress, true).is_none());

        let skipped = TestNode::new("b", "b", TestNodeStateProperty::skipped(Some("slow".into())));
        assert_eq!(render_node(&skipped, true).unwrap(), vec!["skipped  b (b) - slow".to_string()]);

        let timeout = TestNode::new("c", "c", TestNodeStateProperty::timeout(Duration::from_secs(2)));
        let lines = render_node(&timeout, true).unwrap();
        assert_eq!(lines[0], "timed out c (c)");
        assert_eq!(lines[1], "  Test exceeded its timeout of 2s");
    }

    #[test]
    fn test_summary_output() {
        let captured = CapturedOutput::new();
        let device = ConsoleOutputDevice::new(captured.clone());
        let summary = TestRunSummary {
            total: 2,
            passed: 1,
            failed: 1,
            ..Default::default()
        };

        device.display_summary(&summary, ExitCode::AtLeastOneTestFailed).unwrap();
        let text = captured.contents();
        assert!(text.contains("Failed! - total: 2, passed: 1, failed: 1"));
        assert!(text.contains("Exit code: 2 (at least one test failed)"));
    }
}
