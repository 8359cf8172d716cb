// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed test node properties.
//!
//! A [`PropertyBag`] holds exactly one [`TestNodeStateProperty`] plus an
//! ordered list of additive [`Property`] values. The state is kept apart
//! from the list, so a bag with zero or two states cannot be built.
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::property::{ExceptionInfo, Property, PropertyBag, TestNodeStateProperty};
//!
//! let bag = PropertyBag::new(TestNodeStateProperty::failed_with(
//!     ExceptionInfo::new("Assertion failed."),
//! ))
//! .with(Property::Category("slow".into()));
//!
//! assert!(bag.state().is_failure());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// StateKind
// =============================================================================

/// Discriminant of a [`TestNodeStateProperty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// The node was discovered but not executed.
    Discovered,
    /// The node is executing.
    InProgress,
    /// The node passed.
    Passed,
    /// The node failed.
    Failed,
    /// The node was skipped.
    Skipped,
    /// The node was cancelled before completing.
    Cancelled,
    /// The node exceeded its timeout.
    Timeout,
    /// The node errored outside of its assertions.
    Error,
}

impl StateKind {
    /// Wire code used by the IPC protocol.
    pub fn as_u8(&self) -> u8 {
        match self {
            StateKind::Discovered => 0,
            StateKind::InProgress => 1,
            StateKind::Passed => 2,
            StateKind::Skipped => 3,
            StateKind::Failed => 4,
            StateKind::Error => 5,
            StateKind::Timeout => 6,
            StateKind::Cancelled => 7,
        }
    }

    /// Decodes a wire code.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => StateKind::Discovered,
            1 => StateKind::InProgress,
            2 => StateKind::Passed,
            3 => StateKind::Skipped,
            4 => StateKind::Failed,
            5 => StateKind::Error,
            6 => StateKind::Timeout,
            7 => StateKind::Cancelled,
            _ => return None,
        })
    }

    /// Returns the lowercase name used in output and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Discovered => "discovered",
            StateKind::InProgress => "in progress",
            StateKind::Passed => "passed",
            StateKind::Failed => "failed",
            StateKind::Skipped => "skipped",
            StateKind::Cancelled => "cancelled",
            StateKind::Timeout => "timed out",
            StateKind::Error => "error",
        }
    }

    /// Returns `true` for states that end a node's execution.
    pub fn is_final(&self) -> bool {
        !matches!(self, StateKind::Discovered | StateKind::InProgress)
    }

    /// Returns `true` for states that count as a failed outcome.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StateKind::Failed | StateKind::Timeout | StateKind::Error | StateKind::Cancelled
        )
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ExceptionInfo
// =============================================================================

/// Failure details attached to a non-passing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Human-readable message.
    pub message: String,
    /// Type or category of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Captured backtrace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ExceptionInfo {
    /// Creates exception info with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            type_name: None,
            stack_trace: None,
        }
    }

    /// Sets the type name.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Sets the stack trace.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

// =============================================================================
// TestNodeStateProperty
// =============================================================================

/// The lifecycle state of a test node. Exactly one per [`PropertyBag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TestNodeStateProperty {
    /// Discovered, not executed.
    Discovered,
    /// Currently executing.
    InProgress,
    /// Completed successfully.
    Passed {
        /// Optional explanation.
        explanation: Option<String>,
    },
    /// Completed with a failed assertion or unexpected panic.
    Failed {
        /// Optional explanation.
        explanation: Option<String>,
        /// Failure details.
        exception: Option<ExceptionInfo>,
    },
    /// Not executed on purpose.
    Skipped {
        /// Why the node was skipped.
        reason: Option<String>,
    },
    /// Stopped by cancellation.
    Cancelled {
        /// Optional explanation.
        explanation: Option<String>,
        /// Failure details.
        exception: Option<ExceptionInfo>,
    },
    /// Exceeded its timeout.
    Timeout {
        /// Optional explanation.
        explanation: Option<String>,
        /// Failure details.
        exception: Option<ExceptionInfo>,
    },
    /// Failed outside of the test body (setup, infrastructure).
    Error {
        /// Optional explanation.
        explanation: Option<String>,
        /// Failure details.
        exception: Option<ExceptionInfo>,
    },
}

impl TestNodeStateProperty {
    /// A passed state without explanation.
    pub fn passed() -> Self {
        Self::Passed { explanation: None }
    }

    /// A failed state carrying only a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::failed_with(ExceptionInfo::new(message))
    }

    /// A failed state carrying exception info.
    pub fn failed_with(exception: ExceptionInfo) -> Self {
        Self::Failed {
            explanation: None,
            exception: Some(exception),
        }
    }

    /// A skipped state.
    pub fn skipped(reason: Option<String>) -> Self {
        Self::Skipped { reason }
    }

    /// A cancelled state.
    pub fn cancelled() -> Self {
        Self::Cancelled {
            explanation: None,
            exception: None,
        }
    }

    /// A timeout state describing the exceeded limit.
    pub fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            explanation: Some(format!(
                "Test exceeded its timeout of {}",
                humantime::format_duration(limit)
            )),
            exception: None,
        }
    }

    /// An error state carrying exception info.
    pub fn error(exception: ExceptionInfo) -> Self {
        Self::Error {
            explanation: None,
            exception: Some(exception),
        }
    }

    /// Returns the state's discriminant.
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Discovered => StateKind::Discovered,
            Self::InProgress => StateKind::InProgress,
            Self::Passed { .. } => StateKind::Passed,
            Self::Failed { .. } => StateKind::Failed,
            Self::Skipped { .. } => StateKind::Skipped,
            Self::Cancelled { .. } => StateKind::Cancelled,
            Self::Timeout { .. } => StateKind::Timeout,
            Self::Error { .. } => StateKind::Error,
        }
    }

    /// Returns `true` for states that end a node's execution.
    pub fn is_final(&self) -> bool {
        self.kind().is_final()
    }

    /// Returns `true` for failed outcomes.
    pub fn is_failure(&self) -> bool {
        self.kind().is_failure()
    }

    /// Returns the explanation or skip reason, if any.
    pub fn explanation(&self) -> Option<&str> {
        match self {
            Self::Passed { explanation }
            | Self::Failed { explanation, .. }
            | Self::Cancelled { explanation, .. }
            | Self::Timeout { explanation, .. }
            | Self::Error { explanation, .. } => explanation.as_deref(),
            Self::Skipped { reason } => reason.as_deref(),
            Self::Discovered | Self::InProgress => None,
        }
    }

    /// Returns the exception info, if any.
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match self {
            Self::Failed { exception, .. }
            | Self::Cancelled { exception, .. }
            | Self::Timeout { exception, .. }
            | Self::Error { exception, .. } => exception.as_ref(),
            _ => None,
        }
    }
}

// =============================================================================
// Additive Properties
// =============================================================================

/// Execution timing of a test node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingProperty {
    /// Start time.
    pub start: DateTime<Utc>,
    /// End time.
    pub end: DateTime<Utc>,
    /// Wall-clock duration.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl TimingProperty {
    /// Creates timing from a start and end instant.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let duration = (end - start).to_std().unwrap_or_default();
        Self { start, end, duration }
    }
}

/// Source location of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocationProperty {
    /// Source file path.
    pub path: PathBuf,
    /// First line.
    pub line_start: u32,
    /// Last line.
    pub line_end: u32,
}

/// Structured identity of the function implementing a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodIdentifierProperty {
    /// Module path, e.g. `my_crate::math`.
    pub module_path: String,
    /// Enclosing type, if any.
    pub type_name: Option<String>,
    /// Function name.
    pub method_name: String,
}

/// A file produced by a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifactProperty {
    /// Path to the file.
    pub path: PathBuf,
    /// Display name.
    pub display_name: String,
    /// Optional description.
    pub description: Option<String>,
}

/// Additive test node properties.
///
/// These are appended across successive updates of the same node and are
/// never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Property {
    /// Execution timing.
    Timing(TimingProperty),
    /// Source location.
    FileLocation(FileLocationProperty),
    /// Implementing function identity.
    MethodIdentifier(MethodIdentifierProperty),
    /// Category label used by filters.
    Category(String),
    /// Arbitrary key/value metadata.
    Trait {
        /// Trait key.
        key: String,
        /// Trait value.
        value: String,
    },
    /// File artifact produced by the node.
    FileArtifact(FileArtifactProperty),
    /// Captured standard output.
    StandardOutput(String),
    /// Captured standard error.
    StandardError(String),
}

impl Property {
    /// Short name of the property type for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Property::Timing(_) => "timing",
            Property::FileLocation(_) => "file_location",
            Property::MethodIdentifier(_) => "method_identifier",
            Property::Category(_) => "category",
            Property::Trait { .. } => "trait",
            Property::FileArtifact(_) => "file_artifact",
            Property::StandardOutput(_) => "standard_output",
            Property::StandardError(_) => "standard_error",
        }
    }
}

// =============================================================================
// PropertyBag
// =============================================================================

/// An ordered collection of immutable properties with exactly one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBag {
    state: TestNodeStateProperty,
    #[serde(default)]
    properties: Vec<Property>,
}

impl PropertyBag {
    /// Creates a bag holding only a state.
    pub fn new(state: TestNodeStateProperty) -> Self {
        Self {
            state,
            properties: Vec::new(),
        }
    }

    /// Appends a property, builder style.
    pub fn with(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Appends a property.
    pub fn push(&mut self, property: Property) {
        self.properties.push(property);
    }

    /// Appends every property from an iterator.
    pub fn extend(&mut self, properties: impl IntoIterator<Item = Property>) {
        self.properties.extend(properties);
    }

    /// Returns the current state.
    pub fn state(&self) -> &TestNodeStateProperty {
        &self.state
    }

    /// Returns a bag with a new state and every property of this one.
    pub fn with_state(&self, state: TestNodeStateProperty) -> Self {
        Self {
            state,
            properties: self.properties.clone(),
        }
    }

    /// Iterates over the additive properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Number of additive properties (the state is not counted).
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if there are no additive properties.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns the most recent timing property.
    pub fn timing(&self) -> Option<&TimingProperty> {
        self.properties.iter().rev().find_map(|p| match p {
            Property::Timing(t) => Some(t),
            _ => None,
        })
    }

    /// Returns the source location, if attached.
    pub fn file_location(&self) -> Option<&FileLocationProperty> {
        self.properties.iter().find_map(|p| match p {
            Property::FileLocation(l) => Some(l),
            _ => None,
        })
    }

    /// Iterates over category labels.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().filter_map(|p| match p {
            Property::Category(c) => Some(c.as_str()),
            _ => None,
        })
    }

    /// Iterates over file artifacts.
    pub fn file_artifacts(&self) -> impl Iterator<Item = &FileArtifactProperty> {
        self.properties.iter().filter_map(|p| match p {
            Property::FileArtifact(a) => Some(a),
            _ => None,
        })
    }

    /// Concatenated standard output captured for the node.
    pub fn standard_output(&self) -> Option<String> {
        join_text(self.properties.iter().filter_map(|p| match p {
            Property::StandardOutput(s) => Some(s.as_str()),
            _ => None,
        }))
    }

    /// Concatenated standard error captured for the node.
    pub fn standard_error(&self) -> Option<String> {
        join_text(self.properties.iter().filter_map(|p| match p {
            Property::StandardError(s) => Some(s.as_str()),
            _ => None,
        }))
    }
}

fn join_text<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined: Vec<&str> = parts.collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join("\n"))
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_kind_wire_codes() {
        for kind in [
            StateKind::Discovered,
            StateKind::InProgress,
            StateKind::Passed,
            StateKind::Failed,
            StateKind::Skipped,
            StateKind::Cancelled,
            StateKind::Timeout,
            StateKind::Error,
        ] {
            assert_eq!(StateKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(StateKind::from_u8(200), None);
    }

    #[test]
    fn test_state_classification() {
        assert!(!TestNodeStateProperty::InProgress.is_final());
        assert!(TestNodeStateProperty::passed().is_final());
        assert!(!TestNodeStateProperty::passed().is_failure());
        assert!(TestNodeStateProperty::failed("boom").is_failure());
        assert!(TestNodeStateProperty::timeout(Duration::from_secs(1)).is_failure());
        assert!(!TestNodeStateProperty::skipped(None).is_failure());
    }

    #[test]
    fn test_failed_state_exposes_exception() {
        let state = TestNodeStateProperty::failed_with(
            ExceptionInfo::new("Assertion failed.").with_type_name("assertion"),
        );
        let exception = state.exception().unwrap();
        assert_eq!(exception.message, "Assertion failed.");
        assert_eq!(exception.type_name.as_deref(), Some("assertion"));
    }

    #[test]
    fn test_timeout_explanation_mentions_limit() {
        let state = TestNodeStateProperty::timeout(Duration::from_millis(1500));
        assert_eq!(
            state.explanation(),
            Some("Test exceeded its timeout of 1s 500ms")
        );
    }

    #[test]
    fn test_bag_with_state_keeps_properties() {
        let bag = PropertyBag::new(TestNodeStateProperty::InProgress)
            .with(Property::Category("slow".into()))
            .with(Property::StandardOutput("line 1".into()));

        let next = bag.with_state(TestNodeStateProperty::passed());
        assert_eq!(next.state().kind(), StateKind::Passed);
        assert_eq!(next.len(), 2);
        assert_eq!(next.categories().collect::<Vec<_>>(), vec!["slow"]);
        assert_eq!(next.standard_output().as_deref(), Some("line 1"));
        assert!(next.standard_error().is_none());
    }

    #[test]
    fn test_latest_timing_wins() {
        let start = Utc::now();
        let first = TimingProperty::new(start, start + chrono::Duration::milliseconds(5));
        let second = TimingProperty::new(start, start + chrono::Duration::milliseconds(10));
        let bag = PropertyBag::new(TestNodeStateProperty::passed())
            .with(Property::Timing(first))
            .with(Property::Timing(second.clone()));

        assert_eq!(bag.timing(), Some(&second));
        assert_eq!(second.duration, Duration::from_millis(10));
    }
}
