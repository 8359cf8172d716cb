// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for vigil.
//!
//! This module defines the error types shared by the test platform core:
//!
//! - Clear, descriptive error messages
//! - Error chaining for traceability
//! - A distinguishable cancellation outcome (never an ordinary failure)
//! - Stable `error_type()` strings for structured logging
//!
//! # Error Hierarchy
//!
//! ```text
//! VigilError (root)
//! ├── BusError          - Message bus publish/drain failures
//! ├── SessionError      - Session lifecycle transitions and handlers
//! ├── ExtensionError    - Extension registration table and factories
//! ├── CommandLineError  - Command-line option validation
//! └── Cancelled         - Cooperative cancellation (expected shutdown)
//! ```
//!
//! # Examples
//!
//! ```
//! use vigil_core::error::{Cancelled, VigilError};
//!
//! let error: VigilError = Cancelled.into();
//! assert!(error.is_cancellation());
//! assert_eq!(error.error_type(), "cancelled");
//! ```

use std::fmt;

use thiserror::Error;

use crate::command_line::ArgumentArity;
use crate::message::DataKind;
use crate::session::SessionState;
use crate::types::SessionUid;

// =============================================================================
// VigilError - Root Error Type
// =============================================================================

/// The root error type for vigil.
#[derive(Debug, Error)]
pub enum VigilError {
    /// Message bus error.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Session lifecycle error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Extension registration or creation error.
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// Command-line validation error.
    #[error("Command line error: {0}")]
    CommandLine(#[from] CommandLineError),

    /// The run was cancelled.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),

    /// The test framework failed while handling a request.
    #[error("Test framework '{framework}' failed: {message}")]
    Framework {
        /// Framework uid.
        framework: String,
        /// Error message.
        message: String,
    },

    /// Output device failure.
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

impl VigilError {
    /// Creates a framework error.
    pub fn framework(framework: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Framework {
            framework: framework.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if this error represents an expected cancellation
    /// rather than an actual failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VigilError::Cancelled(_))
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            VigilError::Bus(e) => e.error_type(),
            VigilError::Session(e) => e.error_type(),
            VigilError::Extension(_) => "extension",
            VigilError::CommandLine(_) => "command_line",
            VigilError::Cancelled(_) => "cancelled",
            VigilError::Framework { .. } => "framework",
            VigilError::Output(_) => "output",
        }
    }
}

/// Result type alias for vigil core operations.
pub type VigilResult<T> = Result<T, VigilError>;

// =============================================================================
// Cancelled
// =============================================================================

/// Marker error returned when a guarded operation observes cancellation.
///
/// This is deliberately a distinct type so that callers can tell the
/// expected shutdown path apart from genuine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("The operation was cancelled")]
pub struct Cancelled;

// =============================================================================
// BusError
// =============================================================================

/// Errors raised by the message bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The producer published a kind it did not declare.
    #[error("Producer '{producer}' did not declare data kind '{kind}'")]
    UndeclaredDataType {
        /// Producer uid.
        producer: String,
        /// Offending data kind.
        kind: DataKind,
    },

    /// The message references a session that has already been closed.
    #[error("Session '{session}' has been retired")]
    SessionRetired {
        /// Retired session uid.
        session: SessionUid,
    },

    /// The bus has been shut down.
    #[error("Message bus is closed")]
    Closed,

    /// One or more consumers failed while handling delivered messages.
    #[error("{} consumer fault(s) during delivery", .0.len())]
    ConsumerFaults(Vec<ConsumerFault>),
}

impl BusError {
    /// Creates an undeclared data type error.
    pub fn undeclared(producer: impl Into<String>, kind: DataKind) -> Self {
        Self::UndeclaredDataType {
            producer: producer.into(),
            kind,
        }
    }

    /// Returns the aggregated consumer faults, if any.
    pub fn faults(&self) -> &[ConsumerFault] {
        match self {
            BusError::ConsumerFaults(faults) => faults,
            _ => &[],
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            BusError::UndeclaredDataType { .. } => "bus_undeclared_type",
            BusError::SessionRetired { .. } => "bus_session_retired",
            BusError::Closed => "bus_closed",
            BusError::ConsumerFaults(_) => "bus_consumer_faults",
        }
    }
}

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

// =============================================================================
// HandlerError / ConsumerFault
// =============================================================================

/// Error returned by extension callbacks: consumers, lifetime handlers and
/// cleanup hooks.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The callback failed.
    #[error("{message}")]
    Failed {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The callback observed cancellation and stopped early.
    #[error("{0}")]
    Cancelled(#[from] Cancelled),
}

impl HandlerError {
    /// Creates a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O failure", err)
    }
}

/// A recorded consumer failure, surfaced when the bus is drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerFault {
    /// Uid of the consumer that failed.
    pub consumer: String,
    /// Kind of the message being delivered.
    pub kind: DataKind,
    /// Human-readable description.
    pub description: String,
    /// Whether the consumer panicked rather than returning an error.
    pub panicked: bool,
}

impl fmt::Display for ConsumerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.panicked { "panicked" } else { "failed" };
        write!(
            f,
            "consumer '{}' {} handling {}: {}",
            self.consumer, what, self.kind, self.description
        )
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Errors raised by the session lifecycle coordinator.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A lifecycle transition was attempted out of order.
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// A lifetime handler failed.
    #[error("Lifetime handler '{handler}' failed during {phase}: {message}")]
    HandlerFailed {
        /// Handler uid.
        handler: String,
        /// `starting` or `finishing`.
        phase: &'static str,
        /// Error message.
        message: String,
    },

    /// One or more cleanup hooks failed when closing the session.
    #[error("{} cleanup hook(s) failed: {}", .failures.len(), .failures.join("; "))]
    CleanupFailed {
        /// Failure descriptions.
        failures: Vec<String>,
    },
}

impl SessionError {
    /// Creates an invalid transition error.
    pub fn invalid_transition(from: SessionState, to: SessionState) -> Self {
        Self::InvalidTransition { from, to }
    }

    /// Creates a handler failure.
    pub fn handler_failed(
        handler: impl Into<String>,
        phase: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            phase,
            message: message.into(),
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            SessionError::InvalidTransition { .. } => "session_invalid_transition",
            SessionError::HandlerFailed { .. } => "session_handler_failed",
            SessionError::CleanupFailed { .. } => "session_cleanup_failed",
        }
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// ExtensionError
// =============================================================================

/// Errors raised by the extension registration table.
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    /// No factory is registered for the uid.
    #[error("No extension registered with uid '{uid}'")]
    NotRegistered {
        /// Requested uid.
        uid: String,
    },

    /// The factory failed to create the extension.
    #[error("Failed to create extension '{uid}': {message}")]
    CreationFailed {
        /// Extension uid.
        uid: String,
        /// Error message.
        message: String,
    },

    /// A test with the same name is already registered.
    #[error("Test '{name}' is already registered")]
    DuplicateTest {
        /// Duplicated test name.
        name: String,
    },
}

impl ExtensionError {
    /// Creates a not registered error.
    pub fn not_registered(uid: impl Into<String>) -> Self {
        Self::NotRegistered { uid: uid.into() }
    }

    /// Creates a creation failure.
    pub fn creation_failed(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreationFailed {
            uid: uid.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// CommandLineError
// =============================================================================

/// Errors raised when validating resolved command-line options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandLineError {
    /// The option is not registered by any provider.
    #[error("Unknown option '--{name}'")]
    UnknownOption {
        /// Option name.
        name: String,
    },

    /// The option received the wrong number of arguments.
    #[error("Option '--{name}' expects {expected} argument(s), got {actual}")]
    Arity {
        /// Option name.
        name: String,
        /// Declared arity.
        expected: ArgumentArity,
        /// Actual argument count.
        actual: usize,
    },

    /// A provider rejected the option's arguments.
    #[error("Invalid value for '--{name}': {message}")]
    InvalidValue {
        /// Option name.
        name: String,
        /// Error message.
        message: String,
    },

    /// A positional token appeared where an option was expected.
    #[error("Unexpected argument '{token}'")]
    UnexpectedArgument {
        /// The offending token.
        token: String,
    },
}

impl CommandLineError {
    /// Creates an invalid value error.
    pub fn invalid_value(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguishable() {
        let error: VigilError = Cancelled.into();
        assert!(error.is_cancellation());

        let error: VigilError = BusError::Closed.into();
        assert!(!error.is_cancellation());
        assert_eq!(error.error_type(), "bus_closed");
    }

    #[test]
    fn test_consumer_faults_display() {
        let fault = ConsumerFault {
            consumer: "console".to_string(),
            kind: DataKind::TestNodeUpdate,
            description: "disk full".to_string(),
            panicked: false,
        };
        let error = BusError::ConsumerFaults(vec![fault.clone()]);

        assert_eq!(error.to_string(), "1 consumer fault(s) during delivery");
        assert_eq!(error.faults(), &[fault.clone()]);
        assert!(fault.to_string().contains("console"));
        assert!(fault.to_string().contains("disk full"));
    }

    #[test]
    fn test_session_error_messages() {
        let error = SessionError::invalid_transition(SessionState::NotStarted, SessionState::Finishing);
        assert_eq!(
            error.to_string(),
            "Invalid session transition from NotStarted to Finishing"
        );

        let error = SessionError::CleanupFailed {
            failures: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(error.to_string(), "2 cleanup hook(s) failed: a; b");
    }

    #[test]
    fn test_command_line_error_messages() {
        let error = CommandLineError::Arity {
            name: "timeout".to_string(),
            expected: ArgumentArity::EXACTLY_ONE,
            actual: 0,
        };
        assert_eq!(
            error.to_string(),
            "Option '--timeout' expects exactly 1 argument(s), got 0"
        );
    }
}
