// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the vigil binary.

use thiserror::Error;
use vigil_core::ExitCode;

/// Result type alias for vigil-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the vigil binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Initialization error.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config loading error.
    #[error("Config error: {0}")]
    Config(#[from] vigil_config::ConfigError),

    /// Invalid command line.
    #[error("Invalid command line: {0}")]
    CommandLine(#[from] vigil_core::CommandLineError),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] vigil_core::VigilError),

    /// IPC error.
    #[error("IPC error: {0}")]
    Ipc(#[from] vigil_ipc::IpcError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an initialization error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Configuration(_) | Self::Config(_) => ExitCode::InvalidPlatformSetup,
            Self::CommandLine(_) => ExitCode::InvalidCommandLine,
            Self::Core(vigil_core::VigilError::CommandLine(_)) => ExitCode::InvalidCommandLine,
            Self::Core(vigil_core::VigilError::Extension(_)) => ExitCode::InvalidPlatformSetup,
            Self::Core(e) if e.is_cancellation() => ExitCode::TestSessionAborted,
            Self::Ipc(vigil_ipc::IpcError::VersionMismatch { .. }) => {
                ExitCode::IncompatibleProtocolVersion
            }
            Self::Ipc(vigil_ipc::IpcError::Cancelled) => ExitCode::TestSessionAborted,
            Self::WithContext { source, .. } => source.exit_code(),
            Self::Initialization(_) | Self::Io(_) | Self::Core(_) | Self::Ipc(_) => {
                ExitCode::GenericFailure
            }
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Initialization(_) => "initialization",
            Self::Io(_) => "io",
            Self::Config(e) => e.error_type(),
            Self::CommandLine(_) => "command_line",
            Self::Core(e) => e.error_type(),
            Self::Ipc(e) => e.error_type(),
            Self::WithContext { source, .. } => source.error_type(),
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with appropriate formatting.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

// =============================================================================
// Tests
// =============================================================================
