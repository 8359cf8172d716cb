// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! IPC error types.
//!
//! # Error Categories
//!
//! ```text
//! IpcError
//! ├── Io / ConnectTimeout / ConnectionClosed   - transport
//! ├── VersionMismatch / HandshakeRequired      - handshake (protocol)
//! ├── UnknownMessageId / Malformed / Truncated
//! │   FrameTooLarge                            - framing (protocol)
//! ├── RequestTimeout / Cancelled               - caller-side bounds
//! └── UnexpectedResponse / Handler             - application
//! ```
//!
//! Protocol errors are fatal to the connection they occur on.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the IPC layer.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connecting did not complete in time.
    #[error("Connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target endpoint.
        endpoint: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The connection is closed or was lost mid-request.
    #[error("Connection closed{}", reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    ConnectionClosed {
        /// Why the connection closed, if known.
        reason: Option<String>,
    },

    /// The peers advertise different protocol versions.
    #[error("Incompatible protocol version: local '{local}', remote '{remote}'")]
    VersionMismatch {
        /// Our protocol version.
        local: String,
        /// The peer's protocol version.
        remote: String,
    },

    /// The first message on a connection was not a handshake.
    #[error("Expected a handshake, received message id {received_id}")]
    HandshakeRequired {
        /// Id of the message received instead.
        received_id: u32,
    },

    /// A frame carried an unknown message id.
    #[error("Unknown message id {0}")]
    UnknownMessageId(u32),

    /// A payload could not be decoded.
    #[error("Malformed payload for message id {message_id}: {reason}")]
    Malformed {
        /// Id of the offending message.
        message_id: u32,
        /// What was wrong.
        reason: String,
    },

    /// The stream ended inside a frame.
    #[error("Truncated frame: {0}")]
    Truncated(String),

    /// A frame exceeded the configured maximum size.
    #[error("Frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No response arrived within the request timeout.
    #[error("Request '{request}' timed out after {timeout:?}")]
    RequestTimeout {
        /// Name of the request.
        request: &'static str,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// The peer answered with an unexpected message.
    #[error("Unexpected response to '{request}': {response}")]
    UnexpectedResponse {
        /// Name of the request.
        request: &'static str,
        /// Name of the response.
        response: &'static str,
    },

    /// A server-side request handler failed.
    #[error("Request handler failed: {0}")]
    Handler(String),

    /// An endpoint string could not be parsed.
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint text.
        endpoint: String,
        /// What was wrong.
        reason: String,
    },
}

impl IpcError {
    /// Creates a connection-closed error with a reason.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: Some(reason.into()),
        }
    }

    /// Creates a malformed-payload error.
    pub fn malformed(message_id: u32, reason: impl Into<String>) -> Self {
        Self::Malformed {
            message_id,
            reason: reason.into(),
        }
    }

    /// Creates a truncation error.
    pub fn truncated(context: impl Into<String>) -> Self {
        Self::Truncated(context.into())
    }

    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Returns `true` for errors that violate the wire protocol.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            IpcError::VersionMismatch { .. }
                | IpcError::HandshakeRequired { .. }
                | IpcError::UnknownMessageId(_)
                | IpcError::Malformed { .. }
                | IpcError::Truncated(_)
                | IpcError::FrameTooLarge { .. }
        )
    }

    /// Returns `true` if the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        self.is_protocol_error() || matches!(self, IpcError::Io(_) | IpcError::ConnectionClosed { .. })
    }

    /// Returns the error type name for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            IpcError::Io(_) => "io",
            IpcError::ConnectTimeout { .. } => "connect_timeout",
            IpcError::ConnectionClosed { .. } => "connection_closed",
            IpcError::VersionMismatch { .. } => "version_mismatch",
            IpcError::HandshakeRequired { .. } => "handshake_required",
            IpcError::UnknownMessageId(_) => "unknown_message_id",
            IpcError::Malformed { .. } => "malformed",
            IpcError::Truncated(_) => "truncated",
            IpcError::FrameTooLarge { .. } => "frame_too_large",
            IpcError::RequestTimeout { .. } => "request_timeout",
            IpcError::Cancelled => "cancelled",
            IpcError::UnexpectedResponse { .. } => "unexpected_response",
            IpcError::Handler(_) => "handler",
            IpcError::InvalidEndpoint { .. } => "invalid_endpoint",
        }
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
