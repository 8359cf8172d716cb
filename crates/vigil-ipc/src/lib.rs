// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vigil-ipc
//!
//! Out-of-process coordination for the vigil test platform.
//!
//! - **Codec**: little-endian, length-prefixed frames
//! - **Messages**: the typed message catalogue and its wire ids
//! - **Handshake**: versioned `HandshakeInfo` exchange
//! - **Transport**: TCP and Unix domain sockets
//! - **Client / Server**: strict request/response over a handshaken stream
//! - **Reporter**: forwards bus traffic to a connected runner
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_ipc::{HandshakeInfo, IpcClient, IpcClientConfig, IpcEndpoint, IpcMessage};
//!
//! let endpoint: IpcEndpoint = "127.0.0.1:5050".parse()?;
//! let client = IpcClient::connect(&endpoint, HandshakeInfo::local("testhost", None), IpcClientConfig::default()).await?;
//! client.send(IpcMessage::TestHostProcessPid { pid: std::process::id() }, None).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod codec;
pub mod error;
pub mod handshake;
pub mod messages;
pub mod reporter;
pub mod server;
pub mod transport;

pub use client::{IpcClient, IpcClientConfig};
pub use codec::{Frame, DEFAULT_MAX_FRAME_SIZE};
pub use error::{IpcError, IpcResult};
pub use handshake::{HandshakeInfo, HandshakeKey, PROTOCOL_VERSION};
pub use messages::{IpcMessage, SessionEventType};
pub use reporter::IpcReporter;
pub use server::{IpcServer, IpcServerConfig, PeerInfo, RequestHandler, ServerStats};
pub use transport::{IpcEndpoint, IpcListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
