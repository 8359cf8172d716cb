// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! IPC server.
//!
//! Accepts connections until its shutdown token fires. Each connection is
//! served on its own task:
//!
//! ```text
//! read handshake ─► reply with own handshake ─► versions match?
//!                                                 │ no: close
//!                                                 ▼ yes
//!                    ┌─► read request ─► RequestHandler ─► write response ─┐
//!                    └─────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use vigil_core::TestRunCancellationToken;

use crate::codec::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{IpcError, IpcResult};
use crate::handshake::HandshakeInfo;
use crate::messages::IpcMessage;
use crate::transport::{IpcListener, IpcStream};

// =============================================================================
// RequestHandler
// =============================================================================

/// Identity of a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Server-assigned connection number.
    pub connection_id: u64,
    /// Transport-level peer description.
    pub address: String,
    /// The peer's handshake.
    pub handshake: HandshakeInfo,
}

/// Serves requests arriving on handshaken connections.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one request and returns its response.
    ///
    /// An error closes the connection.
    async fn handle(&self, peer: &PeerInfo, request: IpcMessage) -> IpcResult<IpcMessage>;

    /// Called when a connection ends.
    async fn on_disconnect(&self, _peer: &PeerInfo) {}
}

// =============================================================================
// Configuration / Stats
// =============================================================================

/// Server limits.
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Bound on receiving the client's handshake.
    pub handshake_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_size: usize,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Snapshot of server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Connections accepted.
    pub connections_accepted: u64,
    /// Connections currently open.
    pub active_connections: u64,
    /// Connections rejected at the handshake.
    pub handshakes_rejected: u64,
    /// Requests answered.
    pub requests_handled: u64,
    /// Connections closed by a protocol error.
    pub protocol_errors: u64,
}

#[derive(Debug, Default)]
struct AtomicServerStats {
    connections_accepted: AtomicU64,
    active_connections: AtomicU64,
    handshakes_rejected: AtomicU64,
    requests_handled: AtomicU64,
    protocol_errors: AtomicU64,
}

impl AtomicServerStats {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// IpcServer
// =============================================================================

/// Serves handshaken connections with a [`RequestHandler`].
#[derive(Clone)]
pub struct IpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    handler: Arc<dyn RequestHandler>,
    local: HandshakeInfo,
    config: IpcServerConfig,
    stats: AtomicServerStats,
    next_connection: AtomicU64,
}

impl IpcServer {
    /// Creates a server announcing `local` in its handshake.
    pub fn new(handler: Arc<dyn RequestHandler>, local: HandshakeInfo, config: IpcServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                handler,
                local,
                config,
                stats: AtomicServerStats::default(),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the current counters.
    pub fn stats(&self) -> ServerStats {
        self.inner.stats.snapshot()
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn serve(&self, listener: IpcListener, shutdown: TestRunCancellationToken) -> IpcResult<()> {
        if let Ok(endpoint) = listener.local_endpoint() {
            info!(endpoint = %endpoint, "IPC server listening");
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, address)) => {
                    let server = self.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let served = shutdown.run_until_cancelled(server.serve_connection(stream, address)).await;
                        if let Ok(Err(e)) = served {
                            debug!(error = %e, "IPC connection ended with an error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "IPC accept failed"),
            }
        }

        info!("IPC server stopped");
        Ok(())
    }

    /// Serves one connection to completion.
    ///
    /// Returns `Ok(())` when the peer closes cleanly.
    ///
    /// # Errors
    ///
    /// - `IpcError::HandshakeRequired` - The first message was not a handshake
    /// - `IpcError::VersionMismatch` - The peer speaks another version
    /// - Protocol and I/O errors that closed the connection
    pub async fn serve_connection<S: IpcStream>(&self, stream: S, address: String) -> IpcResult<()> {
        let stats = &self.inner.stats;
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);
        let connection_id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);

        let mut stream = stream;
        let result = self.run_connection(&mut stream, connection_id, address).await;
        let _ = stream.shutdown().await;

        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = &result {
            if e.is_protocol_error() {
                stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
            }
            warn!(connection_id, error = %e, error_type = e.error_type(), "IPC connection closed");
        }
        result
    }

    async fn run_connection<S: IpcStream>(
        &self,
        stream: &mut S,
        connection_id: u64,
        address: String,
    ) -> IpcResult<()> {
        let config = &self.inner.config;

        let first = tokio::time::timeout(config.handshake_timeout, read_frame(stream, config.max_frame_size))
            .await
            .map_err(|_| IpcError::RequestTimeout {
                request: "HandshakeMessage",
                timeout: config.handshake_timeout,
            })??;
        let Some(first) = first else {
            return Ok(());
        };

        let remote = match IpcMessage::decode(first)? {
            IpcMessage::Handshake(info) => info,
            other => {
                return Err(IpcError::HandshakeRequired {
                    received_id: other.id(),
                })
            }
        };

        write_frame(stream, &IpcMessage::Handshake(self.inner.local.clone()).encode()).await?;
        if let Err(e) = self.inner.local.check_compatible(&remote) {
            self.inner.stats.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let peer = PeerInfo {
            connection_id,
            address,
            handshake: remote,
        };
        info!(connection_id, peer = %peer.address, "IPC client connected");

        let result = self.request_loop(stream, &peer).await;
        self.inner.handler.on_disconnect(&peer).await;
        result
    }

    async fn request_loop<S: IpcStream>(&self, stream: &mut S, peer: &PeerInfo) -> IpcResult<()> {
        let config = &self.inner.config;
        while let Some(frame) = read_frame(stream, config.max_frame_size).await? {
            let request = IpcMessage::decode(frame)?;
            if let IpcMessage::Handshake(_) = request {
                return Err(IpcError::malformed(request.id(), "handshake repeated after negotiation"));
            }
            debug!(connection_id = peer.connection_id, request = request.name(), "IPC request");

            let response = self.inner.handler.handle(peer, request).await?.encode();
            response.ensure_within(config.max_frame_size)?;
            write_frame(stream, &response).await?;
            self.inner.stats.requests_handled.fetch_add(1, Ordering::Relaxed);
        }
        debug!(connection_id = peer.connection_id, "IPC client disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for IpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcServer")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
