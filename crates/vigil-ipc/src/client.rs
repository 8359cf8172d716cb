// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! IPC client.
//!
//! # Request Flow
//!
//! ```text
//!  caller A ──┐                         ┌──► pending FIFO ──┐
//!  caller B ──┼──► writer (Mutex) ──────┤                   │
//!  caller C ──┘    push + write frame   └──► socket         │
//!                                                           ▼
//!                           reader task ◄── socket ──► pop front, complete
//! ```
//!
//! The writer lock covers both pushing the pending slot and writing the
//! frame, so FIFO order matches wire order. A caller that gives up
//! (timeout, cancellation) leaves its slot in place; the reader discards the
//! matching response when it arrives.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_core::TestRunCancellationToken;

use crate::codec::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use crate::error::{IpcError, IpcResult};
use crate::handshake::HandshakeInfo;
use crate::messages::IpcMessage;
use crate::transport::{connect, BoxedStream, IpcEndpoint, IpcStream};

// =============================================================================
// Configuration
// =============================================================================

/// Client timeouts and limits.
#[derive(Debug, Clone)]
pub struct IpcClientConfig {
    /// Bound on connecting and on the handshake reply.
    pub connect_timeout: Duration,
    /// Bound on each request.
    pub request_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_size: usize,
}

impl Default for IpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

type Reply = oneshot::Sender<IpcResult<IpcMessage>>;

struct Shared {
    pending: Mutex<VecDeque<Reply>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
    requests_sent: AtomicU64,
}

impl Shared {
    fn closed_error(&self) -> IpcError {
        IpcError::ConnectionClosed {
            reason: self.close_reason.lock().clone(),
        }
    }

    /// Marks the connection closed and faults every pending caller.
    fn fail_all(&self, reason: Option<String>) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            *self.close_reason.lock() = reason;
        }
        let drained: Vec<Reply> = self.pending.lock().drain(..).collect();
        for reply in drained {
            let _ = reply.send(Err(self.closed_error()));
        }
    }
}

// =============================================================================
// IpcClient
// =============================================================================

/// A handshaken connection issuing request/response pairs.
pub struct IpcClient {
    writer: AsyncMutex<WriteHalf<BoxedStream>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    remote: HandshakeInfo,
    config: IpcClientConfig,
}

impl IpcClient {
    /// Connects to `endpoint` and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `IpcError::ConnectTimeout` / `IpcError::Io` - Connecting failed
    /// - `IpcError::VersionMismatch` - The server speaks another version
    pub async fn connect(
        endpoint: &IpcEndpoint,
        local: HandshakeInfo,
        config: IpcClientConfig,
    ) -> IpcResult<Self> {
        let stream = connect(endpoint, config.connect_timeout).await?;
        Self::handshake(stream, local, config).await
    }

    /// Performs the handshake over an established stream.
    ///
    /// On a version mismatch the stream is shut down and nothing further is
    /// sent.
    pub async fn handshake<S: IpcStream>(
        stream: S,
        local: HandshakeInfo,
        config: IpcClientConfig,
    ) -> IpcResult<Self> {
        let stream: BoxedStream = Box::new(stream);
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(&mut writer, &IpcMessage::Handshake(local.clone()).encode()).await?;

        let reply = tokio::time::timeout(config.connect_timeout, read_frame(&mut reader, config.max_frame_size))
            .await
            .map_err(|_| IpcError::RequestTimeout {
                request: "HandshakeMessage",
                timeout: config.connect_timeout,
            })??
            .ok_or_else(|| IpcError::closed("peer closed during handshake"))?;

        let remote = match IpcMessage::decode(reply)? {
            IpcMessage::Handshake(info) => info,
            other => {
                let _ = writer.shutdown().await;
                return Err(IpcError::HandshakeRequired {
                    received_id: other.id(),
                });
            }
        };

        if let Err(e) = local.check_compatible(&remote) {
            warn!(error = %e, "Handshake rejected");
            let _ = writer.shutdown().await;
            return Err(e);
        }
        info!(
            protocol_version = remote.protocol_version().unwrap_or_default(),
            "IPC handshake completed"
        );

        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            requests_sent: AtomicU64::new(0),
        });
        let task = tokio::spawn(read_loop(reader, shared.clone(), config.max_frame_size));

        Ok(Self {
            writer: AsyncMutex::new(writer),
            shared,
            reader: Mutex::new(Some(task)),
            remote,
            config,
        })
    }

    /// Returns the server's handshake.
    pub fn remote_handshake(&self) -> &HandshakeInfo {
        &self.remote
    }

    /// Returns `true` once the connection has failed or been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of requests written so far.
    pub fn requests_sent(&self) -> u64 {
        self.shared.requests_sent.load(Ordering::Relaxed)
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// - `IpcError::ConnectionClosed` - The connection is closed or was lost
    /// - `IpcError::FrameTooLarge` - The encoded request exceeds `max_frame_size`;
    ///   nothing is sent and the connection stays open
    /// - `IpcError::RequestTimeout` - No response within the request timeout
    /// - `IpcError::Cancelled` - `cancellation` fired first
    pub async fn request(
        &self,
        message: IpcMessage,
        cancellation: Option<&TestRunCancellationToken>,
    ) -> IpcResult<IpcMessage> {
        if self.is_closed() {
            return Err(self.shared.closed_error());
        }
        let name = message.name();
        let frame = message.encode();
        // Rejected locally so the connection stays usable.
        if let Err(e) = frame.ensure_within(self.config.max_frame_size) {
            warn!(request = name, error = %e, "IPC request exceeds the frame limit");
            return Err(e);
        }

        let rx = {
            let mut writer = self.writer.lock().await;
            if self.is_closed() {
                return Err(self.shared.closed_error());
            }
            let (tx, rx) = oneshot::channel();
            self.shared.pending.lock().push_back(tx);
            if self.is_closed() {
                // The reader failed between the check and the push.
                self.shared.fail_all(None);
                return Err(self.shared.closed_error());
            }
            if let Err(e) = write_frame(&mut *writer, &frame).await {
                warn!(request = name, error = %e, "IPC write failed");
                self.shared.fail_all(Some(e.to_string()));
                return Err(e);
            }
            self.shared.requests_sent.fetch_add(1, Ordering::Relaxed);
            rx
        };
        debug!(request = name, "IPC request sent");

        let timeout = self.config.request_timeout;
        let response = async {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(self.shared.closed_error()),
                Err(_) => Err(IpcError::RequestTimeout { request: name, timeout }),
            }
        };

        match cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(IpcError::Cancelled),
                result = response => result,
            },
            None => response.await,
        }
    }

    /// Sends a request that must be acknowledged with `VoidResponse`.
    pub async fn send(&self, message: IpcMessage, cancellation: Option<&TestRunCancellationToken>) -> IpcResult<()> {
        let name = message.name();
        match self.request(message, cancellation).await? {
            IpcMessage::VoidResponse => Ok(()),
            other => Err(IpcError::UnexpectedResponse {
                request: name,
                response: other.name(),
            }),
        }
    }

    /// Closes the connection, faulting any pending request.
    pub async fn close(&self) {
        self.shared.fail_all(Some("closed by client".to_string()));
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(error = %e, "IPC shutdown failed");
        }
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for IpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcClient")
            .field("closed", &self.is_closed())
            .field("requests_sent", &self.requests_sent())
            .finish_non_exhaustive()
    }
}

async fn read_loop(mut reader: ReadHalf<BoxedStream>, shared: Arc<Shared>, max_frame_size: usize) {
    loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("IPC peer closed the connection");
                shared.fail_all(Some("peer closed the connection".to_string()));
                return;
            }
            Err(e) => {
                warn!(error = %e, error_type = e.error_type(), "IPC read failed");
                shared.fail_all(Some(e.to_string()));
                return;
            }
        };

        let message = match IpcMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, error_type = e.error_type(), "IPC protocol error");
                shared.fail_all(Some(e.to_string()));
                return;
            }
        };

        let waiter = shared.pending.lock().pop_front();
        match waiter {
            // A dropped receiver means the caller gave up; discard.
            Some(reply) => {
                let _ = reply.send(Ok(message));
            }
            None => {
                warn!(response = message.name(), "Unsolicited IPC response");
                shared.fail_all(Some(format!("unsolicited {}", message.name())));
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
