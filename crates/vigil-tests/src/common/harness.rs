// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Harnesses that own a live IPC server or a running session, with
//! teardown on drop.
//!
//! ## Design Principles
//!
//! - Servers bind an ephemeral loopback port so tests run in parallel
//! - Every background task is stopped through a cancellation token

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use vigil_core::{
    DataConsumer, DataProducer, DeliveryMode, ExecutionId, MessageBus, MessageBusConfig, SessionCoordinator,
    TestRunCancellationToken, TestSessionContext, TestSessionLifetimeHandler,
};
use vigil_ipc::{
    HandshakeInfo, IpcClient, IpcClientConfig, IpcEndpoint, IpcListener, IpcResult, IpcServer, IpcServerConfig,
    RequestHandler, ServerStats,
};

use super::mocks::{MockProducer, RecordingConsumer};

/// Host type advertised by harness servers.
pub const HARNESS_HOST_TYPE: &str = "harness";

// =============================================================================
// IPC Harness
// =============================================================================

/// A running [`IpcServer`] on an ephemeral loopback port.
pub struct IpcHarness {
    server: IpcServer,
    endpoint: IpcEndpoint,
    shutdown: TestRunCancellationToken,
    task: Option<JoinHandle<IpcResult<()>>>,
}

impl IpcHarness {
    /// Starts a server advertising the local protocol version.
    pub async fn start(handler: Arc<dyn RequestHandler>) -> Self {
        Self::start_with(handler, HandshakeInfo::local(HARNESS_HOST_TYPE, None)).await
    }

    /// Starts a server advertising `handshake`.
    pub async fn start_with(handler: Arc<dyn RequestHandler>, handshake: HandshakeInfo) -> Self {
        let listener = IpcListener::bind(&IpcEndpoint::tcp("127.0.0.1", 0))
            .await
            .expect("Failed to bind loopback listener");
        let endpoint = listener.local_endpoint().expect("Listener has no local endpoint");

        let config = IpcServerConfig {
            handshake_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let server = IpcServer::new(handler, handshake, config);
        let shutdown = TestRunCancellationToken::new();

        let task = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve(listener, shutdown).await })
        };

        Self {
            server,
            endpoint,
            shutdown,
            task: Some(task),
        }
    }

    /// The bound endpoint.
    pub fn endpoint(&self) -> &IpcEndpoint {
        &self.endpoint
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        match &self.endpoint {
            IpcEndpoint::Tcp { port, .. } => *port,
            other => panic!("Harness endpoint is not TCP: {}", other),
        }
    }

    /// Server counters.
    pub fn stats(&self) -> ServerStats {
        self.server.stats()
    }

    /// Connects a client advertising `handshake`.
    pub async fn connect_with(&self, handshake: HandshakeInfo) -> IpcResult<IpcClient> {
        let config = IpcClientConfig {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        IpcClient::connect(&self.endpoint, handshake, config).await
    }

    /// Connects a client advertising the local protocol version.
    pub async fn connect(&self) -> IpcResult<IpcClient> {
        self.connect_with(HandshakeInfo::local("test-client", None)).await
    }

    /// Stops the server and waits for its accept loop to end.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }
}

impl Drop for IpcHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Session Harness
// =============================================================================

/// Configuration for [`SessionHarness`].
#[derive(Clone)]
pub struct SessionHarnessConfig {
    /// Delivery mode of the bus.
    pub delivery: DeliveryMode,
    /// Consumers registered on the bus.
    pub consumers: Vec<Arc<dyn DataConsumer>>,
    /// Lifetime handlers attached to the coordinator.
    pub handlers: Vec<Arc<dyn TestSessionLifetimeHandler>>,
    /// Bound on the whole harness run.
    pub timeout: Duration,
}

impl Default for SessionHarnessConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Awaited,
            consumers: Vec::new(),
            handlers: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl SessionHarnessConfig {
    /// Adds a consumer.
    pub fn consumer(mut self, consumer: Arc<dyn DataConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Adds a lifetime handler.
    pub fn handler(mut self, handler: Arc<dyn TestSessionLifetimeHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Uses queued delivery.
    pub fn queued(mut self) -> Self {
        self.delivery = DeliveryMode::Queued;
        self
    }
}

/// Resources handed to a [`SessionHarness`] body.
pub struct SessionResources {
    /// The bus.
    pub bus: MessageBus,
    /// The producer registered on the bus.
    pub producer: Arc<MockProducer>,
    /// The started session.
    pub session: TestSessionContext,
    /// The run token.
    pub token: TestRunCancellationToken,
}

/// Runs a body inside a started session and finishes the session after it.
pub struct SessionHarness {
    config: SessionHarnessConfig,
}

impl SessionHarness {
    /// Creates a harness.
    pub fn new(config: SessionHarnessConfig) -> Self {
        Self { config }
    }

    /// A harness with one recording consumer, which is returned alongside.
    pub fn with_recorder() -> (Self, Arc<RecordingConsumer>) {
        let recorder = RecordingConsumer::new("recorder");
        let config = SessionHarnessConfig::default().consumer(recorder.clone());
        (Self::new(config), recorder)
    }

    /// Starts a session, runs `body`, then finishes and closes the session.
    ///
    /// Panics if the session cannot start, if `body` exceeds the timeout,
    /// or if finishing reports a fault.
    pub async fn run<F, Fut>(self, body: F)
    where
        F: FnOnce(SessionResources) -> Fut,
        Fut: Future<Output = ()>,
    {
        let token = TestRunCancellationToken::new();
        let producer = MockProducer::new("harness-producer");

        let mut builder = MessageBus::builder()
            .config(MessageBusConfig {
                delivery: self.config.delivery,
            })
            .cancellation(token.clone())
            .register_producer(producer.clone() as Arc<dyn DataProducer>);
        for consumer in self.config.consumers {
            builder = builder.register_consumer(consumer);
        }
        let bus = builder.build();

        let coordinator = SessionCoordinator::new(bus.clone()).with_lifetime_handlers(self.config.handlers);
        let session = coordinator
            .start(ExecutionId::generate(), token.clone())
            .await
            .expect("Failed to start session");

        let resources = SessionResources {
            bus,
            producer,
            session,
            token,
        };
        tokio::time::timeout(self.config.timeout, body(resources))
            .await
            .expect("Session harness body timed out");

        let report = coordinator.finish().await.expect("Failed to finish session");
        assert!(report.is_clean(), "Session finished with faults: {:?}", report);
        coordinator.close().await.expect("Failed to close session");
    }
}
