// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Recording extensions and handlers for exercising the bus, the session
//! lifecycle and the IPC layer in isolation.
//!
//! Every mock records what it saw so tests can assert on call counts and
//! ordering, and most can be told to fail or stall.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vigil_core::{
    AsyncCleanableExtension, BusMessage, DataConsumer, DataKind, DataProducer, ExitCode, Extension,
    ExtensionInfo, HandlerError, ProducerInfo, StateKind, TestApplicationLifecycleCallbacks, TestNodeUid,
    TestRunCancellationToken, TestSessionContext, TestSessionLifetimeHandler,
};
use vigil_ipc::{IpcMessage, IpcResult, PeerInfo, RequestHandler};

/// Implements [`Extension`] by delegating to an `info: ExtensionInfo` field.
macro_rules! delegate_extension {
    ($ty:ty) => {
        #[async_trait]
        impl Extension for $ty {
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
            async fn is_enabled(&self) -> bool {
                self.enabled.load(Ordering::SeqCst)
            }
        }
    };
}

// =============================================================================
// Mock Producer
// =============================================================================

/// A producer that declares a fixed set of kinds.
#[derive(Debug)]
pub struct MockProducer {
    info: ExtensionInfo,
    enabled: AtomicBool,
    kinds: Vec<DataKind>,
}

impl MockProducer {
    /// A producer of node updates and session artifacts.
    pub fn new(uid: &str) -> Arc<Self> {
        Self::with_kinds(uid, vec![DataKind::TestNodeUpdate, DataKind::SessionFileArtifact])
    }

    /// A producer of the given kinds only.
    pub fn with_kinds(uid: &str, kinds: Vec<DataKind>) -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(uid, "Mock producer", "Publishes test messages"),
            enabled: AtomicBool::new(true),
            kinds,
        })
    }
}

delegate_extension!(MockProducer);

impl DataProducer for MockProducer {
    fn data_types_produced(&self) -> &[DataKind] {
        &self.kinds
    }
}

// =============================================================================
// Recording Consumer
// =============================================================================

/// One consumer callback as seen by [`RecordingConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedCall {
    /// Producer uid.
    pub producer: String,
    /// Message kind.
    pub kind: DataKind,
    /// Node uid, for node updates.
    pub uid: Option<TestNodeUid>,
    /// Node state, for node updates.
    pub state: Option<StateKind>,
}

/// A consumer that records every call and can be disabled, slowed or
/// made to fail.
#[derive(Debug)]
pub struct RecordingConsumer {
    info: ExtensionInfo,
    enabled: AtomicBool,
    kinds: Vec<DataKind>,
    calls: Mutex<Vec<ConsumedCall>>,
    fail_all: AtomicBool,
    delay: Mutex<Option<Duration>>,
    observed_cancellation: AtomicUsize,
}

impl RecordingConsumer {
    /// A consumer of node updates.
    pub fn new(uid: &str) -> Arc<Self> {
        Self::with_kinds(uid, vec![DataKind::TestNodeUpdate])
    }

    /// A consumer of the given kinds.
    pub fn with_kinds(uid: &str, kinds: Vec<DataKind>) -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(uid, "Recording consumer", "Records delivered messages"),
            enabled: AtomicBool::new(true),
            kinds,
            calls: Mutex::new(Vec::new()),
            fail_all: AtomicBool::new(false),
            delay: Mutex::new(None),
            observed_cancellation: AtomicUsize::new(0),
        })
    }

    /// A consumer that reports itself disabled.
    pub fn disabled(uid: &str) -> Arc<Self> {
        let consumer = Self::new(uid);
        consumer.set_enabled(false);
        consumer
    }

    /// Toggles `is_enabled`.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Makes every following call fail.
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Delays every following call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Every call so far, in delivery order.
    pub fn calls(&self) -> Vec<ConsumedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// States delivered for one node, in delivery order.
    pub fn states_for(&self, uid: &str) -> Vec<StateKind> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.uid.as_ref().is_some_and(|u| u.as_str() == uid))
            .filter_map(|c| c.state)
            .collect()
    }

    /// Calls that stopped early because the run was cancelled.
    pub fn cancelled_calls(&self) -> usize {
        self.observed_cancellation.load(Ordering::SeqCst)
    }
}

delegate_extension!(RecordingConsumer);

#[async_trait]
impl DataConsumer for RecordingConsumer {
    fn data_types_consumed(&self) -> &[DataKind] {
        &self.kinds
    }

    async fn consume(
        &self,
        producer: &ProducerInfo,
        message: &BusMessage,
        cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            if cancellation.run_until_cancelled(tokio::time::sleep(delay)).await.is_err() {
                self.observed_cancellation.fetch_add(1, Ordering::SeqCst);
                return Err(HandlerError::Cancelled(vigil_core::Cancelled));
            }
        }

        let update = message.as_node_update();
        self.calls.lock().push(ConsumedCall {
            producer: producer.uid.clone(),
            kind: message.kind(),
            uid: update.map(|u| u.test_node.uid.clone()),
            state: update.map(|u| u.test_node.state_kind()),
        });

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(HandlerError::failed(format!("{} refused the message", self.info.uid())));
        }
        Ok(())
    }
}

// =============================================================================
// Recording Lifetime Handler
// =============================================================================

/// Session lifecycle edges seen by [`RecordingLifetimeHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeEvent {
    /// `on_test_session_starting`.
    Starting,
    /// `on_test_session_finishing`.
    Finishing,
    /// `cleanup`.
    Cleanup,
}

/// A lifetime handler and cleanable that records every call.
#[derive(Debug)]
pub struct RecordingLifetimeHandler {
    info: ExtensionInfo,
    enabled: AtomicBool,
    events: Mutex<Vec<LifetimeEvent>>,
    cancelled_at_finish: Mutex<Option<bool>>,
    fail_starting: AtomicBool,
    fail_cleanup: AtomicBool,
}

impl RecordingLifetimeHandler {
    /// Creates a handler.
    pub fn new(uid: &str) -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin(uid, "Recording handler", "Records session lifecycle calls"),
            enabled: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
            cancelled_at_finish: Mutex::new(None),
            fail_starting: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
        })
    }

    /// Makes `on_test_session_starting` fail.
    pub fn fail_starting(&self) {
        self.fail_starting.store(true, Ordering::SeqCst);
    }

    /// Makes `cleanup` fail.
    pub fn fail_cleanup(&self) {
        self.fail_cleanup.store(true, Ordering::SeqCst);
    }

    /// Every call so far, in order.
    pub fn events(&self) -> Vec<LifetimeEvent> {
        self.events.lock().clone()
    }

    /// How many times `event` was seen.
    pub fn count(&self, event: LifetimeEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    /// Whether the token was cancelled when `finishing` ran.
    pub fn cancelled_at_finish(&self) -> Option<bool> {
        *self.cancelled_at_finish.lock()
    }
}

delegate_extension!(RecordingLifetimeHandler);

#[async_trait]
impl TestSessionLifetimeHandler for RecordingLifetimeHandler {
    async fn on_test_session_starting(&self, _context: &TestSessionContext) -> Result<(), HandlerError> {
        self.events.lock().push(LifetimeEvent::Starting);
        if self.fail_starting.load(Ordering::SeqCst) {
            return Err(HandlerError::failed("starting refused"));
        }
        Ok(())
    }

    async fn on_test_session_finishing(&self, context: &TestSessionContext) -> Result<(), HandlerError> {
        self.events.lock().push(LifetimeEvent::Finishing);
        *self.cancelled_at_finish.lock() = Some(context.cancellation.is_cancellation_requested());
        Ok(())
    }
}

#[async_trait]
impl AsyncCleanableExtension for RecordingLifetimeHandler {
    async fn cleanup(&self) -> Result<(), HandlerError> {
        self.events.lock().push(LifetimeEvent::Cleanup);
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(HandlerError::failed("cleanup refused"));
        }
        Ok(())
    }
}

// =============================================================================
// Recording Lifecycle Callbacks
// =============================================================================

/// Application lifecycle callbacks that record the final exit code.
#[derive(Debug)]
pub struct RecordingLifecycleCallbacks {
    info: ExtensionInfo,
    enabled: AtomicBool,
    before: AtomicUsize,
    exit_codes: Mutex<Vec<ExitCode>>,
}

impl RecordingLifecycleCallbacks {
    /// Creates the callbacks.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: ExtensionInfo::builtin("recording-callbacks", "Recording callbacks", "Records run edges"),
            enabled: AtomicBool::new(true),
            before: AtomicUsize::new(0),
            exit_codes: Mutex::new(Vec::new()),
        })
    }

    /// Number of `before_run` calls.
    pub fn before_runs(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    /// Exit codes passed to `after_run`.
    pub fn exit_codes(&self) -> Vec<ExitCode> {
        self.exit_codes.lock().clone()
    }
}

delegate_extension!(RecordingLifecycleCallbacks);

#[async_trait]
impl TestApplicationLifecycleCallbacks for RecordingLifecycleCallbacks {
    async fn before_run(&self, _cancellation: &TestRunCancellationToken) -> Result<(), HandlerError> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn after_run(&self, exit_code: ExitCode, _cancellation: &TestRunCancellationToken) -> Result<(), HandlerError> {
        self.exit_codes.lock().push(exit_code);
        Ok(())
    }
}

// =============================================================================
// Recording Request Handler
// =============================================================================

/// An IPC request handler that records requests and acknowledges them.
#[derive(Debug, Default)]
pub struct RecordingRequestHandler {
    requests: Mutex<Vec<IpcMessage>>,
    disconnects: AtomicUsize,
}

impl RecordingRequestHandler {
    /// Creates a handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<IpcMessage> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of closed connections.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for RecordingRequestHandler {
    async fn handle(&self, _peer: &PeerInfo, request: IpcMessage) -> IpcResult<IpcMessage> {
        self.requests.lock().push(request);
        Ok(IpcMessage::VoidResponse)
    }

    async fn on_disconnect(&self, _peer: &PeerInfo) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
