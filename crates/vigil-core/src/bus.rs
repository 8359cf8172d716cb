// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process publish/subscribe message bus.
//!
//! Producers publish [`BusMessage`] values; the bus fans each message out
//! to every registered consumer that declares the message's [`DataKind`]
//! and is currently enabled.
//!
//! # Design Principles
//!
//! - Registration happens on [`MessageBusBuilder`]; a built bus is frozen
//! - Each consumer owns one FIFO processor task, so delivery order per
//!   consumer matches publish order
//! - Consumers run concurrently with each other
//! - A failing or panicking consumer never blocks its siblings; faults are
//!   collected and returned by [`MessageBus::drain`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         MessageBus                            │
//! │                                                               │
//! │  publish(producer, msg)                                       │
//! │     │  declared kind?  session retired?                       │
//! │     ▼                                                         │
//! │  for each consumer: consumes kind? ── is_enabled()? ──┐       │
//! │                                                       ▼       │
//! │   ┌──────────┐    ┌──────────┐    ┌──────────┐                │
//! │   │ queue A  │    │ queue B  │    │ queue C  │   (FIFO each)  │
//! │   └────┬─────┘    └────┬─────┘    └────┬─────┘                │
//! │        ▼               ▼               ▼                      │
//! │    consume()       consume()       consume()   (concurrent)   │
//! │        └───────────────┴───────────────┘                      │
//! │              pending counter / faults ──► drain()             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::bus::MessageBusBuilder;
//!
//! let bus = MessageBusBuilder::new()
//!     .register_producer(framework.clone())
//!     .register_consumer(console.clone())
//!     .build();
//!
//! bus.publish(framework.as_ref(), message).await?;
//! bus.drain().await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cancellation::TestRunCancellationToken;
use crate::error::{BusError, BusResult, ConsumerFault, HandlerError};
use crate::extension::Extension;
use crate::message::{BusMessage, DataKind};
use crate::types::SessionUid;

// =============================================================================
// Producer / Consumer Traits
// =============================================================================

/// An extension that publishes messages on the bus.
pub trait DataProducer: Extension {
    /// The message kinds this producer may publish.
    fn data_types_produced(&self) -> &[DataKind];
}

/// An extension that receives messages from the bus.
#[async_trait]
pub trait DataConsumer: Extension {
    /// The message kinds this consumer accepts.
    fn data_types_consumed(&self) -> &[DataKind];

    /// Handles one delivered message.
    ///
    /// Long-running work should observe `cancellation` and return
    /// `HandlerError::Cancelled` promptly once it fires.
    async fn consume(
        &self,
        producer: &ProducerInfo,
        message: &BusMessage,
        cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Identity of the producer that published a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    /// Producer uid.
    pub uid: String,
    /// Producer display name.
    pub display_name: String,
}

impl ProducerInfo {
    /// Captures the identity of a producer.
    pub fn of(producer: &dyn DataProducer) -> Self {
        Self {
            uid: producer.uid().to_string(),
            display_name: producer.display_name().to_string(),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// When `publish` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Wait for every matching consumer callback to complete.
    #[default]
    Awaited,
    /// Return once the message is queued; completion is observed by `drain`.
    Queued,
}

/// Message bus configuration.
#[derive(Debug, Clone, Default)]
pub struct MessageBusConfig {
    /// Delivery mode for `publish`.
    pub delivery: DeliveryMode,
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics about message bus usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Messages accepted by `publish`.
    pub published: u64,
    /// Successful consumer deliveries.
    pub delivered: u64,
    /// Deliveries skipped because the consumer was disabled.
    pub skipped_disabled: u64,
    /// Messages that matched no enabled consumer.
    pub unmatched: u64,
    /// Deliveries that ended in a consumer fault.
    pub faulted: u64,
    /// Number of registered consumers.
    pub consumer_count: usize,
}

/// Atomic counters backing [`BusStats`].
#[derive(Debug, Default)]
struct AtomicBusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    skipped_disabled: AtomicU64,
    unmatched: AtomicU64,
    faulted: AtomicU64,
}

impl AtomicBusStats {
    fn snapshot(&self, consumer_count: usize) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped_disabled: self.skipped_disabled.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            consumer_count,
        }
    }
}

// =============================================================================
// MessageBusBuilder
// =============================================================================

/// Collects producers and consumers before the session starts.
pub struct MessageBusBuilder {
    producers: Vec<Arc<dyn DataProducer>>,
    consumers: Vec<Arc<dyn DataConsumer>>,
    config: MessageBusConfig,
    cancellation: TestRunCancellationToken,
}

impl MessageBusBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            producers: Vec::new(),
            consumers: Vec::new(),
            config: MessageBusConfig::default(),
            cancellation: TestRunCancellationToken::new(),
        }
    }

    /// Registers a producer.
    pub fn register_producer(mut self, producer: Arc<dyn DataProducer>) -> Self {
        debug!(uid = producer.uid(), kinds = ?producer.data_types_produced(), "Registered producer");
        self.producers.push(producer);
        self
    }

    /// Registers a consumer.
    pub fn register_consumer(mut self, consumer: Arc<dyn DataConsumer>) -> Self {
        debug!(uid = consumer.uid(), kinds = ?consumer.data_types_consumed(), "Registered consumer");
        self.consumers.push(consumer);
        self
    }

    /// Registers several consumers.
    pub fn register_consumers(
        mut self,
        consumers: impl IntoIterator<Item = Arc<dyn DataConsumer>>,
    ) -> Self {
        for consumer in consumers {
            self = self.register_consumer(consumer);
        }
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: MessageBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the run cancellation token handed to consumers.
    pub fn cancellation(mut self, token: TestRunCancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Freezes the registry and starts one processor per consumer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> MessageBus {
        let shared = Arc::new(BusShared {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            faults: Mutex::new(Vec::new()),
            stats: AtomicBusStats::default(),
            cancellation: self.cancellation,
        });

        let mut slots = Vec::with_capacity(self.consumers.len());
        let mut workers = Vec::with_capacity(self.consumers.len());

        for consumer in self.consumers {
            let (sender, receiver) = mpsc::unbounded_channel();
            let kinds = consumer.data_types_consumed().to_vec();
            workers.push(tokio::spawn(run_processor(
                consumer.clone(),
                receiver,
                shared.clone(),
            )));
            slots.push(ConsumerSlot {
                consumer,
                kinds,
                sender,
            });
        }

        debug!(
            producers = self.producers.len(),
            consumers = slots.len(),
            delivery = ?self.config.delivery,
            "Message bus built"
        );

        MessageBus {
            inner: Arc::new(BusInner {
                slots,
                producer_uids: self.producers.iter().map(|p| p.uid().to_string()).collect(),
                shared,
                retired: RwLock::new(HashSet::new()),
                closed: AtomicBool::new(false),
                workers: Mutex::new(workers),
                config: self.config,
            }),
        }
    }
}

impl Default for MessageBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBusBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBusBuilder")
            .field("producers", &self.producers.len())
            .field("consumers", &self.consumers.len())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// MessageBus
// =============================================================================

enum Envelope {
    Deliver(Delivery),
    Stop,
}

struct Delivery {
    producer: Arc<ProducerInfo>,
    message: Arc<BusMessage>,
    ack: Option<oneshot::Sender<()>>,
}

struct ConsumerSlot {
    consumer: Arc<dyn DataConsumer>,
    kinds: Vec<DataKind>,
    sender: mpsc::UnboundedSender<Envelope>,
}

struct BusShared {
    pending: AtomicUsize,
    idle: Notify,
    faults: Mutex<Vec<ConsumerFault>>,
    stats: AtomicBusStats,
    cancellation: TestRunCancellationToken,
}

impl BusShared {
    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct BusInner {
    slots: Vec<ConsumerSlot>,
    producer_uids: Vec<String>,
    shared: Arc<BusShared>,
    retired: RwLock<HashSet<SessionUid>>,
    closed: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: MessageBusConfig,
}

/// Handle to a built message bus. Cheap to clone.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Creates a builder.
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::new()
    }

    /// Publishes a message to every matching, enabled consumer.
    ///
    /// # Errors
    ///
    /// - `BusError::Closed` - The bus has been shut down, including while
    ///   this publish was in progress
    /// - `BusError::UndeclaredDataType` - The producer did not declare the kind
    /// - `BusError::SessionRetired` - The message's session has been closed
    ///
    /// Consumer failures are not returned here; they surface from
    /// [`drain`](Self::drain).
    pub async fn publish(&self, producer: &dyn DataProducer, message: BusMessage) -> BusResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let kind = message.kind();
        if !producer.data_types_produced().contains(&kind) {
            return Err(BusError::undeclared(producer.uid(), kind));
        }

        if inner.retired.read().contains(message.session_uid()) {
            return Err(BusError::SessionRetired {
                session: message.session_uid().clone(),
            });
        }

        inner.shared.stats.published.fetch_add(1, Ordering::Relaxed);

        let producer = Arc::new(ProducerInfo::of(producer));
        let message = Arc::new(message);
        let awaited = inner.config.delivery == DeliveryMode::Awaited;
        let mut acks = Vec::new();
        let mut matched = 0usize;
        let mut closed_midway = false;

        for slot in &inner.slots {
            if !slot.kinds.contains(&kind) {
                continue;
            }
            if !slot.consumer.is_enabled().await {
                inner.shared.stats.skipped_disabled.fetch_add(1, Ordering::Relaxed);
                trace!(consumer = slot.consumer.uid(), %kind, "Skipping disabled consumer");
                continue;
            }
            // Shutdown may have queued its stop marker while we awaited.
            if inner.closed.load(Ordering::SeqCst) {
                closed_midway = true;
                break;
            }

            let (ack, ack_rx) = if awaited {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            inner.shared.pending.fetch_add(1, Ordering::SeqCst);
            let envelope = Envelope::Deliver(Delivery {
                producer: producer.clone(),
                message: message.clone(),
                ack,
            });

            if slot.sender.send(envelope).is_err() {
                inner.shared.complete_one();
                warn!(consumer = slot.consumer.uid(), "Consumer processor is gone");
                continue;
            }

            matched += 1;
            if let Some(rx) = ack_rx {
                acks.push(rx);
            }
        }

        if matched == 0 && !closed_midway {
            inner.shared.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            trace!(%kind, producer = %producer.uid, "No enabled consumer for message");
        }

        if !acks.is_empty() {
            // A dropped ack means the processor went away; drain reports it.
            join_all(acks).await;
        }

        if closed_midway {
            debug!(%kind, delivered_to = matched, "Bus closed during publish");
            return Err(BusError::Closed);
        }

        Ok(())
    }

    /// Waits until every previously published message has been delivered
    /// to every consumer, then returns the faults collected since the last
    /// drain.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ConsumerFaults` if any consumer failed.
    pub async fn drain(&self) -> BusResult<()> {
        let shared = &self.inner.shared;
        loop {
            let idle = shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }

        let faults = std::mem::take(&mut *shared.faults.lock());
        if faults.is_empty() {
            Ok(())
        } else {
            warn!(count = faults.len(), "Consumer faults collected during drain");
            Err(BusError::ConsumerFaults(faults))
        }
    }

    /// Marks a session as retired; later messages referencing it are rejected.
    pub fn retire_session(&self, session: &SessionUid) {
        self.inner.retired.write().insert(session.clone());
        debug!(session = %session, "Session retired on bus");
    }

    /// Returns `true` if the session has been retired.
    pub fn is_retired(&self, session: &SessionUid) -> bool {
        self.inner.retired.read().contains(session)
    }

    /// Returns the number of deliveries still in flight.
    pub fn pending(&self) -> usize {
        self.inner.shared.pending.load(Ordering::SeqCst)
    }

    /// Returns the uids of registered consumers in registration order.
    pub fn consumer_uids(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .map(|s| s.consumer.uid().to_string())
            .collect()
    }

    /// Returns the uids of registered producers in registration order.
    pub fn producer_uids(&self) -> &[String] {
        &self.inner.producer_uids
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> BusStats {
        self.inner.shared.stats.snapshot(self.inner.slots.len())
    }

    /// Returns `true` once the bus has been shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting publishes, lets queued deliveries finish, and joins
    /// the consumer processors.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for slot in &self.inner.slots {
            let _ = slot.sender.send(Envelope::Stop);
        }

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Consumer processor terminated abnormally");
            }
        }
        debug!("Message bus shut down");
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("consumers", &self.consumer_uids())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Consumer Processor
// =============================================================================

async fn run_processor(
    consumer: Arc<dyn DataConsumer>,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<BusShared>,
) {
    while let Some(envelope) = receiver.recv().await {
        let delivery = match envelope {
            Envelope::Deliver(delivery) => delivery,
            Envelope::Stop => break,
        };

        let kind = delivery.message.kind();
        let outcome = AssertUnwindSafe(consumer.consume(
            &delivery.producer,
            &delivery.message,
            &shared.cancellation,
        ))
        .catch_unwind()
        .await;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(HandlerError::Cancelled(_))) => {
                debug!(consumer = consumer.uid(), %kind, "Consumer observed cancellation");
                None
            }
            Ok(Err(e)) => Some((e.to_string(), false)),
            Err(panic) => Some((panic_message(panic.as_ref()), true)),
        };

        match fault {
            None => {
                shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Some((description, panicked)) => {
                warn!(
                    consumer = consumer.uid(),
                    %kind,
                    panicked,
                    error = %description,
                    "Consumer failed to handle message"
                );
                shared.stats.faulted.fetch_add(1, Ordering::Relaxed);
                shared.faults.lock().push(ConsumerFault {
                    consumer: consumer.uid().to_string(),
                    kind,
                    description,
                    panicked,
                });
            }
        }

        if let Some(ack) = delivery.ack {
            let _ = ack.send(());
        }
        shared.complete_one();
    }

    // Deliveries that raced shutdown land behind the stop marker. Close the
    // channel so no more can arrive, then settle them so drain never waits.
    receiver.close();
    let mut discarded = 0usize;
    while let Ok(envelope) = receiver.try_recv() {
        if let Envelope::Deliver(_) = envelope {
            discarded += 1;
            shared.complete_one();
        }
    }
    if discarded > 0 {
        warn!(consumer = consumer.uid(), discarded, "Discarded deliveries queued after shutdown");
    }

    trace!(consumer = consumer.uid(), "Consumer processor stopped");
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionInfo;
    use crate::node::TestNode;
    use crate::property::{StateKind, TestNodeStateProperty};
    use std::time::Duration;

    struct Producer(ExtensionInfo, Vec<DataKind>);

    impl Producer {
        fn nodes() -> Arc<Self> {
            Arc::new(Self(
                ExtensionInfo::builtin("producer", "Producer", "test"),
                vec![DataKind::TestNodeUpdate],
            ))
        }
    }

    #[async_trait]
    impl Extension for Producer {
        fn uid(&self) -> &str {
            self.0.uid()
        }
        fn version(&self) -> &str {
            self.0.version()
        }
        fn display_name(&self) -> &str {
            self.0.display_name()
        }
        fn description(&self) -> &str {
            self.0.description()
        }
    }

    impl DataProducer for Producer {
        fn data_types_produced(&self) -> &[DataKind] {
            &self.1
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, StateKind)>>,
        disabled: AtomicBool,
        fail: bool,
        panic: bool,
        delay: Option<Duration>,
        enable_delay: Option<Duration>,
    }

    #[async_trait]
    impl Extension for Recorder {
        fn uid(&self) -> &str {
            "recorder"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn display_name(&self) -> &str {
            "Recorder"
        }
        fn description(&self) -> &str {
            "records"
        }
        async fn is_enabled(&self) -> bool {
            if let Some(delay) = self.enable_delay {
                tokio::time::sleep(delay).await;
            }
            !self.disabled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataConsumer for Recorder {
        fn data_types_consumed(&self) -> &[DataKind] {
            &[DataKind::TestNodeUpdate]
        }

        async fn consume(
            &self,
            _producer: &ProducerInfo,
            message: &BusMessage,
            _cancellation: &TestRunCancellationToken,
        ) -> Result<(), HandlerError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panic {
                panic!("recorder exploded");
            }
            if self.fail {
                return Err(HandlerError::failed("recorder refused"));
            }
            if let Some(update) = message.as_node_update() {
                self.seen.lock().push((
                    update.test_node.uid.to_string(),
                    update.test_node.state_kind(),
                ));
            }
            Ok(())
        }
    }

    fn update(uid: &str, state: TestNodeStateProperty) -> BusMessage {
        BusMessage::node_update(SessionUid::new("s"), TestNode::new(uid, uid, state), None)
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let producer = Producer::nodes();
        let recorder = Arc::new(Recorder::default());
        let bus = MessageBus::builder()
            .register_producer(producer.clone())
            .register_consumer(recorder.clone())
            .build();

        bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap();
        bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::passed()))
            .await
            .unwrap();
        bus.drain().await.unwrap();

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                ("a".to_string(), StateKind::InProgress),
                ("a".to_string(), StateKind::Passed)
            ]
        );
        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn test_disabled_consumer_is_skipped() {
        let producer = Producer::nodes();
        let recorder = Arc::new(Recorder::default());
        recorder.disabled.store(true, Ordering::SeqCst);
        let bus = MessageBus::builder().register_consumer(recorder.clone()).build();

        bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap();
        bus.drain().await.unwrap();

        assert!(recorder.seen.lock().is_empty());
        assert_eq!(bus.stats().skipped_disabled, 1);
        assert_eq!(bus.stats().unmatched, 1);
    }

    #[tokio::test]
    async fn test_undeclared_kind_is_rejected() {
        let producer = Producer::nodes();
        let bus = MessageBus::builder().build();
        let msg = BusMessage::session_artifact(SessionUid::new("s"), "/tmp/x", "x", None);

        let err = bus.publish(producer.as_ref(), msg).await.unwrap_err();
        assert!(matches!(err, BusError::UndeclaredDataType { .. }));
    }

    #[tokio::test]
    async fn test_faults_are_isolated_and_surface_at_drain() {
        let producer = Producer::nodes();
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let panicking = Arc::new(Recorder {
            panic: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        let bus = MessageBus::builder()
            .register_consumer(failing)
            .register_consumer(panicking)
            .register_consumer(healthy.clone())
            .build();

        bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap();

        let err = bus.drain().await.unwrap_err();
        let faults = err.faults();
        assert_eq!(faults.len(), 2);
        assert!(faults.iter().any(|f| f.panicked && f.description == "recorder exploded"));
        assert!(faults.iter().any(|f| !f.panicked && f.description == "recorder refused"));
        assert_eq!(healthy.seen.lock().len(), 1);

        // Faults are cleared once reported.
        bus.drain().await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_mode_drain_waits_for_slow_consumer() {
        let producer = Producer::nodes();
        let slow = Arc::new(Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let bus = MessageBus::builder()
            .config(MessageBusConfig {
                delivery: DeliveryMode::Queued,
            })
            .register_consumer(slow.clone())
            .build();

        for _ in 0..3 {
            bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
                .await
                .unwrap();
        }
        assert!(slow.seen.lock().len() < 3);

        bus.drain().await.unwrap();
        assert_eq!(slow.seen.lock().len(), 3);
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn test_retired_session_is_rejected() {
        let producer = Producer::nodes();
        let bus = MessageBus::builder().build();
        bus.retire_session(&SessionUid::new("s"));

        let err = bus
            .publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::SessionRetired { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_publish() {
        let producer = Producer::nodes();
        let recorder = Arc::new(Recorder::default());
        let bus = MessageBus::builder().register_consumer(recorder).build();

        bus.shutdown().await;
        assert!(bus.is_closed());
        let err = bus
            .publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn test_publish_racing_shutdown_does_not_strand_drain() {
        let producer = Producer::nodes();
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(200)),
            enable_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let bus = MessageBus::builder()
            .config(MessageBusConfig {
                delivery: DeliveryMode::Queued,
            })
            .register_producer(producer.clone())
            .register_consumer(recorder.clone())
            .build();

        bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::InProgress))
            .await
            .unwrap();

        let racing = {
            let bus = bus.clone();
            let producer = producer.clone();
            tokio::spawn(async move {
                bus.publish(producer.as_ref(), update("a", TestNodeStateProperty::passed()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.shutdown().await;

        let result = racing.await.unwrap();
        assert!(matches!(result, Err(BusError::Closed)));
        assert_eq!(bus.pending(), 0);
        tokio::time::timeout(Duration::from_secs(2), bus.drain())
            .await
            .expect("drain must not hang after shutdown")
            .unwrap();
        assert_eq!(
            *recorder.seen.lock(),
            vec![("a".to_string(), StateKind::InProgress)]
        );
    }

    #[tokio::test]
    async fn test_processor_settles_deliveries_behind_stop() {
        let recorder = Arc::new(Recorder::default());
        let shared = Arc::new(BusShared {
            pending: AtomicUsize::new(1),
            idle: Notify::new(),
            faults: Mutex::new(Vec::new()),
            stats: AtomicBusStats::default(),
            cancellation: TestRunCancellationToken::new(),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        let producer = Producer::nodes();

        sender.send(Envelope::Stop).ok();
        sender
            .send(Envelope::Deliver(Delivery {
                producer: Arc::new(ProducerInfo::of(producer.as_ref())),
                message: Arc::new(update("a", TestNodeStateProperty::passed())),
                ack: None,
            }))
            .ok();

        run_processor(recorder.clone(), receiver, shared.clone()).await;

        assert_eq!(shared.pending.load(Ordering::SeqCst), 0);
        assert!(recorder.seen.lock().is_empty());
        assert!(sender.send(Envelope::Stop).is_err());
    }
}
