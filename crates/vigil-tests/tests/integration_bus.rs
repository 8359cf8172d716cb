// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Message Bus Integration Tests
//!
//! Integration tests for vigil-core's message bus including:
//!
//! - Per-node ordering of updates
//! - Enabled/disabled consumers and data-kind routing
//! - Consumer fault isolation and queued delivery
//! - Console rendering of failed nodes
//!
//! ## Test Categories
//!
//! - `test_bus_*`: Bus delivery tests
//! - `test_console_*`: Console output tests

use std::sync::Arc;
use std::time::Duration;

use vigil_core::{
    BusError, CapturedOutput, ConsoleOutputDevice, DataConsumer, DataKind, DataProducer, DeliveryMode, MessageBus,
    MessageBusConfig, SessionUid, StateKind, TestRunCancellationToken,
};
use vigil_tests::common::init_test_logging;
use vigil_tests::prelude::*;

macro_rules! consumers {
    ($($c:expr),* $(,)?) => {
        vec![$($c.clone() as Arc<dyn DataConsumer>),*]
    };
}

fn bus_with(producer: &Arc<MockProducer>, consumers: Vec<Arc<dyn DataConsumer>>, delivery: DeliveryMode) -> MessageBus {
    MessageBus::builder()
        .config(MessageBusConfig { delivery })
        .register_producer(producer.clone() as Arc<dyn DataProducer>)
        .register_consumers(consumers)
        .build()
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_bus_delivers_in_progress_then_passed() {
    init_test_logging();
    let producer = MockProducer::new("framework");
    let recorder = RecordingConsumer::new("recorder");
    let bus = bus_with(&producer, consumers![recorder], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    for message in MessageFixtures::run_to_pass(&session, NodeFixtures::UID) {
        bus.publish(producer.as_ref(), message).await.unwrap();
    }
    bus.drain().await.unwrap();

    assert_call_count(&recorder, 2);
    assert_states(&recorder, NodeFixtures::UID, &[StateKind::InProgress, StateKind::Passed]);
    assert!(recorder.calls().iter().all(|c| c.producer == "framework"));

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_queued_keeps_per_node_order() {
    let producer = MockProducer::new("framework");
    let recorder = RecordingConsumer::new("recorder");
    recorder.set_delay(Duration::from_millis(5));
    let bus = bus_with(&producer, consumers![recorder], DeliveryMode::Queued);
    let session = SessionUid::generate();

    for i in 0..5 {
        let uid = format!("suite::case_{}", i);
        for message in MessageFixtures::run_to_pass(&session, &uid) {
            bus.publish(producer.as_ref(), message).await.unwrap();
        }
    }
    bus.drain().await.unwrap();

    assert_call_count(&recorder, 10);
    for i in 0..5 {
        assert_states(
            &recorder,
            &format!("suite::case_{}", i),
            &[StateKind::InProgress, StateKind::Passed],
        );
    }
    assert_bus_stats(&bus.stats(), 10, 10, 0);

    bus.shutdown().await;
}

// =============================================================================
// Enabled / Disabled
// =============================================================================

#[tokio::test]
async fn test_bus_skips_disabled_consumer() {
    let producer = MockProducer::new("framework");
    let enabled = RecordingConsumer::new("enabled");
    let disabled = RecordingConsumer::disabled("disabled");
    let bus = bus_with(
        &producer,
        consumers![enabled, disabled],
        DeliveryMode::Awaited,
    );
    let session = SessionUid::generate();

    let node = NodeFixtures::passed(NodeFixtures::UID);
    bus.publish(producer.as_ref(), MessageFixtures::update(&session, node))
        .await
        .unwrap();
    bus.drain().await.unwrap();

    assert_call_count(&enabled, 1);
    assert_call_count(&disabled, 0);
    assert_eq!(bus.stats().skipped_disabled, 1);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_enabled_is_checked_per_message() {
    let producer = MockProducer::new("framework");
    let recorder = RecordingConsumer::new("toggled");
    let bus = bus_with(&producer, consumers![recorder], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    bus.publish(producer.as_ref(), MessageFixtures::update(&session, NodeFixtures::in_progress("a::b")))
        .await
        .unwrap();
    recorder.set_enabled(false);
    bus.publish(producer.as_ref(), MessageFixtures::update(&session, NodeFixtures::passed("a::b")))
        .await
        .unwrap();
    bus.drain().await.unwrap();

    assert_states(&recorder, "a::b", &[StateKind::InProgress]);

    bus.shutdown().await;
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_bus_routes_by_data_kind() {
    let producer = MockProducer::new("framework");
    let nodes = RecordingConsumer::new("nodes");
    let artifacts = RecordingConsumer::with_kinds("artifacts", vec![DataKind::SessionFileArtifact]);
    let bus = bus_with(
        &producer,
        consumers![nodes, artifacts],
        DeliveryMode::Awaited,
    );
    let session = SessionUid::generate();

    bus.publish(producer.as_ref(), MessageFixtures::update(&session, NodeFixtures::passed("a::b")))
        .await
        .unwrap();
    bus.publish(producer.as_ref(), MessageFixtures::artifact(&session, "out/results.json"))
        .await
        .unwrap();
    bus.drain().await.unwrap();

    assert_call_count(&nodes, 1);
    assert_call_count(&artifacts, 1);
    assert_eq!(artifacts.calls()[0].kind, DataKind::SessionFileArtifact);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_rejects_undeclared_kind() {
    let producer = MockProducer::with_kinds("nodes-only", vec![DataKind::TestNodeUpdate]);
    let recorder = RecordingConsumer::with_kinds("all", vec![DataKind::TestNodeUpdate, DataKind::SessionFileArtifact]);
    let bus = bus_with(&producer, consumers![recorder], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    let result = bus
        .publish(producer.as_ref(), MessageFixtures::artifact(&session, "out/a.txt"))
        .await;

    assert!(matches!(
        result,
        Err(BusError::UndeclaredDataType { ref producer, kind: DataKind::SessionFileArtifact }) if producer == "nodes-only"
    ));
    assert_call_count(&recorder, 0);
    assert_eq!(bus.stats().published, 0);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_rejects_retired_session() {
    let producer = MockProducer::new("framework");
    let recorder = RecordingConsumer::new("recorder");
    let bus = bus_with(&producer, consumers![recorder], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    bus.retire_session(&session);
    let result = bus
        .publish(producer.as_ref(), MessageFixtures::update(&session, NodeFixtures::passed("a::b")))
        .await;

    assert!(matches!(result, Err(BusError::SessionRetired { .. })));
    assert_call_count(&recorder, 0);

    bus.shutdown().await;
}

// =============================================================================
// Faults
// =============================================================================

#[tokio::test]
async fn test_bus_isolates_consumer_faults() {
    let producer = MockProducer::new("framework");
    let failing = RecordingConsumer::new("failing");
    failing.fail_all();
    let healthy = RecordingConsumer::new("healthy");
    let bus = bus_with(
        &producer,
        consumers![failing, healthy],
        DeliveryMode::Awaited,
    );
    let session = SessionUid::generate();

    for message in MessageFixtures::run_to_pass(&session, "a::b") {
        bus.publish(producer.as_ref(), message).await.unwrap();
    }

    let err = bus.drain().await.unwrap_err();
    let faults = err.faults();
    assert_eq!(faults.len(), 2);
    assert!(faults.iter().all(|f| f.consumer == "failing" && !f.panicked));
    assert_states(&healthy, "a::b", &[StateKind::InProgress, StateKind::Passed]);

    // Faults are reported once.
    bus.drain().await.unwrap();
    assert_eq!(bus.stats().faulted, 2);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_cancellation_stops_slow_consumer() {
    let producer = MockProducer::new("framework");
    let slow = RecordingConsumer::new("slow");
    slow.set_delay(Duration::from_secs(30));
    let token = TestRunCancellationToken::new();
    let bus = MessageBus::builder()
        .config(MessageBusConfig {
            delivery: DeliveryMode::Queued,
        })
        .cancellation(token.clone())
        .register_producer(producer.clone() as Arc<dyn DataProducer>)
        .register_consumer(slow.clone())
        .build();
    let session = SessionUid::generate();

    bus.publish(producer.as_ref(), MessageFixtures::update(&session, NodeFixtures::passed("a::b")))
        .await
        .unwrap();
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), bus.drain())
        .await
        .expect("drain should finish after cancellation")
        .unwrap();
    assert_eq!(slow.cancelled_calls(), 1);
    assert_call_count(&slow, 0);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_bus_closed_after_shutdown() {
    let producer = MockProducer::new("framework");
    let bus = bus_with(&producer, consumers![], DeliveryMode::Awaited);
    bus.shutdown().await;

    let result = bus
        .publish(
            producer.as_ref(),
            MessageFixtures::update(&SessionUid::generate(), NodeFixtures::passed("a::b")),
        )
        .await;
    assert!(matches!(result, Err(BusError::Closed)));
    assert!(bus.is_closed());
}

// =============================================================================
// Console Output
// =============================================================================

#[tokio::test]
async fn test_console_renders_failed_node() {
    let producer = MockProducer::new("framework");
    let output = CapturedOutput::new();
    let console = Arc::new(ConsoleOutputDevice::new(output.clone()));
    let bus = bus_with(&producer, consumers![console], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    let node = TestNodeBuilder::new("math::divides")
        .display_name("divides")
        .failed("Assertion failed.")
        .build();
    bus.publish(producer.as_ref(), MessageFixtures::update(&session, node))
        .await
        .unwrap();
    bus.drain().await.unwrap();

    let text = output.contents();
    assert_output_contains(&text, &["failed", "divides", "math::divides", "Assertion failed."]);

    bus.shutdown().await;
}

#[tokio::test]
async fn test_console_hides_passed_by_default() {
    let producer = MockProducer::new("framework");
    let output = CapturedOutput::new();
    let console = Arc::new(ConsoleOutputDevice::new(output.clone()));
    let bus = bus_with(&producer, consumers![console], DeliveryMode::Awaited);
    let session = SessionUid::generate();

    for message in MessageFixtures::run_to_pass(&session, "math::adds") {
        bus.publish(producer.as_ref(), message).await.unwrap();
    }
    bus.publish(
        producer.as_ref(),
        MessageFixtures::update(&session, NodeFixtures::skipped("math::slow", "too slow")),
    )
    .await
    .unwrap();
    bus.drain().await.unwrap();

    let text = output.contents();
    assert_output_lacks(&text, &["math::adds"]);
    assert_output_contains(&text, &["math::slow", "too slow"]);

    bus.shutdown().await;
}
