// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built nodes, messages, registries and configuration documents.
//!
//! ## Design Principles
//!
//! - Fixtures are plain values; build a fresh one per test
//! - Each fixture represents a realistic scenario

use std::time::Duration;

use vigil_core::{
    Assert, BusMessage, ExceptionInfo, SessionUid, TestCase, TestNode, TestNodeStateProperty, TestOutcome,
    TestRegistry,
};

// =============================================================================
// Node Fixtures
// =============================================================================

/// Fixture providing test nodes in each state.
pub struct NodeFixtures;

impl NodeFixtures {
    /// Uid used by single-node scenarios.
    pub const UID: &'static str = "math::adds_numbers";

    /// A discovered node.
    pub fn discovered(uid: &str) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::Discovered)
    }

    /// A node that is running.
    pub fn in_progress(uid: &str) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::InProgress)
    }

    /// A passed node.
    pub fn passed(uid: &str) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::passed())
    }

    /// A failed node carrying an exception message.
    pub fn failed(uid: &str, message: &str) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::failed(message))
    }

    /// A failed node with a type name and stack trace.
    pub fn failed_with_trace(uid: &str, message: &str) -> TestNode {
        let exception = ExceptionInfo::new(message)
            .with_type_name("AssertionError")
            .with_stack_trace(format!("at {}\nat runner::invoke", uid));
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::failed_with(exception))
    }

    /// A skipped node.
    pub fn skipped(uid: &str, reason: &str) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::skipped(Some(reason.to_string())))
    }

    /// A node that timed out.
    pub fn timed_out(uid: &str, limit: Duration) -> TestNode {
        TestNode::new(uid, display_name(uid), TestNodeStateProperty::timeout(limit))
    }
}

/// Last path segment of a uid, used as the display name.
fn display_name(uid: &str) -> String {
    uid.rsplit("::").next().unwrap_or(uid).to_string()
}

// =============================================================================
// Message Fixtures
// =============================================================================

/// Fixture providing bus messages.
pub struct MessageFixtures;

impl MessageFixtures {
    /// A node update for `node` in `session`.
    pub fn update(session: &SessionUid, node: TestNode) -> BusMessage {
        BusMessage::node_update(session.clone(), node, None)
    }

    /// `InProgress` followed by `Passed` for the same uid.
    pub fn run_to_pass(session: &SessionUid, uid: &str) -> Vec<BusMessage> {
        let running = NodeFixtures::in_progress(uid);
        let passed = running.transition(TestNodeStateProperty::passed());
        vec![Self::update(session, running), Self::update(session, passed)]
    }

    /// A session-level artifact.
    pub fn artifact(session: &SessionUid, path: &str) -> BusMessage {
        BusMessage::session_artifact(session.clone(), path, "results", Some("run results".to_string()))
    }
}

// =============================================================================
// Registry Fixtures
// =============================================================================

/// Fixture providing test registration tables.
pub struct RegistryFixtures;

impl RegistryFixtures {
    /// `count` passing tests named `suite::passes_NN`.
    pub fn passing(count: usize) -> TestRegistry {
        let mut tests = TestRegistry::new();
        for i in 0..count {
            tests
                .register(TestCase::new(format!("suite::passes_{:02}", i), |_| async { TestOutcome::Ok(()) }))
                .expect("unique test names");
        }
        tests
    }

    /// Two passing tests, one failing, one skipped.
    pub fn mixed() -> TestRegistry {
        let mut tests = TestRegistry::new();
        tests
            .test("math::adds", |_| async { Assert::are_equal(4, 2 + 2) })
            .expect("unique test names");
        tests
            .test("math::multiplies", |_| async { Assert::are_equal(6, 2 * 3) })
            .expect("unique test names");
        tests
            .test("math::divides", |_| async { Assert::fail("Assertion failed.") })
            .expect("unique test names");
        tests
            .register(TestCase::new("math::slow", |_| async { TestOutcome::Ok(()) }).ignore("too slow"))
            .expect("unique test names");
        tests
    }

    /// `count` failing tests named `suite::fails_NN`.
    pub fn failing(count: usize) -> TestRegistry {
        let mut tests = TestRegistry::new();
        for i in 0..count {
            tests
                .test(format!("suite::fails_{:02}", i), |_| async { Assert::fail("broken") })
                .expect("unique test names");
        }
        tests
    }

    /// One test that sleeps, observing cancellation.
    pub fn sleeping(duration: Duration) -> TestRegistry {
        let mut tests = TestRegistry::new();
        tests
            .test("suite::sleeps", move |ctx| async move {
                let _ = ctx.cancellation().run_until_cancelled(tokio::time::sleep(duration)).await;
                ctx.throw_if_cancellation_requested()
            })
            .expect("unique test names");
        tests
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Fixture providing configuration documents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A complete YAML configuration.
    pub fn full_yaml() -> &'static str {
        r#"
platform:
  worker_count: 2
  test_timeout: 30s
  delivery: queued
  minimum_expected_tests: 1
  maximum_failed_tests: 5
  results_directory: out
  show_passed: false
ipc:
  transport: tcp
  host: 127.0.0.1
  port: 5050
  connect_timeout: 5s
  request_timeout: 10s
logging:
  level: debug
  format: json
extensions:
  - uid: trx-report
  - uid: hang-dump
    enabled: false
"#
    }

    /// The same settings as TOML.
    pub fn full_toml() -> &'static str {
        r#"
[platform]
worker_count = 2
test_timeout = "30s"
delivery = "queued"
minimum_expected_tests = 1
maximum_failed_tests = 5
results_directory = "out"
show_passed = false

[ipc]
transport = "tcp"
host = "127.0.0.1"
port = 5050
connect_timeout = "5s"
request_timeout = "10s"

[logging]
level = "debug"
format = "json"

[[extensions]]
uid = "trx-report"

[[extensions]]
uid = "hang-dump"
enabled = false
"#
    }

    /// A unix-socket IPC section without a socket path.
    pub fn unix_without_socket_yaml() -> &'static str {
        r#"
ipc:
  transport: unix
"#
    }
}
