// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Domain-specific assertion helpers for vigil integration tests.
//!
//! ## Design Principles
//!
//! - Provide clear, informative failure messages
//! - Accept the recording mocks directly

use std::time::Duration;

use vigil_core::{BusStats, ExitCode, StateKind, TestNode, TestRunOutcome, TestRunSummary};

use super::mocks::{LifetimeEvent, RecordingConsumer, RecordingLifetimeHandler};

// =============================================================================
// TestNode Assertions
// =============================================================================

/// Assertion extensions for [`TestNode`].
pub trait TestNodeAssertions {
    /// Assert the node's state kind.
    fn assert_state(&self, expected: StateKind);

    /// Assert the node failed and its exception message contains `fragment`.
    fn assert_failed_with(&self, fragment: &str);
}

impl TestNodeAssertions for TestNode {
    fn assert_state(&self, expected: StateKind) {
        assert_eq!(
            self.state_kind(),
            expected,
            "Expected {} to be {}, but it is {}",
            self.uid,
            expected.as_str(),
            self.state_kind().as_str()
        );
    }

    fn assert_failed_with(&self, fragment: &str) {
        self.assert_state(StateKind::Failed);
        let message = self
            .state()
            .exception()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        assert!(
            message.contains(fragment),
            "Expected failure message of {} to contain {:?}, got {:?}",
            self.uid,
            fragment,
            message
        );
    }
}

// =============================================================================
// Consumer Assertions
// =============================================================================

/// Assert the exact sequence of states a consumer saw for `uid`.
pub fn assert_states(consumer: &RecordingConsumer, uid: &str, expected: &[StateKind]) {
    let actual = consumer.states_for(uid);
    assert_eq!(
        actual, expected,
        "Unexpected state sequence for {}: expected {:?}, got {:?}",
        uid, expected, actual
    );
}

/// Assert a consumer was invoked exactly `expected` times.
pub fn assert_call_count(consumer: &RecordingConsumer, expected: usize) {
    let actual = consumer.call_count();
    assert_eq!(actual, expected, "Expected {} consume calls, got {}", expected, actual);
}

/// Assert a lifetime handler saw `event` exactly `expected` times.
pub fn assert_event_count(handler: &RecordingLifetimeHandler, event: LifetimeEvent, expected: usize) {
    let actual = handler.count(event);
    assert_eq!(
        actual,
        expected,
        "Expected {:?} {} time(s), got {} (events: {:?})",
        event,
        expected,
        actual,
        handler.events()
    );
}

// =============================================================================
// Run Assertions
// =============================================================================

/// Assertion extensions for [`TestRunOutcome`].
pub trait OutcomeAssertions {
    /// Assert the exit code.
    fn assert_exit_code(&self, expected: ExitCode);

    /// Assert passed / failed / skipped counts.
    fn assert_counts(&self, passed: usize, failed: usize, skipped: usize);
}

impl OutcomeAssertions for TestRunOutcome {
    fn assert_exit_code(&self, expected: ExitCode) {
        assert_eq!(
            self.exit_code, expected,
            "Expected exit code {:?} ({}), got {:?} ({}); summary: {:?}",
            expected,
            expected.code(),
            self.exit_code,
            self.exit_code.code(),
            self.summary
        );
    }

    fn assert_counts(&self, passed: usize, failed: usize, skipped: usize) {
        assert_summary_counts(&self.summary, passed, failed, skipped);
    }
}

/// Assert passed / failed / skipped counts of a summary.
pub fn assert_summary_counts(summary: &TestRunSummary, passed: usize, failed: usize, skipped: usize) {
    assert_eq!(
        (summary.passed, summary.failed, summary.skipped),
        (passed, failed, skipped),
        "Unexpected (passed, failed, skipped) counts; summary: {:?}",
        summary
    );
}

/// Assert bus counters.
pub fn assert_bus_stats(stats: &BusStats, published: u64, delivered: u64, faulted: u64) {
    assert_eq!(
        (stats.published, stats.delivered, stats.faulted),
        (published, delivered, faulted),
        "Unexpected (published, delivered, faulted); stats: {:?}",
        stats
    );
}

// =============================================================================
// Output Assertions
// =============================================================================

/// Assert that console output contains every fragment.
pub fn assert_output_contains(output: &str, fragments: &[&str]) {
    for fragment in fragments {
        assert!(
            output.contains(fragment),
            "Expected output to contain {:?}\n--- output ---\n{}",
            fragment,
            output
        );
    }
}

/// Assert that console output contains none of the fragments.
pub fn assert_output_lacks(output: &str, fragments: &[&str]) {
    for fragment in fragments {
        assert!(
            !output.contains(fragment),
            "Expected output not to contain {:?}\n--- output ---\n{}",
            fragment,
            output
        );
    }
}

// =============================================================================
// Async Assertions
// =============================================================================

/// Wait until `condition` holds, polling every 10 ms.
///
/// Panics after `timeout`.
pub async fn assert_eventually<F>(timeout: Duration, description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Condition not met within {:?}: {}", timeout, description);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
