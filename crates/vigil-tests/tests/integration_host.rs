// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Host Integration Tests
//!
//! Integration tests for complete in-process runs including:
//!
//! - Exit codes and their precedence
//! - Test listing, filtering and policies
//! - Lifecycle callbacks and extension activation
//!
//! ## Test Categories
//!
//! - `test_exit_*`: Exit code tests
//! - `test_host_*`: Host behavior tests
//! - `test_extension_*`: Extension activation tests

use std::sync::Arc;
use std::time::Duration;

use vigil_core::command_line::names;
use vigil_core::{
    ExitCode, ExtensionError, ExtensionRegistry, ExtensionSet, StateKind, TestRunCancellationToken, VigilError,
};
use vigil_tests::common::init_test_logging;
use vigil_tests::prelude::*;

// =============================================================================
// Exit Codes
// =============================================================================

#[tokio::test]
async fn test_exit_success_when_all_pass() {
    init_test_logging();
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(3)).build().unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    outcome.assert_counts(3, 0, 0);
    assert_output_contains(&fixture.output.contents(), &["Passed!"]);
}

#[tokio::test]
async fn test_exit_failed_for_mixed_run() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::mixed()).build().unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::AtLeastOneTestFailed);
    outcome.assert_counts(2, 1, 1);
    assert_output_contains(
        &fixture.output.contents(),
        &["math::divides", "Assertion failed.", "Failed!"],
    );
}

#[tokio::test]
async fn test_exit_zero_tests() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(0)).build().unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::ZeroTests);
}

#[tokio::test]
async fn test_exit_minimum_expected_tests() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(2))
        .option(names::MINIMUM_EXPECTED_TESTS, ["5"])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::MinimumExpectedTestsPolicyViolation);
    outcome.assert_counts(2, 0, 0);
}

#[tokio::test]
async fn test_exit_failures_outrank_minimum_expected() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::failing(1))
        .option(names::MINIMUM_EXPECTED_TESTS, ["5"])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::AtLeastOneTestFailed);
}

#[tokio::test]
async fn test_exit_maximum_failed_tests() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::failing(8))
        .option(names::MAXIMUM_FAILED_TESTS, ["2"])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::TestExecutionStoppedForMaxFailedTests);
    assert!(outcome.summary.failed >= 2);
}

#[tokio::test]
async fn test_exit_invalid_command_line() {
    let callbacks = RecordingLifecycleCallbacks::new();
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(1))
        .option(names::TIMEOUT, ["1s", "2s"])
        .lifecycle_callbacks(callbacks.clone())
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::InvalidCommandLine);
    assert_eq!(outcome.summary.executed(), 0);
    assert_eq!(callbacks.before_runs(), 0);
    assert_eq!(callbacks.exit_codes(), vec![ExitCode::InvalidCommandLine]);
}

#[tokio::test]
async fn test_exit_help_still_reports_exit_code() {
    let callbacks = RecordingLifecycleCallbacks::new();
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(2))
        .flag(names::HELP)
        .lifecycle_callbacks(callbacks.clone())
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    assert_eq!(outcome.summary.executed(), 0);
    assert_eq!(callbacks.before_runs(), 0);
    assert_eq!(callbacks.exit_codes(), vec![ExitCode::Success]);
}

#[tokio::test]
async fn test_exit_info_still_reports_exit_code() {
    let callbacks = RecordingLifecycleCallbacks::new();
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(2))
        .flag(names::INFO)
        .lifecycle_callbacks(callbacks.clone())
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    assert_eq!(callbacks.exit_codes(), vec![ExitCode::Success]);
}

#[tokio::test]
async fn test_exit_invalid_policy_value() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(1))
        .option(names::MAXIMUM_FAILED_TESTS, ["lots"])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::InvalidCommandLine);
}

#[tokio::test]
async fn test_exit_timeout_counts_as_failure() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::sleeping(Duration::from_secs(30)))
        .default_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), fixture.host.run(TestRunCancellationToken::new()))
        .await
        .expect("timed out test should not hang the run");

    outcome.assert_exit_code(ExitCode::AtLeastOneTestFailed);
    assert_eq!(outcome.summary.timed_out, 1);
    assert_output_contains(&fixture.output.contents(), &["timed out", "suite::sleeps"]);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_host_cancel_mid_run_aborts_session() {
    let handler = RecordingLifetimeHandler::new("session-recorder");
    let extensions = ExtensionSet::new()
        .with_lifetime_handler(handler.clone())
        .with_cleanable(handler.clone());
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::sleeping(Duration::from_secs(30)))
        .extensions(extensions)
        .build()
        .unwrap();

    let token = TestRunCancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let outcome = tokio::time::timeout(Duration::from_secs(10), fixture.host.run(token))
        .await
        .expect("cancelled run should finish promptly");
    canceller.await.unwrap();

    outcome.assert_exit_code(ExitCode::TestSessionAborted);
    assert_eq!(outcome.summary.passed, 0);
    assert_event_count(&handler, LifetimeEvent::Starting, 1);
    assert_event_count(&handler, LifetimeEvent::Finishing, 1);
    assert_event_count(&handler, LifetimeEvent::Cleanup, 1);
    assert_eq!(handler.cancelled_at_finish(), Some(true));
}

// =============================================================================
// Listing / Filtering
// =============================================================================

#[tokio::test]
async fn test_host_list_tests_runs_nothing() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(3))
        .flag(names::LIST_TESTS)
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    assert_eq!(outcome.summary.discovered, 3);
    assert_eq!(outcome.summary.executed(), 0);
}

#[tokio::test]
async fn test_host_filter_selects_tests() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::mixed())
        .option(names::FILTER, ["math::add*|math::multiplies"])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    outcome.assert_counts(2, 0, 0);
}

#[tokio::test]
async fn test_host_queued_delivery_matches_awaited() {
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::mixed())
        .queued()
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::AtLeastOneTestFailed);
    outcome.assert_counts(2, 1, 1);
}

// =============================================================================
// Lifecycle Callbacks
// =============================================================================

#[tokio::test]
async fn test_host_lifecycle_callbacks_see_exit_code() {
    let callbacks = RecordingLifecycleCallbacks::new();
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::mixed())
        .lifecycle_callbacks(callbacks.clone())
        .build()
        .unwrap();

    fixture.host.run(TestRunCancellationToken::new()).await;

    assert_eq!(callbacks.before_runs(), 1);
    assert_eq!(callbacks.exit_codes(), vec![ExitCode::AtLeastOneTestFailed]);
}

#[tokio::test]
async fn test_host_consumer_extension_sees_every_result() {
    let recorder = RecordingConsumer::new("results");
    let disabled = RecordingConsumer::disabled("muted");
    let extensions = ExtensionSet::new()
        .with_consumer(recorder.clone())
        .with_consumer(disabled.clone());
    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::mixed())
        .extensions(extensions)
        .build()
        .unwrap();

    fixture.host.run(TestRunCancellationToken::new()).await;

    assert_eq!(
        recorder.states_for("math::divides").last(),
        Some(&StateKind::Failed)
    );
    assert_eq!(
        recorder.states_for("math::slow").last(),
        Some(&StateKind::Skipped)
    );
    assert_call_count(&disabled, 0);
}

// =============================================================================
// Extension Activation
// =============================================================================

#[tokio::test]
async fn test_extension_registry_activates_factories() {
    let recorder = RecordingConsumer::new("trx-report");
    let mut registry = ExtensionRegistry::new();
    {
        let recorder = recorder.clone();
        registry.register_fn("trx-report", move |_ctx| {
            Ok(ExtensionSet::new().with_consumer(recorder.clone()))
        });
    }
    registry.register_fn("unused", |_ctx| Err(ExtensionError::creation_failed("unused", "never activated")));

    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(2))
        .registry(registry, vec!["trx-report".to_string()])
        .build()
        .unwrap();

    let outcome = fixture.host.run(TestRunCancellationToken::new()).await;

    outcome.assert_exit_code(ExitCode::Success);
    assert!(recorder.call_count() >= 2);
}

#[tokio::test]
async fn test_extension_missing_factory_fails_build() {
    let result = TestHostFixtureBuilder::new(RegistryFixtures::passing(1))
        .registry(ExtensionRegistry::new(), vec!["hang-dump".to_string()])
        .build();

    match result {
        Err(VigilError::Extension(ExtensionError::NotRegistered { uid })) => assert_eq!(uid, "hang-dump"),
        Err(other) => panic!("Expected NotRegistered, got {:?}", other),
        Ok(_) => panic!("Expected the build to fail"),
    }
}

#[tokio::test]
async fn test_extension_factory_sees_options() {
    let seen = Arc::new(parking_lot::Mutex::new(None));
    let mut registry = ExtensionRegistry::new();
    {
        let seen = seen.clone();
        registry.register_fn("probe", move |ctx| {
            *seen.lock() = ctx.options.get_single(names::RESULTS_DIRECTORY).map(String::from);
            Ok(ExtensionSet::new())
        });
    }

    let fixture = TestHostFixtureBuilder::new(RegistryFixtures::passing(1))
        .option(names::RESULTS_DIRECTORY, ["out"])
        .registry(registry, vec!["probe".to_string()])
        .build()
        .unwrap();

    assert_eq!(seen.lock().as_deref(), Some("out"));
    assert_eq!(fixture.host.run(TestRunCancellationToken::new()).await.exit_code, ExitCode::Success);
}
