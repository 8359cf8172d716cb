// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Executes the test registration table.
//!
//! [`RegistrationTableFramework`] is the built-in [`TestFramework`]. It runs
//! registered cases as concurrent tokio tasks bounded by a semaphore and
//! publishes an `InProgress` update followed by exactly one final update per
//! started case.
//!
//! # Execution Flow
//!
//! ```text
//!  for each matching case:
//!     stop requested? ───────────────► stop scheduling (unstarted cases not reported)
//!     run cancelled?  ───────────────► report Cancelled for every unstarted case
//!     ignored?        ───────────────► report Skipped
//!     acquire worker permit
//!     spawn ──► InProgress ──► body (child token, timeout, catch_unwind) ──► final state
//! ```

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::bus::{panic_message, DataProducer, MessageBus};
use crate::cancellation::{GracefulStopToken, TestRunCancellationToken};
use crate::capability::{Capabilities, Capability, GracefulStopCapability};
use crate::command_line::names;
use crate::error::{VigilError, VigilResult};
use crate::extension::{Extension, ExtensionInfo};
use crate::framework::{
    CloseTestSessionResult, CreateTestSessionResult, ExecuteRequestContext, TestExecutionRequest,
    TestFramework, TestSessionResult,
};
use crate::message::{BusMessage, DataKind};
use crate::node::TestNode;
use crate::property::{ExceptionInfo, Property, TestNodeStateProperty, TimingProperty};
use crate::session::TestSessionContext;
use crate::testing::{TestCase, TestContext, TestRegistry};
use crate::types::SessionUid;

// =============================================================================
// Configuration
// =============================================================================

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of concurrently running cases.
    pub worker_count: usize,
    /// Timeout for cases without their own; `--timeout` overrides it.
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            default_timeout: None,
        }
    }
}

// =============================================================================
// Producer Identity
// =============================================================================

const PRODUCED: &[DataKind] = &[DataKind::TestNodeUpdate, DataKind::SessionFileArtifact];

/// Identity the framework publishes under; shared with spawned case tasks.
#[derive(Debug)]
struct Publisher {
    info: ExtensionInfo,
}

impl Extension for Publisher {
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
}

impl DataProducer for Publisher {
    fn data_types_produced(&self) -> &[DataKind] {
        PRODUCED
    }
}

impl Publisher {
    async fn publish(&self, bus: &MessageBus, session: &SessionUid, node: TestNode) {
        let uid = node.uid.clone();
        if let Err(e) = bus
            .publish(self, BusMessage::node_update(session.clone(), node, None))
            .await
        {
            warn!(test = %uid, error = %e, error_type = e.error_type(), "Failed to publish test node update");
        }
    }
}

// =============================================================================
// Graceful Stop
// =============================================================================

struct GracefulStop(GracefulStopToken);

#[async_trait]
impl GracefulStopCapability for GracefulStop {
    async fn stop_test_execution(&self) -> bool {
        self.0.request_stop()
    }
}

// =============================================================================
// RegistrationTableFramework
// =============================================================================

/// Runs the cases of a [`TestRegistry`].
pub struct RegistrationTableFramework {
    publisher: Arc<Publisher>,
    registry: Arc<TestRegistry>,
    config: ExecutorConfig,
    stop: GracefulStopToken,
}

impl RegistrationTableFramework {
    /// Uid of the built-in framework.
    pub const UID: &'static str = "registration-table";

    /// Creates a framework over a registry.
    pub fn new(registry: TestRegistry, config: ExecutorConfig) -> Self {
        Self {
            publisher: Arc::new(Publisher {
                info: ExtensionInfo::builtin(
                    Self::UID,
                    "Registration table",
                    "Runs tests registered in a TestRegistry",
                ),
            }),
            registry: Arc::new(registry),
            config,
            stop: GracefulStopToken::new(),
        }
    }

    /// Returns the registry.
    pub fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Returns the framework's graceful stop token.
    pub fn stop_token(&self) -> &GracefulStopToken {
        &self.stop
    }

    fn matching_cases(&self, request: &TestExecutionRequest) -> Vec<TestCase> {
        self.registry
            .iter()
            .filter(|case| match request.filter() {
                Some(filter) => filter.matches(&case.uid(), case.categories.iter().map(String::as_str)),
                None => true,
            })
            .cloned()
            .collect()
    }

    async fn discover(&self, bus: &MessageBus, session: &SessionUid, cases: Vec<TestCase>) {
        for case in cases {
            self.publisher
                .publish(bus, session, base_node(&case, TestNodeStateProperty::Discovered))
                .await;
        }
    }

    async fn run(
        &self,
        bus: &MessageBus,
        session: &TestSessionContext,
        default_timeout: Option<Duration>,
        cases: Vec<TestCase>,
    ) {
        let token = &session.cancellation;
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count.max(1)));
        let mut handles = Vec::new();
        let mut pending = cases.into_iter();

        while let Some(case) = pending.next() {
            if self.stop.is_stop_requested() {
                info!("Graceful stop requested; no further tests will start");
                break;
            }
            if token.is_cancellation_requested() {
                self.report_cancelled(bus, &session.session_uid, std::iter::once(case).chain(pending))
                    .await;
                break;
            }

            if let Some(reason) = &case.ignore_reason {
                let node = base_node(&case, TestNodeStateProperty::skipped(Some(reason.clone())));
                self.publisher.publish(bus, &session.session_uid, node).await;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                _ = self.stop.stopped() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                if token.is_cancellation_requested() {
                    self.report_cancelled(bus, &session.session_uid, std::iter::once(case).chain(pending))
                        .await;
                } else {
                    info!("Graceful stop requested; no further tests will start");
                }
                break;
            };

            handles.push(tokio::spawn(run_case(
                self.publisher.clone(),
                bus.clone(),
                session.session_uid.clone(),
                token.child_token(),
                case,
                default_timeout,
                permit,
            )));
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Test task terminated abnormally");
            }
        }
    }

    async fn report_cancelled(
        &self,
        bus: &MessageBus,
        session: &SessionUid,
        cases: impl Iterator<Item = TestCase>,
    ) {
        for case in cases {
            self.publisher
                .publish(bus, session, base_node(&case, TestNodeStateProperty::cancelled()))
                .await;
        }
    }
}

fn base_node(case: &TestCase, state: TestNodeStateProperty) -> TestNode {
    case.categories.iter().fold(
        TestNode::new(case.uid(), case.display_name.clone(), state),
        |node, category| node.with_property(Property::Category(category.clone())),
    )
}

enum CaseOutcome {
    Completed(TestNodeStateProperty),
    TimedOut(Duration),
}

async fn run_case(
    publisher: Arc<Publisher>,
    bus: MessageBus,
    session: SessionUid,
    token: TestRunCancellationToken,
    case: TestCase,
    default_timeout: Option<Duration>,
    _permit: OwnedSemaphorePermit,
) {
    // Work the test left running on its token stops once the case settles.
    let _guard = token.drop_guard();
    let node = base_node(&case, TestNodeStateProperty::InProgress);
    publisher.publish(&bus, &session, node.clone()).await;

    let started = Utc::now();
    let context = TestContext::new(case.uid(), token.clone());
    let body = AssertUnwindSafe(case.invoke(context.clone())).catch_unwind().map(|result| match result {
        Ok(Ok(())) => TestNodeStateProperty::passed(),
        Ok(Err(failure)) => failure.into_state(),
        Err(panic) => TestNodeStateProperty::failed_with(
            ExceptionInfo::new(panic_message(panic.as_ref())).with_type_name("panic"),
        ),
    });

    let outcome = match case.timeout.or(default_timeout) {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(state) => CaseOutcome::Completed(state),
            Err(_) => CaseOutcome::TimedOut(limit),
        },
        None => CaseOutcome::Completed(body.await),
    };

    let state = match outcome {
        CaseOutcome::Completed(state) => state,
        CaseOutcome::TimedOut(limit) => {
            token.cancel();
            warn!(test = %case.name, timeout = ?limit, "Test timed out");
            TestNodeStateProperty::timeout(limit)
        }
    };

    debug!(test = %case.name, state = %state.kind(), "Test completed");
    let mut done = node
        .transition(state)
        .with_property(Property::Timing(TimingProperty::new(started, Utc::now())));
    done.properties.extend(context.take_properties());
    publisher.publish(&bus, &session, done).await;
}

impl Extension for RegistrationTableFramework {
    fn uid(&self) -> &str {
        self.publisher.uid()
    }
    fn version(&self) -> &str {
        self.publisher.version()
    }
    fn display_name(&self) -> &str {
        self.publisher.display_name()
    }
    fn description(&self) -> &str {
        self.publisher.description()
    }
}

impl DataProducer for RegistrationTableFramework {
    fn data_types_produced(&self) -> &[DataKind] {
        PRODUCED
    }
}

#[async_trait]
impl TestFramework for RegistrationTableFramework {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with(Capability::GracefulStop(Arc::new(GracefulStop(self.stop.clone()))))
    }

    async fn create_test_session(&self, context: &TestSessionContext) -> CreateTestSessionResult {
        debug!(session = %context.session_uid, tests = self.registry.len(), "Framework session created");
        TestSessionResult::success()
    }

    async fn execute_request(&self, context: ExecuteRequestContext) -> VigilResult<()> {
        let cases = self.matching_cases(&context.request);
        let session = &context.session;

        match &context.request {
            TestExecutionRequest::Discover { .. } => {
                info!(session = %session.session_uid, tests = cases.len(), "Discovering tests");
                self.discover(&context.bus, &session.session_uid, cases).await;
            }
            TestExecutionRequest::Run { .. } => {
                let default_timeout = context
                    .options
                    .parse_duration(names::TIMEOUT)
                    .map_err(VigilError::from)?
                    .or(self.config.default_timeout);
                info!(
                    session = %session.session_uid,
                    tests = cases.len(),
                    workers = self.config.worker_count,
                    "Running tests"
                );
                self.run(&context.bus, session, default_timeout, cases).await;
            }
        }
        Ok(())
    }

    async fn close_test_session(&self, context: &TestSessionContext) -> CloseTestSessionResult {
        debug!(session = %context.session_uid, "Framework session closed");
        TestSessionResult::success()
    }
}

impl fmt::Debug for RegistrationTableFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationTableFramework")
            .field("tests", &self.registry.len())
            .field("config", &self.config)
            .field("stop", &self.stop)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{DataConsumer, ProducerInfo};
    use crate::command_line::CommandLineOptions;
    use crate::error::HandlerError;
    use crate::framework::TestNodeFilter;
    use crate::property::StateKind;
    use crate::testing::Assert;
    use crate::types::ExecutionId;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collector(Mutex<Vec<(String, StateKind)>>);

    impl Extension for Collector {
        fn uid(&self) -> &str {
            "collector"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn display_name(&self) -> &str {
            "Collector"
        }
        fn description(&self) -> &str {
            ""
        }
    }

    #[async_trait]
    impl DataConsumer for Collector {
        fn data_types_consumed(&self) -> &[DataKind] {
            &[DataKind::TestNodeUpdate]
        }

        async fn consume(
            &self,
            _: &ProducerInfo,
            message: &BusMessage,
            _: &TestRunCancellationToken,
        ) -> Result<(), HandlerError> {
            if let Some(update) = message.as_node_update() {
                self.0
                    .lock()
                    .push((update.test_node.uid.to_string(), update.test_node.state_kind()));
            }
            Ok(())
        }
    }

    impl Collector {
        fn final_state(&self, uid: &str) -> Option<StateKind> {
            self.0
                .lock()
                .iter()
                .rev()
                .find(|(u, _)| u == uid)
                .map(|(_, s)| *s)
        }
    }

    async fn execute(
        framework: &RegistrationTableFramework,
        request: TestExecutionRequest,
        token: TestRunCancellationToken,
    ) -> Arc<Collector> {
        let collector = Arc::new(Collector::default());
        let bus = MessageBus::builder().register_consumer(collector.clone()).build();
        let context = ExecuteRequestContext {
            request,
            session: TestSessionContext {
                session_uid: SessionUid::new("s"),
                execution_id: ExecutionId::new("e"),
                cancellation: token,
            },
            bus: bus.clone(),
            options: Arc::new(CommandLineOptions::new()),
        };
        framework.execute_request(context).await.unwrap();
        bus.drain().await.unwrap();
        collector
    }

    fn explode() -> crate::testing::TestOutcome {
        panic!("kaboom")
    }

    fn registry() -> TestRegistry {
        let mut registry = TestRegistry::new();
        registry
            .test("math.adds", |_| async { Assert::are_equal(4, 2 + 2) })
            .unwrap()
            .test("math.fails", |_| async { Assert::fail("Assertion failed.") })
            .unwrap()
            .test("math.panics", |_| async { explode() })
            .unwrap();
        registry
            .register(TestCase::new("net.slow", |_| async { Ok(()) }).ignore("needs network"))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_run_reports_in_progress_then_final() {
        let framework = RegistrationTableFramework::new(registry(), ExecutorConfig::default());
        let collector = execute(&framework, TestExecutionRequest::Run { filter: None }, TestRunCancellationToken::new()).await;

        assert_eq!(collector.final_state("math.adds"), Some(StateKind::Passed));
        assert_eq!(collector.final_state("math.fails"), Some(StateKind::Failed));
        assert_eq!(collector.final_state("math.panics"), Some(StateKind::Failed));
        assert_eq!(collector.final_state("net.slow"), Some(StateKind::Skipped));

        let adds: Vec<_> = collector
            .0
            .lock()
            .iter()
            .filter(|(u, _)| u == "math.adds")
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(adds, vec![StateKind::InProgress, StateKind::Passed]);
    }

    #[tokio::test]
    async fn test_case_token_cancelled_after_completion() {
        let captured: Arc<Mutex<Option<TestRunCancellationToken>>> = Arc::default();
        let mut registry = TestRegistry::new();
        {
            let captured = captured.clone();
            registry
                .test("bg.spawns", move |ctx| {
                    let captured = captured.clone();
                    async move {
                        *captured.lock() = Some(ctx.cancellation().clone());
                        Ok(())
                    }
                })
                .unwrap();
        }
        let framework = RegistrationTableFramework::new(registry, ExecutorConfig::default());
        let run_token = TestRunCancellationToken::new();

        let collector = execute(&framework, TestExecutionRequest::Run { filter: None }, run_token.clone()).await;

        assert_eq!(collector.final_state("bg.spawns"), Some(StateKind::Passed));
        let case_token = captured.lock().clone().unwrap();
        assert!(case_token.is_cancellation_requested());
        assert!(!run_token.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_discover_with_filter() {
        let framework = RegistrationTableFramework::new(registry(), ExecutorConfig::default());
        let request = TestExecutionRequest::Discover {
            filter: Some(TestNodeFilter::parse("math.a*|net.*")),
        };
        let collector = execute(&framework, request, TestRunCancellationToken::new()).await;

        let seen = collector.0.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("math.adds".to_string(), StateKind::Discovered),
                ("net.slow".to_string(), StateKind::Discovered)
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_does_not_affect_siblings() {
        let mut registry = TestRegistry::new();
        registry
            .register(
                TestCase::new("slow", |ctx: TestContext| async move {
                    ctx.cancellation().cancelled().await;
                    Ok(())
                })
                .timeout(Duration::from_millis(20)),
            )
            .unwrap()
            .test("fast", |_| async { Ok(()) })
            .unwrap();
        let framework = RegistrationTableFramework::new(
            registry,
            ExecutorConfig {
                worker_count: 2,
                default_timeout: None,
            },
        );
        let token = TestRunCancellationToken::new();
        let collector = execute(&framework, TestExecutionRequest::Run { filter: None }, token.clone()).await;

        assert_eq!(collector.final_state("slow"), Some(StateKind::Timeout));
        assert_eq!(collector.final_state("fast"), Some(StateKind::Passed));
        assert!(!token.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_unstarted_cases() {
        let framework = RegistrationTableFramework::new(registry(), ExecutorConfig::default());
        let token = TestRunCancellationToken::new();
        token.cancel();
        let collector = execute(&framework, TestExecutionRequest::Run { filter: None }, token).await;

        let seen = collector.0.lock().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|(_, s)| *s == StateKind::Cancelled));
    }

    #[tokio::test]
    async fn test_graceful_stop_prevents_new_cases() {
        let framework = RegistrationTableFramework::new(registry(), ExecutorConfig::default());
        let stop = framework.capabilities().graceful_stop().unwrap();
        assert!(stop.stop_test_execution().await);

        let collector = execute(&framework, TestExecutionRequest::Run { filter: None }, TestRunCancellationToken::new()).await;
        assert!(collector.0.lock().is_empty());
    }
}
