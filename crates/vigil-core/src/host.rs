// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The test host: one complete run from command line to exit code.
//!
//! # Run Pipeline
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ TestHost::run                                                      │
//! │                                                                    │
//! │  validate options ─► banner ─► build bus ─► before_run             │
//! │        │                                                           │
//! │        ▼                                                           │
//! │  session.start ─► framework.create ─► execute ─► framework.close   │
//! │        │                                                           │
//! │        ▼                                                           │
//! │  session.finish (drain) ─► session.close ─► bus.shutdown           │
//! │        │                                                           │
//! │        ▼                                                           │
//! │  exit code ─► summary ─► after_run(exit code)                      │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Teardown always runs: cancellation and framework failures skip work,
//! never the finish/close edges of the session.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::bus::{DataConsumer, DeliveryMode, MessageBus, MessageBusConfig};
use crate::cancellation::TestRunCancellationToken;
use crate::capability::CapabilityKind;
use crate::command_line::{
    names, CommandLineOptions, CommandLineOptionsProvider, CommandLineValidator,
    PlatformCommandLineProvider,
};
use crate::error::{HandlerError, SessionError, VigilError, VigilResult};
use crate::exit_code::ExitCode;
use crate::extension::{Extension, ExtensionContext, ExtensionRegistry, ExtensionSet};
use crate::framework::{ExecuteRequestContext, TestExecutionRequest, TestFramework, TestNodeFilter};
use crate::output::{ConsoleOutputDevice, OutputDevice};
use crate::policy::MaximumFailedTestsPolicy;
use crate::session::{SessionCoordinator, TestSessionContext};
use crate::summary::{TestRunSummary, TestRunSummaryConsumer};
use crate::types::ExecutionId;

// =============================================================================
// Lifecycle Callbacks
// =============================================================================

/// Hooks around the whole run, outside the test session.
#[async_trait]
pub trait TestApplicationLifecycleCallbacks: Extension {
    /// Called before the session starts.
    async fn before_run(&self, cancellation: &TestRunCancellationToken) -> Result<(), HandlerError>;

    /// Called last, with the exit code the process will return.
    async fn after_run(
        &self,
        exit_code: ExitCode,
        cancellation: &TestRunCancellationToken,
    ) -> Result<(), HandlerError>;
}

// =============================================================================
// Settings
// =============================================================================

/// Platform settings that are not command-line options.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Bus delivery mode.
    pub delivery: DeliveryMode,
    /// List passed tests on the console.
    pub show_passed: bool,
    /// Banner text; `None` uses the default banner.
    pub banner: Option<String>,
    /// Default for `--minimum-expected-tests`.
    pub minimum_expected_tests: Option<usize>,
    /// Default for `--maximum-failed-tests`.
    pub maximum_failed_tests: Option<usize>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Awaited,
            show_passed: true,
            banner: None,
            minimum_expected_tests: None,
            maximum_failed_tests: None,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    /// The process exit code.
    pub exit_code: ExitCode,
    /// Final node counts.
    pub summary: TestRunSummary,
}

impl TestRunOutcome {
    fn early(exit_code: ExitCode) -> Self {
        Self {
            exit_code,
            summary: TestRunSummary::default(),
        }
    }
}

// =============================================================================
// TestHostBuilder
// =============================================================================

/// Assembles a [`TestHost`].
pub struct TestHostBuilder {
    framework: Arc<dyn TestFramework>,
    options: CommandLineOptions,
    settings: HostSettings,
    extensions: ExtensionSet,
    registry: ExtensionRegistry,
    activated: Vec<String>,
    callbacks: Vec<Arc<dyn TestApplicationLifecycleCallbacks>>,
    console: Option<Arc<ConsoleOutputDevice>>,
    execution_id: Option<ExecutionId>,
}

impl TestHostBuilder {
    /// Creates a builder around a framework.
    pub fn new(framework: Arc<dyn TestFramework>) -> Self {
        Self {
            framework,
            options: CommandLineOptions::new(),
            settings: HostSettings::default(),
            extensions: ExtensionSet::new(),
            registry: ExtensionRegistry::new(),
            activated: Vec::new(),
            callbacks: Vec::new(),
            console: None,
            execution_id: None,
        }
    }

    /// Sets the resolved command-line options.
    pub fn options(mut self, options: CommandLineOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the host settings.
    pub fn settings(mut self, settings: HostSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Adds already-built extension components.
    pub fn extensions(mut self, extensions: ExtensionSet) -> Self {
        self.extensions.merge(extensions);
        self
    }

    /// Sets the extension registration table and the uids to activate.
    pub fn registry(mut self, registry: ExtensionRegistry, activate: Vec<String>) -> Self {
        self.registry = registry;
        self.activated = activate;
        self
    }

    /// Adds run lifecycle callbacks.
    pub fn lifecycle_callbacks(mut self, callbacks: Arc<dyn TestApplicationLifecycleCallbacks>) -> Self {
        self.callbacks.push(callbacks);
        self
    }

    /// Replaces the console device (stdout by default).
    pub fn console(mut self, console: Arc<ConsoleOutputDevice>) -> Self {
        self.console = Some(console);
        self
    }

    /// Sets the execution id (generated by default).
    pub fn execution_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Activates registered extension factories and builds the host.
    ///
    /// # Errors
    ///
    /// Returns `VigilError::Extension` if an activated factory is missing or
    /// fails.
    pub fn build(self) -> VigilResult<TestHost> {
        let execution_id = self.execution_id.unwrap_or_else(ExecutionId::generate);
        let options = Arc::new(self.options);
        let context = ExtensionContext::new(options.clone(), execution_id.clone());

        let mut extensions = self.extensions;
        extensions.merge(
            self.registry
                .create_all(self.activated.iter().map(String::as_str), &context)?,
        );

        let console = self.console.unwrap_or_else(|| {
            Arc::new(ConsoleOutputDevice::stdout().with_show_passed(self.settings.show_passed))
        });

        Ok(TestHost {
            framework: self.framework,
            options,
            settings: self.settings,
            extensions,
            callbacks: self.callbacks,
            console,
            execution_id,
        })
    }
}

impl fmt::Debug for TestHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHostBuilder")
            .field("framework", &self.framework.uid())
            .field("settings", &self.settings)
            .field("activated", &self.activated)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TestHost
// =============================================================================

/// Runs one test session.
pub struct TestHost {
    framework: Arc<dyn TestFramework>,
    options: Arc<CommandLineOptions>,
    settings: HostSettings,
    extensions: ExtensionSet,
    callbacks: Vec<Arc<dyn TestApplicationLifecycleCallbacks>>,
    console: Arc<ConsoleOutputDevice>,
    execution_id: ExecutionId,
}

/// Flags collected while the run progresses, folded into the exit code.
#[derive(Debug, Default)]
struct RunFlags {
    framework_session_failed: bool,
    infrastructure_failed: bool,
    max_failed_stop: bool,
    discovery: bool,
}

impl TestHost {
    /// Creates a builder.
    pub fn builder(framework: Arc<dyn TestFramework>) -> TestHostBuilder {
        TestHostBuilder::new(framework)
    }

    /// Returns the execution id.
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Returns every options provider: the platform's, then the extensions'.
    pub fn option_providers(&self) -> Vec<Arc<dyn CommandLineOptionsProvider>> {
        let mut providers: Vec<Arc<dyn CommandLineOptionsProvider>> =
            vec![Arc::new(PlatformCommandLineProvider::new())];
        providers.extend(self.extensions.option_providers.iter().cloned());
        providers
    }

    fn show(&self, line: &str) {
        if let Err(e) = self.console.display_line(line) {
            warn!(error = %e, "Failed to write to output device");
        }
    }

    fn show_error(&self, message: &str) {
        if let Err(e) = self.console.display_error(message) {
            warn!(error = %e, "Failed to write to output device");
        }
    }

    /// Runs the host to completion.
    pub async fn run(&self, cancellation: TestRunCancellationToken) -> TestRunOutcome {
        let validator = CommandLineValidator::new(self.option_providers());
        if let Err(e) = validator.validate(&self.options) {
            error!(error = %e, "Invalid command line");
            self.show_error(&e.to_string());
            return self.finish_run(TestRunOutcome::early(ExitCode::InvalidCommandLine), &cancellation).await;
        }

        let capabilities = self.framework.capabilities();

        if self.options.is_option_set(names::HELP) {
            self.display_help(&validator, &capabilities);
            return self.finish_run(TestRunOutcome::early(ExitCode::Success), &cancellation).await;
        }
        if self.options.is_option_set(names::INFO) {
            self.display_info(&capabilities);
            return self.finish_run(TestRunOutcome::early(ExitCode::Success), &cancellation).await;
        }

        if !self.options.is_option_set(names::NO_BANNER) {
            let banner = match capabilities.banner_message_owner() {
                Some(owner) => owner.banner_message().await,
                None => Some(self.settings.banner.clone().unwrap_or_else(default_banner)),
            };
            if let Some(banner) = banner {
                if let Err(e) = self.console.display_banner(&banner) {
                    warn!(error = %e, "Failed to display banner");
                }
            }
        }

        let (minimum_expected, maximum_failed) = match self.policy_thresholds() {
            Ok(thresholds) => thresholds,
            Err(e) => {
                self.show_error(&e.to_string());
                return self.finish_run(TestRunOutcome::early(ExitCode::InvalidCommandLine), &cancellation).await;
            }
        };

        // Bus
        let summary = TestRunSummaryConsumer::new();
        let policy = maximum_failed.map(|n| MaximumFailedTestsPolicy::new(n, capabilities.graceful_stop()));
        let mut consumers: Vec<Arc<dyn DataConsumer>> = vec![summary.clone() as Arc<dyn DataConsumer>, self.console.clone()];
        if let Some(policy) = &policy {
            consumers.push(policy.clone());
        }
        consumers.extend(self.extensions.consumers.iter().cloned());

        let bus = MessageBus::builder()
            .config(MessageBusConfig {
                delivery: self.settings.delivery,
            })
            .cancellation(cancellation.clone())
            .register_producer(self.framework.clone())
            .register_consumers(consumers)
            .build();

        let mut flags = RunFlags {
            discovery: self.options.is_option_set(names::LIST_TESTS),
            ..Default::default()
        };

        for callback in &self.callbacks {
            if let Err(e) = callback.before_run(&cancellation).await {
                warn!(extension = callback.uid(), error = %e, "before_run failed");
                self.show_error(&format!("{}: {}", callback.uid(), e));
                flags.infrastructure_failed = true;
            }
        }

        // Session
        let session = SessionCoordinator::new(bus.clone())
            .with_lifetime_handlers(self.extensions.lifetime_handlers.iter().cloned())
            .with_cleanables(self.extensions.cleanables.iter().cloned());

        let started = session.start(self.execution_id.clone(), cancellation.clone()).await;
        let context = match started {
            Ok(context) => Some(context),
            // Handler failures leave the session Running; execution is skipped.
            Err(e @ SessionError::HandlerFailed { .. }) => {
                self.show_error(&e.to_string());
                flags.infrastructure_failed = true;
                None
            }
            Err(e) => {
                error!(error = %e, error_type = e.error_type(), "Session failed to start");
                self.show_error(&e.to_string());
                flags.infrastructure_failed = true;
                None
            }
        };

        if let Some(context) = &context {
            self.execute(&bus, context, &mut flags).await;
        }

        match session.finish().await {
            Ok(report) => {
                for fault in &report.consumer_faults {
                    self.show_error(&fault.to_string());
                }
                for failure in &report.handler_failures {
                    self.show_error(failure);
                }
                if !report.is_clean() {
                    flags.infrastructure_failed = true;
                }
            }
            Err(e) => {
                self.show_error(&e.to_string());
                flags.infrastructure_failed = true;
            }
        }

        if let Err(e) = session.close().await {
            self.show_error(&e.to_string());
            flags.infrastructure_failed = true;
        }
        bus.shutdown().await;

        flags.max_failed_stop = policy.as_ref().is_some_and(|p| p.has_stopped_execution());
        let summary = summary.summary();
        let exit_code = compute_exit_code(&flags, &summary, &cancellation, minimum_expected);

        if let Err(e) = self.console.display_summary(&summary, exit_code) {
            warn!(error = %e, "Failed to display summary");
        }
        info!(exit_code = exit_code.code(), passed = summary.passed, failed = summary.failures(), "Test run completed");

        self.finish_run(TestRunOutcome { exit_code, summary }, &cancellation).await
    }

    async fn execute(&self, bus: &MessageBus, context: &TestSessionContext, flags: &mut RunFlags) {
        let created = self.framework.create_test_session(context).await;
        if !created.is_success {
            let message = created
                .error_message
                .unwrap_or_else(|| "the test framework failed to create its session".to_string());
            error!(error = %message, "Test framework session creation failed");
            self.show_error(&message);
            flags.framework_session_failed = true;
            return;
        }

        let filter = self
            .options
            .get_single(names::FILTER)
            .map(TestNodeFilter::parse);
        let request = if flags.discovery {
            TestExecutionRequest::Discover { filter }
        } else {
            TestExecutionRequest::Run { filter }
        };

        let request_context = ExecuteRequestContext {
            request,
            session: context.clone(),
            bus: bus.clone(),
            options: self.options.clone(),
        };

        match self.framework.execute_request(request_context).await {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => info!("Test execution cancelled"),
            Err(e) => {
                error!(error = %e, error_type = e.error_type(), "Test execution failed");
                self.show_error(&e.to_string());
                flags.infrastructure_failed = true;
            }
        }

        let closed = self.framework.close_test_session(context).await;
        if !closed.is_success {
            let message = closed
                .error_message
                .unwrap_or_else(|| "the test framework failed to close its session".to_string());
            self.show_error(&message);
            flags.framework_session_failed = true;
        }
    }

    async fn finish_run(&self, outcome: TestRunOutcome, cancellation: &TestRunCancellationToken) -> TestRunOutcome {
        for callback in &self.callbacks {
            if let Err(e) = callback.after_run(outcome.exit_code, cancellation).await {
                warn!(extension = callback.uid(), error = %e, "after_run failed");
            }
        }
        outcome
    }

    fn policy_thresholds(&self) -> VigilResult<(Option<usize>, Option<usize>)> {
        let minimum = self
            .options
            .parse_single::<usize>(names::MINIMUM_EXPECTED_TESTS)
            .map_err(VigilError::from)?
            .or(self.settings.minimum_expected_tests);
        let maximum = self
            .options
            .parse_single::<usize>(names::MAXIMUM_FAILED_TESTS)
            .map_err(VigilError::from)?
            .or(self.settings.maximum_failed_tests);
        Ok((minimum, maximum))
    }

    fn display_help(&self, validator: &CommandLineValidator, capabilities: &crate::capability::Capabilities) {
        let options: Vec<_> = validator.options().into_iter().filter(|o| !o.is_hidden).collect();
        if let Some(owner) = capabilities.help_message_owner() {
            if let Some(text) = owner.help_message(&options) {
                self.show(&text);
                return;
            }
        }

        self.show("Usage: [options]");
        self.show("");
        self.show("Options:");
        for option in options {
            self.show(&format!("  --{:<26} {}", option.name, option.description));
        }
    }

    fn display_info(&self, capabilities: &crate::capability::Capabilities) {
        self.show(&default_banner());
        self.show(&format!("Execution id: {}", self.execution_id));
        self.show(&format!(
            "Framework: {} {} ({})",
            self.framework.display_name(),
            self.framework.version(),
            self.framework.uid()
        ));
        for kind in [
            CapabilityKind::GracefulStop,
            CapabilityKind::BannerMessageOwner,
            CapabilityKind::TrxReportEnrichment,
            CapabilityKind::HelpMessageOwner,
        ] {
            let supported = match kind {
                CapabilityKind::TrxReportEnrichment => {
                    capabilities.trx_report().is_some_and(|trx| trx.is_trx_supported())
                }
                other => capabilities.contains(other),
            };
            self.show(&format!("  {}: {}", kind, if supported { "yes" } else { "no" }));
        }

        self.show("Extensions:");
        let consumers = self.extensions.consumers.iter().map(|e| describe(e.as_ref()));
        let handlers = self.extensions.lifetime_handlers.iter().map(|e| describe(e.as_ref()));
        let providers = self.extensions.option_providers.iter().map(|e| describe(e.as_ref()));
        for line in consumers.chain(handlers).chain(providers) {
            self.show(&line);
        }
    }
}

fn describe<E: Extension + ?Sized>(extension: &E) -> String {
    format!(
        "  {} {} ({}): {}",
        extension.display_name(),
        extension.version(),
        extension.uid(),
        extension.description()
    )
}

fn default_banner() -> String {
    format!("{} v{}", crate::NAME, crate::VERSION)
}

/// Folds run flags into an exit code.
///
/// Precedence: framework session failure, infrastructure failure,
/// cancellation, max-failed stop, failures, zero tests, minimum expected.
fn compute_exit_code(
    flags: &RunFlags,
    summary: &TestRunSummary,
    cancellation: &TestRunCancellationToken,
    minimum_expected: Option<usize>,
) -> ExitCode {
    let ran = if flags.discovery {
        summary.discovered
    } else {
        summary.executed()
    };

    if flags.framework_session_failed {
        ExitCode::TestAdapterTestSessionFailure
    } else if flags.infrastructure_failed {
        ExitCode::GenericFailure
    } else if cancellation.is_cancellation_requested() {
        ExitCode::TestSessionAborted
    } else if flags.max_failed_stop {
        ExitCode::TestExecutionStoppedForMaxFailedTests
    } else if summary.failures() > 0 {
        ExitCode::AtLeastOneTestFailed
    } else if ran == 0 {
        ExitCode::ZeroTests
    } else if minimum_expected.is_some_and(|min| ran < min) {
        ExitCode::MinimumExpectedTestsPolicyViolation
    } else {
        ExitCode::Success
    }
}

impl fmt::Debug for TestHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHost")
            .field("framework", &self.framework.uid())
            .field("execution_id", &self.execution_id)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(passed: usize, failed: usize) -> TestRunSummary {
        TestRunSummary {
            total: passed + failed,
            passed,
            failed,
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_code_precedence() {
        let token = TestRunCancellationToken::new();
        let flags = RunFlags::default();

        assert_eq!(compute_exit_code(&flags, &summary(2, 0), &token, None), ExitCode::Success);
        assert_eq!(compute_exit_code(&flags, &summary(1, 1), &token, None), ExitCode::AtLeastOneTestFailed);
        assert_eq!(compute_exit_code(&flags, &summary(0, 0), &token, None), ExitCode::ZeroTests);
        assert_eq!(
            compute_exit_code(&flags, &summary(2, 0), &token, Some(3)),
            ExitCode::MinimumExpectedTestsPolicyViolation
        );

        let stopped = RunFlags {
            max_failed_stop: true,
            ..Default::default()
        };
        assert_eq!(
            compute_exit_code(&stopped, &summary(1, 3), &token, None),
            ExitCode::TestExecutionStoppedForMaxFailedTests
        );

        token.cancel();
        assert_eq!(compute_exit_code(&stopped, &summary(1, 3), &token, None), ExitCode::TestSessionAborted);

        let infrastructure = RunFlags {
            infrastructure_failed: true,
            max_failed_stop: true,
            ..Default::default()
        };
        assert_eq!(
            compute_exit_code(&infrastructure, &summary(1, 3), &token, None),
            ExitCode::GenericFailure
        );

        let adapter = RunFlags {
            framework_session_failed: true,
            infrastructure_failed: true,
            ..Default::default()
        };
        assert_eq!(
            compute_exit_code(&adapter, &summary(0, 0), &token, None),
            ExitCode::TestAdapterTestSessionFailure
        );
    }

    #[test]
    fn test_discovery_counts_discovered_nodes() {
        let flags = RunFlags {
            discovery: true,
            ..Default::default()
        };
        let listed = TestRunSummary {
            total: 3,
            discovered: 3,
            ..Default::default()
        };
        assert_eq!(
            compute_exit_code(&flags, &listed, &TestRunCancellationToken::new(), None),
            ExitCode::Success
        );
    }
}
