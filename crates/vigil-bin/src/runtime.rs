// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Test application orchestration.
//!
//! A [`TestApplication`] owns what a test binary registers (tests, extension
//! factories, lifecycle callbacks) plus the loaded configuration, and turns
//! them into a [`TestHost`] run:
//!
//! - Configuration mapped onto executor and host settings
//! - Registered extension factories activated per `extensions:`
//! - In `--server` mode, an IPC connection to the runner with an
//!   [`IpcReporter`] attached to the bus, the session and the run lifecycle

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use vigil_config::{TransportKind, VigilConfig};
use vigil_core::command_line::names;
use vigil_core::{
    CommandLineOptions, CommandLineValidator, DeliveryMode, ExecutionId, ExecutorConfig,
    ExtensionRegistry, HostSettings, RegistrationTableFramework, TestApplicationLifecycleCallbacks,
    TestHost, TestHostBuilder, TestRegistry, TestRunCancellationToken, TestRunOutcome,
};
use vigil_ipc::{HandshakeInfo, IpcClient, IpcClientConfig, IpcEndpoint, IpcReporter};

use crate::error::{BinError, BinResult};

/// Host type advertised in the handshake.
pub const HOST_TYPE: &str = "testhost";

// =============================================================================
// TestApplication
// =============================================================================

/// Everything a test binary registers, ready to run.
pub struct TestApplication {
    tests: TestRegistry,
    extensions: ExtensionRegistry,
    callbacks: Vec<Arc<dyn TestApplicationLifecycleCallbacks>>,
    config: VigilConfig,
}

impl TestApplication {
    /// Creates an application over a test registration table.
    pub fn new(tests: TestRegistry) -> Self {
        Self {
            tests,
            extensions: ExtensionRegistry::new(),
            callbacks: Vec::new(),
            config: VigilConfig::default(),
        }
    }

    /// Sets the extension registration table.
    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    /// Adds run lifecycle callbacks.
    pub fn with_lifecycle_callbacks(mut self, callbacks: Arc<dyn TestApplicationLifecycleCallbacks>) -> Self {
        self.callbacks.push(callbacks);
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: VigilConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// Returns the number of registered tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Effective results directory: `--results-directory`, then config.
    pub fn results_directory(&self, options: &CommandLineOptions) -> PathBuf {
        options
            .get_single(names::RESULTS_DIRECTORY)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.platform.results_directory.clone())
    }

    fn executor_config(&self) -> ExecutorConfig {
        let platform = &self.config.platform;
        let mut config = ExecutorConfig::default();
        if let Some(workers) = platform.worker_count {
            config.worker_count = workers;
        }
        config.default_timeout = platform.test_timeout;
        config
    }

    fn host_settings(&self) -> HostSettings {
        let platform = &self.config.platform;
        HostSettings {
            delivery: match platform.delivery {
                vigil_config::DeliveryMode::Awaited => DeliveryMode::Awaited,
                vigil_config::DeliveryMode::Queued => DeliveryMode::Queued,
            },
            show_passed: platform.show_passed,
            banner: platform.banner.clone(),
            minimum_expected_tests: platform.minimum_expected_tests,
            maximum_failed_tests: platform.maximum_failed_tests,
        }
    }

    fn host_builder(self, options: CommandLineOptions, execution_id: ExecutionId) -> TestHostBuilder {
        let framework = Arc::new(RegistrationTableFramework::new(
            self.tests.clone(),
            self.executor_config(),
        ));
        let settings = self.host_settings();
        let activate = self.config.enabled_extensions();

        let mut builder = TestHost::builder(framework)
            .options(options)
            .settings(settings)
            .registry(self.extensions, activate)
            .execution_id(execution_id);
        for callbacks in self.callbacks {
            builder = builder.lifecycle_callbacks(callbacks);
        }
        builder
    }

    /// Builds a standalone host, without IPC.
    ///
    /// # Errors
    ///
    /// Returns `BinError::Core` if an activated extension factory is missing
    /// or fails.
    pub fn build_host(self, options: CommandLineOptions, execution_id: ExecutionId) -> BinResult<TestHost> {
        Ok(self.host_builder(options, execution_id).build()?)
    }

    /// Runs the tests.
    ///
    /// With `--server`, connects to the runner first; a failed connection or
    /// handshake is an error rather than a test outcome.
    pub async fn run(
        self,
        options: CommandLineOptions,
        execution_id: ExecutionId,
        cancellation: TestRunCancellationToken,
    ) -> BinResult<TestRunOutcome> {
        info!(
            execution_id = %execution_id,
            tests = self.test_count(),
            "Starting test application v{}",
            vigil_core::VERSION
        );

        let reporter = if options.is_option_set(names::SERVER) {
            Some(self.connect_reporter(&options, &execution_id).await?)
        } else {
            None
        };

        let mut builder = self.host_builder(options, execution_id);
        if let Some(ref reporter) = reporter {
            builder = builder
                .extensions(reporter.extension_set())
                .lifecycle_callbacks(reporter.clone());
        }
        let host = builder.build()?;

        if let Some(ref reporter) = reporter {
            let validator = CommandLineValidator::new(host.option_providers());
            if let Err(e) = reporter.report_command_line_options(&validator.options()).await {
                warn!(error = %e, "Failed to report command-line options");
            }
        }

        let outcome = host.run(cancellation).await;
        info!(exit_code = outcome.exit_code.code(), "Test application finished");
        Ok(outcome)
    }

    async fn connect_reporter(
        &self,
        options: &CommandLineOptions,
        execution_id: &ExecutionId,
    ) -> BinResult<Arc<IpcReporter>> {
        let endpoint = self.runner_endpoint(options)?;
        let ipc = &self.config.ipc;
        let client_config = IpcClientConfig {
            connect_timeout: ipc.connect_timeout,
            request_timeout: ipc.request_timeout,
            max_frame_size: ipc.max_frame_size as usize,
        };

        info!(endpoint = %endpoint, "Connecting to test runner");
        let local = HandshakeInfo::local(HOST_TYPE, Some(execution_id.as_str()));
        let client = IpcClient::connect(&endpoint, local, client_config)
            .await
            .map_err(|e| BinError::from(e).with_context(format!("connecting to {}", endpoint)))?;

        Ok(IpcReporter::new(Arc::new(client), execution_id.clone()))
    }

    /// Resolves the runner endpoint: `--client-socket`, then
    /// `--client-host`/`--client-port`, then the `ipc` config section.
    pub fn runner_endpoint(&self, options: &CommandLineOptions) -> BinResult<IpcEndpoint> {
        if let Some(socket) = options.get_single(names::CLIENT_SOCKET) {
            return Ok(IpcEndpoint::unix(socket));
        }

        let ipc = &self.config.ipc;
        let cli_tcp = options.is_option_set(names::CLIENT_HOST) || options.is_option_set(names::CLIENT_PORT);
        if !cli_tcp && ipc.transport == TransportKind::Unix {
            if let Some(ref path) = ipc.socket_path {
                return Ok(IpcEndpoint::unix(path.clone()));
            }
        }

        let host = options
            .get_single(names::CLIENT_HOST)
            .map(String::from)
            .unwrap_or_else(|| ipc.host.clone());
        let port = options
            .parse_single::<u16>(names::CLIENT_PORT)?
            .unwrap_or(ipc.port);
        if port == 0 {
            return Err(BinError::config(
                "--server needs --client-port, --client-socket or ipc.port in the configuration",
            ));
        }
        Ok(IpcEndpoint::tcp(host, port))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_core::{Assert, ExitCode};

    fn passing_registry() -> TestRegistry {
        let mut tests = TestRegistry::new();
        tests.test("math::adds", |_| async { Assert::are_equal(4, 2 + 2) }).unwrap();
        tests
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = VigilConfig::default();
        config.platform.worker_count = Some(3);
        config.platform.test_timeout = Some(Duration::from_secs(9));
        config.platform.delivery = vigil_config::DeliveryMode::Queued;
        config.platform.show_passed = false;

        let app = TestApplication::new(TestRegistry::new()).with_config(config);
        let executor = app.executor_config();
        assert_eq!(executor.worker_count, 3);
        assert_eq!(executor.default_timeout, Some(Duration::from_secs(9)));

        let settings = app.host_settings();
        assert_eq!(settings.delivery, DeliveryMode::Queued);
        assert!(!settings.show_passed);
    }

    #[test]
    fn test_runner_endpoint_resolution() {
        let app = TestApplication::new(TestRegistry::new());

        let options = CommandLineOptions::new().with("client-port", ["9000"]);
        assert_eq!(app.runner_endpoint(&options).unwrap(), IpcEndpoint::tcp("127.0.0.1", 9000));

        let options = CommandLineOptions::new().with("client-socket", ["/tmp/runner.sock"]);
        assert_eq!(app.runner_endpoint(&options).unwrap(), IpcEndpoint::unix("/tmp/runner.sock"));

        assert!(app.runner_endpoint(&CommandLineOptions::new()).is_err());
    }

    #[test]
    fn test_results_directory_prefers_option() {
        let app = TestApplication::new(TestRegistry::new());
        let options = CommandLineOptions::new().with("results-directory", ["out"]);
        assert_eq!(app.results_directory(&options), PathBuf::from("out"));
        assert_eq!(
            app.results_directory(&CommandLineOptions::new()),
            PathBuf::from(vigil_config::schema::DEFAULT_RESULTS_DIRECTORY)
        );
    }

    #[tokio::test]
    async fn test_standalone_run() {
        let app = TestApplication::new(passing_registry());
        let options = CommandLineOptions::new().with("no-banner", Vec::<String>::new());
        let outcome = app
            .run(options, ExecutionId::generate(), TestRunCancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, ExitCode::Success);
        assert_eq!(outcome.summary.passed, 1);
    }

    #[tokio::test]
    async fn test_missing_extension_is_setup_error() {
        let mut config = VigilConfig::default();
        config.extensions.push(vigil_config::ExtensionEntry::new("not-registered"));
        let app = TestApplication::new(passing_registry()).with_config(config);

        let err = app
            .run(CommandLineOptions::new(), ExecutionId::generate(), TestRunCancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::InvalidPlatformSetup);
    }

    #[tokio::test]
    async fn test_server_mode_without_runner_fails() {
        let mut config = VigilConfig::default();
        config.ipc.connect_timeout = Duration::from_millis(200);
        let app = TestApplication::new(passing_registry()).with_config(config);

        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let options = CommandLineOptions::new()
            .with("server", Vec::<String>::new())
            .with("client-port", [port.to_string()]);

        let err = app
            .run(options, ExecutionId::generate(), TestRunCancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), ExitCode::GenericFailure);
    }
}
