// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Builders for test nodes and for in-process hosts whose console output
//! is captured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use vigil_core::{
    CapturedOutput, CommandLineOptions, ConsoleOutputDevice, DeliveryMode, ExceptionInfo, ExecutorConfig,
    ExtensionRegistry, ExtensionSet, HostSettings, Property, RegistrationTableFramework,
    TestApplicationLifecycleCallbacks, TestHost, TestNode, TestNodeStateProperty, TestRegistry, TimingProperty,
};
use vigil_core::property::FileArtifactProperty;

// =============================================================================
// TestNode Builder
// =============================================================================

/// Builder for [`TestNode`] snapshots.
#[derive(Debug, Clone)]
pub struct TestNodeBuilder {
    uid: String,
    display_name: Option<String>,
    state: TestNodeStateProperty,
    properties: Vec<Property>,
}

impl TestNodeBuilder {
    /// Starts a discovered node.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            state: TestNodeStateProperty::Discovered,
            properties: Vec::new(),
        }
    }

    /// Sets the display name; defaults to the uid.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the state.
    pub fn state(mut self, state: TestNodeStateProperty) -> Self {
        self.state = state;
        self
    }

    /// Marks the node passed.
    pub fn passed(self) -> Self {
        self.state(TestNodeStateProperty::passed())
    }

    /// Marks the node failed with `message`.
    pub fn failed(self, message: impl Into<String>) -> Self {
        self.state(TestNodeStateProperty::failed_with(ExceptionInfo::new(message)))
    }

    /// Adds a category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.properties.push(Property::Category(category.into()));
        self
    }

    /// Adds captured standard output.
    pub fn stdout(mut self, text: impl Into<String>) -> Self {
        self.properties.push(Property::StandardOutput(text.into()));
        self
    }

    /// Adds a timing property ending now.
    pub fn took(mut self, duration: Duration) -> Self {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(duration).unwrap_or_default();
        self.properties.push(Property::Timing(TimingProperty::new(start, end)));
        self
    }

    /// Adds a file artifact.
    pub fn artifact(mut self, path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        self.properties.push(Property::FileArtifact(FileArtifactProperty {
            path: path.into(),
            display_name: display_name.into(),
            description: None,
        }));
        self
    }

    /// Builds the node.
    pub fn build(self) -> TestNode {
        let display_name = self.display_name.unwrap_or_else(|| self.uid.clone());
        let mut node = TestNode::new(self.uid, display_name, self.state);
        node.properties.extend(self.properties);
        node
    }
}

// =============================================================================
// Host Builder
// =============================================================================

/// A host plus the buffer its console writes into.
pub struct CapturedHost {
    /// The host.
    pub host: TestHost,
    /// Console output.
    pub output: CapturedOutput,
}

/// Builder for in-process hosts with captured console output.
pub struct TestHostFixtureBuilder {
    tests: TestRegistry,
    options: CommandLineOptions,
    settings: HostSettings,
    executor: ExecutorConfig,
    extensions: ExtensionSet,
    registry: Option<(ExtensionRegistry, Vec<String>)>,
    callbacks: Vec<Arc<dyn TestApplicationLifecycleCallbacks>>,
}

impl TestHostFixtureBuilder {
    /// Starts a builder over `tests`, without a banner.
    pub fn new(tests: TestRegistry) -> Self {
        Self {
            tests,
            options: CommandLineOptions::new().with("no-banner", Vec::<String>::new()),
            settings: HostSettings::default(),
            executor: ExecutorConfig {
                worker_count: 2,
                default_timeout: None,
            },
            extensions: ExtensionSet::new(),
            registry: None,
            callbacks: Vec::new(),
        }
    }

    /// Adds command-line options.
    pub fn option<I, S>(mut self, name: &str, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.with(name, arguments);
        self
    }

    /// Sets a flag option.
    pub fn flag(self, name: &str) -> Self {
        self.option(name, Vec::<String>::new())
    }

    /// Uses queued delivery.
    pub fn queued(mut self) -> Self {
        self.settings.delivery = DeliveryMode::Queued;
        self
    }

    /// Sets the default per-test timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.executor.default_timeout = Some(timeout);
        self
    }

    /// Adds extensions.
    pub fn extensions(mut self, extensions: ExtensionSet) -> Self {
        self.extensions.merge(extensions);
        self
    }

    /// Sets the extension registration table and the uids to activate.
    pub fn registry(mut self, registry: ExtensionRegistry, activate: Vec<String>) -> Self {
        self.registry = Some((registry, activate));
        self
    }

    /// Adds run lifecycle callbacks.
    pub fn lifecycle_callbacks(mut self, callbacks: Arc<dyn TestApplicationLifecycleCallbacks>) -> Self {
        self.callbacks.push(callbacks);
        self
    }

    /// Builds the host.
    pub fn build(self) -> vigil_core::VigilResult<CapturedHost> {
        let output = CapturedOutput::new();
        let console = Arc::new(ConsoleOutputDevice::new(output.clone()).with_show_passed(self.settings.show_passed));
        let framework = Arc::new(RegistrationTableFramework::new(self.tests, self.executor));

        let mut builder = TestHost::builder(framework)
            .options(self.options)
            .settings(self.settings)
            .console(console)
            .extensions(self.extensions);
        if let Some((registry, activate)) = self.registry {
            builder = builder.registry(registry, activate);
        }
        for callbacks in self.callbacks {
            builder = builder.lifecycle_callbacks(callbacks);
        }

        Ok(CapturedHost {
            host: builder.build()?,
            output,
        })
    }
}
