// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vigil-core
//!
//! Core of the vigil test platform: the test node data model, the message
//! bus, the test session lifecycle and the extension contract.
//!
//! - **Data model**: `TestNode`, `Property`, `TestNodeStateProperty`
//! - **Bus**: `MessageBus` with per-consumer ordered delivery and drain
//! - **Session**: `SessionCoordinator` state machine and lifetime handlers
//! - **Extensions**: `Extension`, `ExtensionRegistry`, capabilities and
//!   command-line option providers
//! - **Host**: `TestHost`, which runs one session and yields an `ExitCode`
//! - **Framework**: `RegistrationTableFramework`, a registration-table test
//!   framework built on `TestRegistry`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_core::{Assert, ExecutorConfig, RegistrationTableFramework, TestHost, TestRegistry};
//!
//! let mut registry = TestRegistry::new();
//! registry.test("math.adds", |_| async { Assert::are_equal(4, 2 + 2, "sum") })?;
//!
//! let framework = Arc::new(RegistrationTableFramework::new(registry, ExecutorConfig::default()));
//! let host = TestHost::builder(framework).build()?;
//! let outcome = host.run(Default::default()).await;
//! std::process::exit(outcome.exit_code.code());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Data Model
// =============================================================================

pub mod error;
pub mod message;
pub mod node;
pub mod property;
pub mod types;

// =============================================================================
// Runtime
// =============================================================================

pub mod bus;
pub mod cancellation;
pub mod session;

// =============================================================================
// Extension Contract
// =============================================================================

pub mod capability;
pub mod command_line;
pub mod extension;
pub mod framework;

// =============================================================================
// Host
// =============================================================================

pub mod exit_code;
pub mod host;
pub mod output;
pub mod policy;
pub mod summary;

// =============================================================================
// Test Authoring
// =============================================================================

pub mod executor;
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{
    BusStats, DataConsumer, DataProducer, DeliveryMode, MessageBus, MessageBusBuilder,
    MessageBusConfig, ProducerInfo,
};
pub use cancellation::{GracefulStopToken, TestRunCancellationToken};
pub use capability::{
    BannerMessageOwnerCapability, Capabilities, Capability, CapabilityKind,
    GracefulStopCapability, HelpMessageOwnerCapability, TrxReportCapability,
};
pub use command_line::{
    ArgumentArity, CommandLineOption, CommandLineOptions, CommandLineOptionsProvider,
    CommandLineValidator, PlatformCommandLineProvider,
};
pub use error::{
    BusError, BusResult, Cancelled, CommandLineError, ConsumerFault, ExtensionError,
    HandlerError, SessionError, SessionResult, VigilError, VigilResult,
};
pub use executor::{ExecutorConfig, RegistrationTableFramework};
pub use exit_code::ExitCode;
pub use extension::{
    Extension, ExtensionContext, ExtensionFactory, ExtensionInfo, ExtensionRegistry,
    ExtensionSet, FnExtensionFactory,
};
pub use framework::{
    ExecuteRequestContext, TestExecutionRequest, TestFramework, TestNodeFilter, TestSessionResult,
};
pub use host::{HostSettings, TestApplicationLifecycleCallbacks, TestHost, TestHostBuilder, TestRunOutcome};
pub use message::{BusMessage, DataKind, SessionFileArtifactMessage, TestNodeUpdateMessage};
pub use node::TestNode;
pub use output::{CapturedOutput, ConsoleOutputDevice, OutputDevice};
pub use policy::MaximumFailedTestsPolicy;
pub use property::{ExceptionInfo, Property, PropertyBag, StateKind, TestNodeStateProperty, TimingProperty};
pub use session::{
    AsyncCleanableExtension, SessionCoordinator, SessionFinishReport, SessionState,
    TestSessionContext, TestSessionLifetimeHandler,
};
pub use summary::{TestRunSummary, TestRunSummaryConsumer};
pub use testing::{Assert, FailureKind, TestCase, TestContext, TestFailure, TestOutcome, TestRegistry};
pub use types::{ExecutionId, SessionUid, TestNodeUid};

/// Platform name, used in the default banner.
pub const NAME: &str = "vigil";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
