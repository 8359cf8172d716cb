// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Test authoring: the registration table and assertion helpers.
//!
//! Tests are registered explicitly by name instead of being discovered at
//! runtime. Each [`TestCase`] carries an async body returning
//! [`TestOutcome`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::testing::{Assert, TestCase, TestRegistry};
//!
//! let mut registry = TestRegistry::new();
//! registry.register(TestCase::new("math.adds", |_ctx| async {
//!     Assert::are_equal(4, 2 + 2)
//! }))?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::cancellation::TestRunCancellationToken;
use crate::error::ExtensionError;
use crate::property::{ExceptionInfo, FileArtifactProperty, Property, TestNodeStateProperty};
use crate::types::TestNodeUid;

// =============================================================================
// TestOutcome / TestFailure
// =============================================================================

/// Result of a test body.
pub type TestOutcome = Result<(), TestFailure>;

/// Why a test did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// An assertion failed or the body returned an error.
    Failed,
    /// The test could not reach a verdict; reported as skipped.
    Inconclusive,
    /// The test observed cancellation.
    Cancelled,
}

/// A non-passing test outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Failure details.
    pub exception: ExceptionInfo,
}

impl TestFailure {
    /// A failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Failed,
            exception: ExceptionInfo::new(message),
        }
    }

    /// An inconclusive outcome.
    pub fn inconclusive(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Inconclusive,
            exception: ExceptionInfo::new(message),
        }
    }

    /// A cancellation outcome.
    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            exception: ExceptionInfo::new("The test was cancelled"),
        }
    }

    /// Converts the outcome into a node state.
    pub fn into_state(self) -> TestNodeStateProperty {
        match self.kind {
            FailureKind::Failed => TestNodeStateProperty::failed_with(self.exception),
            FailureKind::Inconclusive => TestNodeStateProperty::skipped(Some(self.exception.message)),
            FailureKind::Cancelled => TestNodeStateProperty::Cancelled {
                explanation: None,
                exception: Some(self.exception),
            },
        }
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exception.message)
    }
}

/// Errors returned with `?` from a test body become failures.
impl<E> From<E> for TestFailure
where
    E: std::error::Error,
{
    fn from(err: E) -> Self {
        Self {
            kind: FailureKind::Failed,
            exception: ExceptionInfo::new(err.to_string()).with_type_name(std::any::type_name::<E>()),
        }
    }
}

// =============================================================================
// Assert
// =============================================================================

/// Assertion helpers returning [`TestOutcome`].
///
/// Messages are reported verbatim as the failure's exception message; the
/// caller's location becomes its stack trace.
pub struct Assert;

impl Assert {
    #[track_caller]
    fn failure(kind: FailureKind, message: String) -> TestFailure {
        let location = Location::caller();
        TestFailure {
            kind,
            exception: ExceptionInfo::new(message)
                .with_type_name("assertion")
                .with_stack_trace(format!("at {}:{}", location.file(), location.line())),
        }
    }

    /// Fails unless `condition` holds.
    #[track_caller]
    pub fn is_true(condition: bool, message: impl Into<String>) -> TestOutcome {
        if condition {
            Ok(())
        } else {
            Err(Self::failure(FailureKind::Failed, message.into()))
        }
    }

    /// Fails if `condition` holds.
    #[track_caller]
    pub fn is_false(condition: bool, message: impl Into<String>) -> TestOutcome {
        if condition {
            Err(Self::failure(FailureKind::Failed, message.into()))
        } else {
            Ok(())
        }
    }

    /// Fails unless the values are equal.
    #[track_caller]
    pub fn are_equal<T>(expected: T, actual: T) -> TestOutcome
    where
        T: PartialEq + fmt::Debug,
    {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::failure(
                FailureKind::Failed,
                format!("Expected {:?}, got {:?}", expected, actual),
            ))
        }
    }

    /// Fails if the values are equal.
    #[track_caller]
    pub fn are_not_equal<T>(unexpected: T, actual: T) -> TestOutcome
    where
        T: PartialEq + fmt::Debug,
    {
        if unexpected == actual {
            Err(Self::failure(
                FailureKind::Failed,
                format!("Expected any value except {:?}", unexpected),
            ))
        } else {
            Ok(())
        }
    }

    /// Fails unconditionally.
    #[track_caller]
    pub fn fail(message: impl Into<String>) -> TestOutcome {
        Err(Self::failure(FailureKind::Failed, message.into()))
    }

    /// Ends the test without a verdict.
    #[track_caller]
    pub fn inconclusive(message: impl Into<String>) -> TestOutcome {
        Err(Self::failure(FailureKind::Inconclusive, message.into()))
    }
}

// =============================================================================
// TestContext
// =============================================================================

#[derive(Default)]
struct Captured {
    output: Vec<String>,
    artifacts: Vec<FileArtifactProperty>,
}

/// Handed to every test body.
#[derive(Clone)]
pub struct TestContext {
    uid: TestNodeUid,
    cancellation: TestRunCancellationToken,
    captured: Arc<Mutex<Captured>>,
}

impl TestContext {
    /// Creates a context for one test execution.
    pub fn new(uid: TestNodeUid, cancellation: TestRunCancellationToken) -> Self {
        Self {
            uid,
            cancellation,
            captured: Arc::new(Mutex::new(Captured::default())),
        }
    }

    /// Uid of the running test.
    pub fn uid(&self) -> &TestNodeUid {
        &self.uid
    }

    /// The test's cancellation token; fires on run cancellation or timeout.
    pub fn cancellation(&self) -> &TestRunCancellationToken {
        &self.cancellation
    }

    /// Returns a cancellation failure if the test should stop.
    pub fn throw_if_cancellation_requested(&self) -> TestOutcome {
        self.cancellation
            .throw_if_cancellation_requested()
            .map_err(|_| TestFailure::cancelled())
    }

    /// Records a line of test output.
    pub fn write_line(&self, line: impl Into<String>) {
        self.captured.lock().output.push(line.into());
    }

    /// Attaches a file produced by the test.
    pub fn attach_file(&self, path: impl Into<PathBuf>, display_name: impl Into<String>) {
        self.captured.lock().artifacts.push(FileArtifactProperty {
            path: path.into(),
            display_name: display_name.into(),
            description: None,
        });
    }

    /// Drains captured output and artifacts as node properties.
    pub fn take_properties(&self) -> Vec<Property> {
        let mut captured = self.captured.lock();
        let mut properties = Vec::new();
        if !captured.output.is_empty() {
            properties.push(Property::StandardOutput(captured.output.join("\n")));
            captured.output.clear();
        }
        properties.extend(captured.artifacts.drain(..).map(Property::FileArtifact));
        properties
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("uid", &self.uid)
            .field("cancelled", &self.cancellation.is_cancellation_requested())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TestCase / TestRegistry
// =============================================================================

/// Boxed async test body.
pub type TestBody = Arc<dyn Fn(TestContext) -> BoxFuture<'static, TestOutcome> + Send + Sync>;

/// One registered test.
#[derive(Clone)]
pub struct TestCase {
    /// Unique name, used as the node uid.
    pub name: String,
    /// Name shown to users.
    pub display_name: String,
    /// Category labels.
    pub categories: Vec<String>,
    /// Timeout overriding the run default.
    pub timeout: Option<Duration>,
    /// When set, the test is reported as skipped with this reason.
    pub ignore_reason: Option<String>,
    body: TestBody,
}

impl TestCase {
    /// Creates a test case.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestOutcome> + Send + 'static,
    {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            categories: Vec::new(),
            timeout: None,
            ignore_reason: None,
            body: Arc::new(move |ctx| Box::pin(body(ctx))),
        }
    }

    /// Sets the display name.
    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Adds a category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    /// Sets a per-test timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the test as ignored.
    pub fn ignore(mut self, reason: impl Into<String>) -> Self {
        self.ignore_reason = Some(reason.into());
        self
    }

    /// Returns the node uid of the test.
    pub fn uid(&self) -> TestNodeUid {
        TestNodeUid::new(self.name.clone())
    }

    /// Starts the test body.
    pub fn invoke(&self, context: TestContext) -> BoxFuture<'static, TestOutcome> {
        (self.body)(context)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("categories", &self.categories)
            .field("timeout", &self.timeout)
            .field("ignore_reason", &self.ignore_reason)
            .finish_non_exhaustive()
    }
}

/// The explicit test registration table.
#[derive(Debug, Default, Clone)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
    names: HashSet<String>,
}

impl TestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a test case.
    ///
    /// # Errors
    ///
    /// Returns `ExtensionError::DuplicateTest` if the name is taken.
    pub fn register(&mut self, case: TestCase) -> Result<&mut Self, ExtensionError> {
        if !self.names.insert(case.name.clone()) {
            return Err(ExtensionError::DuplicateTest { name: case.name });
        }
        self.cases.push(case);
        Ok(self)
    }

    /// Registers a test from a name and body.
    ///
    /// # Errors
    ///
    /// Returns `ExtensionError::DuplicateTest` if the name is taken.
    pub fn test<F, Fut>(&mut self, name: impl Into<String>, body: F) -> Result<&mut Self, ExtensionError>
    where
        F: Fn(TestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestOutcome> + Send + 'static,
    {
        self.register(TestCase::new(name, body))
    }

    /// Returns a case by name.
    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Iterates in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.iter()
    }

    /// Number of registered cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns `true` if empty.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
