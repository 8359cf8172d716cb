// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Test session lifecycle coordination.
//!
//! A session is one discovery or execution run. The [`SessionCoordinator`]
//! drives it through a strictly monotonic state machine and notifies the
//! registered [`TestSessionLifetimeHandler`]s at each edge.
//!
//! # State Transitions
//!
//! ```text
//!   ┌──────────┐ start ┌──────────┐       ┌─────────┐ finish ┌───────────┐ close ┌────────┐
//!   │NotStarted│──────▶│ Starting │──────▶│ Running │───────▶│ Finishing │──────▶│ Closed │
//!   └──────────┘       └──────────┘       └─────────┘        └───────────┘       └────────┘
//!                     on_starting()                   drain() + on_finishing()   cleanup()
//! ```
//!
//! Every edge is a compare-and-swap on an atomic, so each phase runs at most
//! once no matter how many tasks race to trigger it. Cancellation stops the
//! run's work but never the teardown: `finish` and `close` always run their
//! handlers.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{panic_message, MessageBus};
use crate::cancellation::TestRunCancellationToken;
use crate::error::{BusError, ConsumerFault, HandlerError, SessionError, SessionResult};
use crate::extension::Extension;
use crate::types::{ExecutionId, SessionUid};

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of a test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Created but not started.
    NotStarted = 0,
    /// Starting handlers are running.
    Starting = 1,
    /// Requests may be executed.
    Running = 2,
    /// Draining the bus and running finishing handlers.
    Finishing = 3,
    /// Cleanup has run; the session uid is retired.
    Closed = 4,
}

impl SessionState {
    /// Converts to u8 for atomic storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts from u8.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::NotStarted,
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Finishing,
            _ => SessionState::Closed,
        }
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "NotStarted",
            SessionState::Starting => "Starting",
            SessionState::Running => "Running",
            SessionState::Finishing => "Finishing",
            SessionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Handler Traits
// =============================================================================

/// Everything a lifetime handler can see about the current session.
#[derive(Debug, Clone)]
pub struct TestSessionContext {
    /// Uid of the session.
    pub session_uid: SessionUid,
    /// Identity of this host execution.
    pub execution_id: ExecutionId,
    /// Run-scoped cancellation token.
    pub cancellation: TestRunCancellationToken,
}

/// Notified when a test session starts and finishes.
#[async_trait]
pub trait TestSessionLifetimeHandler: Extension {
    /// Called after the session uid is created, before any request runs.
    async fn on_test_session_starting(&self, context: &TestSessionContext) -> Result<(), HandlerError>;

    /// Called after the bus has drained.
    ///
    /// Runs even when the session was cancelled.
    async fn on_test_session_finishing(&self, context: &TestSessionContext) -> Result<(), HandlerError>;
}

/// An extension holding resources released when the session closes.
#[async_trait]
pub trait AsyncCleanableExtension: Extension {
    /// Releases the extension's resources.
    async fn cleanup(&self) -> Result<(), HandlerError>;
}

// =============================================================================
// SessionFinishReport
// =============================================================================

/// What went wrong (if anything) while finishing a session.
#[derive(Debug, Clone, Default)]
pub struct SessionFinishReport {
    /// Faults collected from the bus drain.
    pub consumer_faults: Vec<ConsumerFault>,
    /// Finishing handlers that failed, as `SessionError::HandlerFailed`
    /// messages.
    pub handler_failures: Vec<String>,
}

impl SessionFinishReport {
    /// Returns `true` if neither consumers nor handlers failed.
    pub fn is_clean(&self) -> bool {
        self.consumer_faults.is_empty() && self.handler_failures.is_empty()
    }
}

// =============================================================================
// SessionCoordinator
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Phase {
    Starting,
    Finishing,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Finishing => "finishing",
        }
    }
}

/// Drives one test session through its lifecycle.
pub struct SessionCoordinator {
    state: AtomicU8,
    bus: MessageBus,
    handlers: Vec<Arc<dyn TestSessionLifetimeHandler>>,
    cleanables: Vec<Arc<dyn AsyncCleanableExtension>>,
    context: Mutex<Option<TestSessionContext>>,
}

impl SessionCoordinator {
    /// Creates a coordinator bound to a built bus.
    pub fn new(bus: MessageBus) -> Self {
        Self {
            state: AtomicU8::new(SessionState::NotStarted.as_u8()),
            bus,
            handlers: Vec::new(),
            cleanables: Vec::new(),
            context: Mutex::new(None),
        }
    }

    /// Adds lifetime handlers, invoked in the order given.
    pub fn with_lifetime_handlers(
        mut self,
        handlers: impl IntoIterator<Item = Arc<dyn TestSessionLifetimeHandler>>,
    ) -> Self {
        self.handlers.extend(handlers);
        self
    }

    /// Adds cleanup hooks run on close.
    pub fn with_cleanables(
        mut self,
        cleanables: impl IntoIterator<Item = Arc<dyn AsyncCleanableExtension>>,
    ) -> Self {
        self.cleanables.extend(cleanables);
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns the session context once started.
    pub fn context(&self) -> Option<TestSessionContext> {
        self.context.lock().clone()
    }

    /// Returns the bus the session publishes on.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    fn transition(&self, from: SessionState, to: SessionState) -> SessionResult<()> {
        match self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                debug!(%from, %to, "Session state transition");
                Ok(())
            }
            Err(actual) => Err(SessionError::invalid_transition(
                SessionState::from_u8(actual),
                to,
            )),
        }
    }

    /// Starts the session.
    ///
    /// The session reaches `Running` even if a starting handler fails; the
    /// first failure is then returned so the caller can skip execution and
    /// still tear the session down.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` - The session was already started
    /// - `SessionError::HandlerFailed` - A starting handler failed
    pub async fn start(
        &self,
        execution_id: ExecutionId,
        cancellation: TestRunCancellationToken,
    ) -> SessionResult<TestSessionContext> {
        self.transition(SessionState::NotStarted, SessionState::Starting)?;

        let context = TestSessionContext {
            session_uid: SessionUid::generate(),
            execution_id,
            cancellation,
        };
        *self.context.lock() = Some(context.clone());
        info!(session = %context.session_uid, "Test session starting");

        let failures = self.run_handlers(Phase::Starting, &context).await;
        self.transition(SessionState::Starting, SessionState::Running)?;

        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(context),
        }
    }

    /// Finishes the session: drains the bus, then runs finishing handlers.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` if the session is not
    /// running, including when `finish` has already been called.
    pub async fn finish(&self) -> SessionResult<SessionFinishReport> {
        self.transition(SessionState::Running, SessionState::Finishing)?;
        let context = self.require_context(SessionState::Finishing)?;

        let consumer_faults = match self.bus.drain().await {
            Ok(()) => Vec::new(),
            Err(BusError::ConsumerFaults(faults)) => faults,
            Err(e) => {
                warn!(error = %e, error_type = e.error_type(), "Bus drain failed");
                Vec::new()
            }
        };

        let handler_failures = self
            .run_handlers(Phase::Finishing, &context)
            .await
            .into_iter()
            .map(|e| e.to_string())
            .collect();

        let report = SessionFinishReport {
            consumer_faults,
            handler_failures,
        };
        info!(
            session = %context.session_uid,
            consumer_faults = report.consumer_faults.len(),
            handler_failures = report.handler_failures.len(),
            "Test session finished"
        );
        Ok(report)
    }

    /// Closes the session: runs cleanup hooks and retires the session uid.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` - The session is not finishing
    /// - `SessionError::CleanupFailed` - One or more cleanup hooks failed
    pub async fn close(&self) -> SessionResult<()> {
        self.transition(SessionState::Finishing, SessionState::Closed)?;
        let context = self.require_context(SessionState::Closed)?;

        let mut failures = Vec::new();
        for cleanable in &self.cleanables {
            let outcome = AssertUnwindSafe(cleanable.cleanup()).catch_unwind().await;
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(extension = cleanable.uid(), error = %message, "Cleanup failed");
            failures.push(format!("{}: {}", cleanable.uid(), message));
        }

        self.bus.retire_session(&context.session_uid);
        info!(session = %context.session_uid, "Test session closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::CleanupFailed { failures })
        }
    }

    fn require_context(&self, to: SessionState) -> SessionResult<TestSessionContext> {
        self.context()
            .ok_or_else(|| SessionError::invalid_transition(SessionState::NotStarted, to))
    }

    async fn run_handlers(&self, phase: Phase, context: &TestSessionContext) -> Vec<SessionError> {
        let mut failures = Vec::new();

        for handler in &self.handlers {
            if !handler.is_enabled().await {
                continue;
            }

            let future = match phase {
                Phase::Starting => handler.on_test_session_starting(context),
                Phase::Finishing => handler.on_test_session_finishing(context),
            };

            let message = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(HandlerError::Cancelled(_))) => {
                    debug!(handler = handler.uid(), phase = phase.as_str(), "Handler observed cancellation");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!(handler = handler.uid(), phase = phase.as_str(), error = %message, "Lifetime handler failed");
            failures.push(SessionError::handler_failed(handler.uid(), phase.as_str(), message));
        }

        failures
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("state", &self.state())
            .field("handlers", &self.handlers.len())
            .field("cleanables", &self.cleanables.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
