// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cooperative cancellation and graceful stop.
//!
//! Two signals with different strength:
//!
//! - [`TestRunCancellationToken`]: hard cancellation of the run's *work*.
//!   Idempotent and irreversible. Lifecycle teardown still runs.
//! - [`GracefulStopToken`]: asks the framework to stop starting new test
//!   cases while in-flight ones finish and report.
//!
//! # Architecture
//!
//! ```text
//!   run token ──cancel()──┬──► child token (test A) ──► timeout supervisor
//!                         ├──► child token (test B)
//!                         └──► on_cancel callbacks
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_core::cancellation::TestRunCancellationToken;
//!
//! let token = TestRunCancellationToken::new();
//! let child = token.child_token();
//!
//! token.cancel();
//! assert!(child.throw_if_cancellation_requested().is_err());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::Cancelled;

type Callback = Box<dyn FnOnce() + Send>;

// =============================================================================
// TestRunCancellationToken
// =============================================================================

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    callbacks: Mutex<Vec<Callback>>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            callbacks: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }

        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Run-scoped cooperative cancellation token.
///
/// Clones share the same state. `cancel()` is idempotent and cannot be
/// undone. Operations observe it by polling
/// ([`throw_if_cancellation_requested`](Self::throw_if_cancellation_requested)),
/// by awaiting [`cancelled`](Self::cancelled), or through
/// [`on_cancel`](Self::on_cancel) callbacks.
#[derive(Clone)]
pub struct TestRunCancellationToken {
    inner: Arc<TokenInner>,
}

impl TestRunCancellationToken {
    /// Creates a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Requests cancellation.
    ///
    /// Returns `true` if this call performed the cancellation, `false` if
    /// the token was already cancelled.
    pub fn cancel(&self) -> bool {
        let first = self.inner.cancel();
        if first {
            debug!("Cancellation requested");
        }
        first
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Returns `Err(Cancelled)` if cancellation has been requested.
    pub fn throw_if_cancellation_requested(&self) -> Result<(), Cancelled> {
        if self.is_cancellation_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancellation_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Registers a callback invoked when cancellation is requested.
    ///
    /// If the token is already cancelled the callback runs immediately on
    /// the calling thread.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.inner.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Creates a child token.
    ///
    /// Cancelling this token cancels the child; cancelling the child does
    /// not affect this token.
    pub fn child_token(&self) -> TestRunCancellationToken {
        let child = Arc::new(TokenInner::new());
        {
            let mut children = self.inner.children.lock();
            if !self.inner.is_cancelled() {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child));
                return Self { inner: child };
            }
        }
        child.cancel();
        Self { inner: child }
    }

    /// Runs a future until it completes or the token is cancelled.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }

    /// Creates a guard that cancels this token when dropped.
    pub fn drop_guard(&self) -> CancellationGuard {
        CancellationGuard {
            token: self.clone(),
            armed: true,
        }
    }
}

impl Default for TestRunCancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestRunCancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRunCancellationToken")
            .field("cancelled", &self.is_cancellation_requested())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CancellationGuard
// =============================================================================

/// A guard that cancels its token when dropped.
///
/// The executor holds one per test case so the case's child token is
/// cancelled when the case task returns or unwinds.
pub struct CancellationGuard {
    token: TestRunCancellationToken,
    armed: bool,
}

impl CancellationGuard {
    /// Disarms the guard so it won't cancel on drop.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        if self.armed && self.token.cancel() {
            trace!("CancellationGuard dropped, cancelling token");
        }
    }
}

// =============================================================================
// GracefulStopToken
// =============================================================================

#[derive(Default)]
struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

/// A weaker signal than cancellation: stop starting new work.
#[derive(Clone, Default)]
pub struct GracefulStopToken {
    inner: Arc<StopInner>,
}

impl GracefulStopToken {
    /// Creates a new token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop. Returns `true` on the first request.
    pub fn request_stop(&self) -> bool {
        let first = self
            .inner
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            debug!("Graceful stop requested");
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Returns `true` once a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Waits until a stop is requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for GracefulStopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GracefulStopToken")
            .field("requested", &self.is_stop_requested())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent_and_irreversible() {
        let token = TestRunCancellationToken::new();
        assert!(token.throw_if_cancellation_requested().is_ok());

        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancellation_requested());
        assert_eq!(token.throw_if_cancellation_requested(), Err(Cancelled));
    }

    #[test]
    fn test_clones_share_state() {
        let token = TestRunCancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancellation_requested());
    }

    #[test]
    fn test_on_cancel_callbacks() {
        let token = TestRunCancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after cancellation: runs immediately.
        let c = calls.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_child_tokens() {
        let parent = TestRunCancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        child.cancel();
        assert!(!parent.is_cancellation_requested());
        assert!(grandchild.is_cancellation_requested());

        let sibling = parent.child_token();
        parent.cancel();
        assert!(sibling.is_cancellation_requested());

        let late = parent.child_token();
        assert!(late.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_cancelled_future_wakes() {
        let token = TestRunCancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let token = TestRunCancellationToken::new();
        assert_eq!(token.run_until_cancelled(async { 7 }).await, Ok(7));

        token.cancel();
        let result = token
            .run_until_cancelled(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_drop_guard() {
        let token = TestRunCancellationToken::new();
        {
            let _guard = token.drop_guard();
        }
        assert!(token.is_cancellation_requested());

        let token = TestRunCancellationToken::new();
        token.drop_guard().disarm();
        assert!(!token.is_cancellation_requested());
    }

    #[tokio::test]
    async fn test_graceful_stop_is_separate_from_cancellation() {
        let stop = GracefulStopToken::new();
        let token = TestRunCancellationToken::new();

        assert!(stop.request_stop());
        assert!(!stop.request_stop());
        assert!(stop.is_stop_requested());
        assert!(!token.is_cancellation_requested());

        tokio::time::timeout(Duration::from_secs(1), stop.stopped())
            .await
            .expect("already stopped");
    }
}
