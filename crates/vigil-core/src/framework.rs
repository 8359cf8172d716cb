// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Test framework contract.
//!
//! A [`TestFramework`] is the producer of test node updates. The host
//! creates a framework session, sends it one [`TestExecutionRequest`], then
//! closes the framework session:
//!
//! ```text
//! create_test_session ──► execute_request(Discover | Run) ──► close_test_session
//!        │                          │
//!        ▼                          ▼
//!  is_success == false       publishes TestNodeUpdateMessage
//!  (execution skipped)       on the bus for every node
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::{DataProducer, MessageBus};
use crate::capability::Capabilities;
use crate::command_line::CommandLineOptions;
use crate::error::VigilResult;
use crate::session::TestSessionContext;
use crate::types::TestNodeUid;

// =============================================================================
// Session Results
// =============================================================================

/// Outcome of creating or closing a framework session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSessionResult {
    /// Whether the operation succeeded.
    pub is_success: bool,
    /// Why it failed.
    pub error_message: Option<String>,
}

impl TestSessionResult {
    /// A successful result.
    pub fn success() -> Self {
        Self {
            is_success: true,
            error_message: None,
        }
    }

    /// A failed result.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Result of [`TestFramework::create_test_session`].
pub type CreateTestSessionResult = TestSessionResult;

/// Result of [`TestFramework::close_test_session`].
pub type CloseTestSessionResult = TestSessionResult;

// =============================================================================
// TestNodeFilter
// =============================================================================

/// Selects test nodes by uid pattern and category.
///
/// Patterns use `*` as a wildcard and are joined by `|`; a node matches if
/// any pattern matches its uid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestNodeFilter {
    patterns: Vec<String>,
    category: Option<String>,
}

impl TestNodeFilter {
    /// Parses a `|`-separated pattern expression.
    pub fn parse(expression: &str) -> Self {
        Self {
            patterns: expression
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
            category: None,
        }
    }

    /// Restricts matches to nodes carrying a category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Returns `true` if the node passes the filter.
    pub fn matches<'a>(&self, uid: &TestNodeUid, categories: impl IntoIterator<Item = &'a str>) -> bool {
        let uid_matches =
            self.patterns.is_empty() || self.patterns.iter().any(|p| wildcard_match(p, uid.as_str()));
        if !uid_matches {
            return false;
        }
        match &self.category {
            Some(wanted) => categories.into_iter().any(|c| c == wanted),
            None => true,
        }
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

// =============================================================================
// Requests
// =============================================================================

/// What the host asks the framework to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestExecutionRequest {
    /// Report matching nodes as discovered without running them.
    Discover {
        /// Optional node filter.
        filter: Option<TestNodeFilter>,
    },
    /// Run matching nodes.
    Run {
        /// Optional node filter.
        filter: Option<TestNodeFilter>,
    },
}

impl TestExecutionRequest {
    /// Returns the request's filter.
    pub fn filter(&self) -> Option<&TestNodeFilter> {
        match self {
            TestExecutionRequest::Discover { filter } | TestExecutionRequest::Run { filter } => {
                filter.as_ref()
            }
        }
    }

    /// Returns `true` for discovery requests.
    pub fn is_discovery(&self) -> bool {
        matches!(self, TestExecutionRequest::Discover { .. })
    }
}

/// Everything a framework needs to serve one request.
#[derive(Clone)]
pub struct ExecuteRequestContext {
    /// The request.
    pub request: TestExecutionRequest,
    /// The session the request runs in.
    pub session: TestSessionContext,
    /// The bus to publish node updates on.
    pub bus: MessageBus,
    /// Resolved command-line options.
    pub options: Arc<CommandLineOptions>,
}

impl fmt::Debug for ExecuteRequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteRequestContext")
            .field("request", &self.request)
            .field("session", &self.session.session_uid)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TestFramework
// =============================================================================

/// A test framework plugged into the host.
#[async_trait]
pub trait TestFramework: DataProducer {
    /// Optional behaviors the framework supports.
    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
    }

    /// Prepares a framework session. A failure prevents execution.
    async fn create_test_session(&self, context: &TestSessionContext) -> CreateTestSessionResult;

    /// Serves one request, publishing node updates on the bus.
    async fn execute_request(&self, context: ExecuteRequestContext) -> VigilResult<()>;

    /// Releases the framework session.
    async fn close_test_session(&self, context: &TestSessionContext) -> CloseTestSessionResult;
}

// =============================================================================
// Tests
// =============================================================================
