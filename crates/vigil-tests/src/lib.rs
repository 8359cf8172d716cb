// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Vigil Integration Tests
//!
//! Integration tests for the vigil test platform, plus the utilities they
//! share.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities, fixtures, and helpers
//!   - `fixtures`: Pre-built nodes, messages, registries and configs
//!   - `builders`: Builders for nodes and captured-output hosts
//!   - `assertions`: Custom assertion helpers
//!   - `mocks`: Recording extensions and IPC handlers
//!   - `harness`: IPC server and session harnesses
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p vigil-tests
//!
//! # Run specific test suite
//! cargo test -p vigil-tests --test integration_bus
//! cargo test -p vigil-tests --test integration_session
//! cargo test -p vigil-tests --test integration_ipc
//! cargo test -p vigil-tests --test integration_host
//! cargo test -p vigil-tests --test integration_config
//!
//! # Run with verbose output
//! cargo test -p vigil-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Bus Tests (`integration_bus.rs`)
//! - Per-node ordering of updates
//! - Disabled consumers and data-kind routing
//! - Consumer fault isolation and queued delivery
//! - Console rendering of failures
//!
//! ### Session Tests (`integration_session.rs`)
//! - Lifecycle transitions and handler ordering
//! - Cancellation mid-session
//! - Cleanup failures
//!
//! ### IPC Tests (`integration_ipc.rs`)
//! - Handshake and version negotiation
//! - Request/response over a live server
//! - Reporting a run to a runner
//!
//! ### Host Tests (`integration_host.rs`)
//! - Exit codes and their precedence
//! - Test listing, filtering and policies
//! - Lifecycle callbacks and extension activation
//!
//! ### Config Tests (`integration_config.rs`)
//! - YAML and TOML loading
//! - Validation rules and environment overrides
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use vigil_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (harness, recorder) = SessionHarness::with_recorder();
//!     harness.run(|res| async move {
//!         for message in MessageFixtures::run_to_pass(&res.session.session_uid, "a::b") {
//!             res.bus.publish(res.producer.as_ref(), message).await.unwrap();
//!         }
//!     }).await;
//!     assert_states(&recorder, "a::b", &[StateKind::InProgress, StateKind::Passed]);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::builders::*;
    pub use crate::common::assertions::*;
    pub use crate::common::mocks::*;
    pub use crate::common::harness::*;
}
