// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Common Test Utilities
//!
//! Shared fixtures, builders, mocks and harnesses for the integration
//! tests.
//!
//! ## Module Structure
//!
//! - `fixtures`: Pre-built nodes, messages, registries and config documents
//! - `builders`: Node builder and captured-output host builder
//! - `assertions`: State, exit-code and output assertions
//! - `mocks`: Recording consumers, handlers and IPC request handlers
//! - `harness`: Live IPC server and session harnesses

pub mod fixtures;
pub mod builders;
pub mod assertions;
pub mod mocks;
pub mod harness;

// Re-exports for convenience
pub use fixtures::*;
pub use builders::*;
pub use assertions::*;
pub use mocks::*;
pub use harness::*;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize test logging. Call this at the start of each test module.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,vigil=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// Generate a unique test ID for resource isolation.
pub fn unique_test_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock before UNIX epoch")
        .as_nanos();
    format!("test_{}", timestamp)
}

/// Create a temporary directory for test data.
pub fn temp_test_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temp directory")
}
