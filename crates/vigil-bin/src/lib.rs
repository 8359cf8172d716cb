// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # vigil-bin
//!
//! Command-line host for vigil test applications.
//!
//! This crate provides the entry point a test binary calls, including:
//!
//! - CLI argument parsing with clap
//! - Test application orchestration (standalone or `--server` mode)
//! - Graceful shutdown on OS signals
//! - Logging initialization
//! - Command implementations (run, listen, validate, options, version)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              main.rs / run_test_application                 │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │    cli.rs   │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                          │
//!                   ┌──────▼──────┐
//!                   │  TestHost   │──── IpcReporter ───► runner
//!                   │ (vigil-core)│
//!                   └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use vigil_core::{Assert, TestRegistry};
//!
//! fn main() -> std::process::ExitCode {
//!     let mut tests = TestRegistry::new();
//!     tests.test("math::adds", |_| async { Assert::are_equal(4, 2 + 2) }).unwrap();
//!     vigil_bin::run_test_application(tests)
//! }
//! ```
//!
//! ```bash
//! # Run every test
//! my-tests
//!
//! # Report to a runner
//! my-tests run --server --client-port 5050
//!
//! # Print what test hosts report
//! vigil listen --port 5050
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{report_error, BinError, BinResult};
pub use logging::init_logging;
pub use runtime::TestApplication;
pub use shutdown::ShutdownCoordinator;

use vigil_core::{ExitCode, TestRegistry};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

// =============================================================================
// Entry Points
// =============================================================================

/// Parses the process arguments and runs `tests`.
pub fn run_test_application(tests: TestRegistry) -> std::process::ExitCode {
    TestApplication::new(tests).main()
}

impl TestApplication {
    /// Parses the process arguments, runs the selected command on a fresh
    /// multi-threaded runtime and returns the process exit code.
    pub fn main(self) -> std::process::ExitCode {
        let cli = Cli::parse_args();

        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                report_error(&BinError::init(format!("Failed to start async runtime: {}", e)));
                return process_exit_code(ExitCode::GenericFailure);
            }
        };

        let code = match runtime.block_on(commands::execute(cli, self)) {
            Ok(code) => code,
            Err(e) => {
                report_error(&e);
                e.exit_code()
            }
        };
        process_exit_code(code)
    }
}

fn process_exit_code(code: ExitCode) -> std::process::ExitCode {
    std::process::ExitCode::from(code.code() as u8)
}
