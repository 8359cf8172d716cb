// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Process exit codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The outcome of a test host run, as a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Every executed test passed.
    Success = 0,
    /// Unclassified infrastructure failure.
    GenericFailure = 1,
    /// At least one test failed, timed out or errored.
    AtLeastOneTestFailed = 2,
    /// The run was cancelled.
    TestSessionAborted = 3,
    /// Extensions or configuration are inconsistent.
    InvalidPlatformSetup = 4,
    /// The command line did not validate.
    InvalidCommandLine = 5,
    /// No test ran.
    ZeroTests = 8,
    /// Fewer tests ran than `--minimum-expected-tests`.
    MinimumExpectedTestsPolicyViolation = 9,
    /// The framework could not create or close its session.
    TestAdapterTestSessionFailure = 10,
    /// The IPC peer speaks a different protocol version.
    IncompatibleProtocolVersion = 12,
    /// The run stopped after `--maximum-failed-tests` failures.
    TestExecutionStoppedForMaxFailedTests = 13,
}

impl ExitCode {
    /// Returns the numeric exit code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Converts a numeric code back.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ExitCode::Success,
            1 => ExitCode::GenericFailure,
            2 => ExitCode::AtLeastOneTestFailed,
            3 => ExitCode::TestSessionAborted,
            4 => ExitCode::InvalidPlatformSetup,
            5 => ExitCode::InvalidCommandLine,
            8 => ExitCode::ZeroTests,
            9 => ExitCode::MinimumExpectedTestsPolicyViolation,
            10 => ExitCode::TestAdapterTestSessionFailure,
            12 => ExitCode::IncompatibleProtocolVersion,
            13 => ExitCode::TestExecutionStoppedForMaxFailedTests,
            _ => return None,
        })
    }

    /// Returns `true` for [`ExitCode::Success`].
    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Returns a short description.
    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::GenericFailure => "generic failure",
            ExitCode::AtLeastOneTestFailed => "at least one test failed",
            ExitCode::TestSessionAborted => "test session aborted",
            ExitCode::InvalidPlatformSetup => "invalid platform setup",
            ExitCode::InvalidCommandLine => "invalid command line",
            ExitCode::ZeroTests => "zero tests ran",
            ExitCode::MinimumExpectedTestsPolicyViolation => "minimum expected tests policy violation",
            ExitCode::TestAdapterTestSessionFailure => "test adapter session failure",
            ExitCode::IncompatibleProtocolVersion => "incompatible protocol version",
            ExitCode::TestExecutionStoppedForMaxFailedTests => "stopped after maximum failed tests",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.code()
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code() as u8)
    }
}
