// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! vigil - test platform host
//!
//! With no tests registered, the binary is useful for `listen`, `validate`,
//! `options` and `version`.

fn main() -> std::process::ExitCode {
    vigil_bin::run_test_application(vigil_core::TestRegistry::new())
}
